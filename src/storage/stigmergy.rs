//! Virtual stigmergy: a key/value register set replicated by gossip.
//!
//! Every agent holds its own replica. Writes are stamped with the next local
//! timestamp for the key and flooded; replicas adopt strictly newer entries,
//! ignore stale ones, and settle equal-timestamp collisions with a pure
//! conflict resolver so that all replicas pick the same winner. Reads answer
//! from the local replica at once and ask peers to correct it if it is behind.

use anyhow::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::entry::{ConflictResolver, LowestOwnerWins, StigmergyEntry, StigmergyValue};
use super::StigmergyError;
use crate::engine::{Component, Priority, StepContext, WaitCondition};
use crate::types::{AgentId, Outbox, Payload, StigmergyMessage, StigmergyOp};

/// Emitted to subscribers when a peer's entry replaces the local one.
#[derive(Debug, Clone, PartialEq)]
pub struct StigmergyUpdate<V> {
    pub key: String,
    pub entry: StigmergyEntry<V>,
}

struct Replica<V> {
    channel: String,
    owner: AgentId,
    entries: BTreeMap<String, StigmergyEntry<V>>,
    resolver: Box<dyn ConflictResolver<V>>,
    subscribers: Vec<UnboundedSender<StigmergyUpdate<V>>>,
}

impl<V: StigmergyValue> Replica<V> {
    fn emit(&self, outbox: &mut Outbox, op: StigmergyOp, key: &str) {
        let entry = self.entries.get(key);
        let value = match entry.map(|e| serde_json::to_value(&e.value)).transpose() {
            Ok(value) => value,
            Err(e) => {
                log::warn!(
                    "agent {} cannot encode stigmergy `{}` key `{}`: {}",
                    self.owner,
                    self.channel,
                    key,
                    e
                );
                return;
            }
        };

        outbox.broadcast(Payload::Stigmergy(StigmergyMessage {
            channel: self.channel.clone(),
            op,
            key: key.to_string(),
            value,
            timestamp: entry.map_or(0, |e| e.timestamp),
            owner: entry.map_or(self.owner, |e| e.owner),
        }));
    }

    /// Decodes a fresh copy of the remote entry.
    fn decode(&self, message: &StigmergyMessage) -> Option<StigmergyEntry<V>> {
        let raw = message.value.clone()?;
        match serde_json::from_value::<V>(raw) {
            Ok(value) => Some(StigmergyEntry::new(
                value,
                message.timestamp,
                message.owner,
            )),
            Err(e) => {
                log::warn!(
                    "agent {} dropped undecodable stigmergy `{}` key `{}` from owner {}: {}",
                    self.owner,
                    self.channel,
                    message.key,
                    message.owner,
                    e
                );
                None
            }
        }
    }

    fn notify(&mut self, key: &str) {
        let Some(entry) = self.entries.get(key).cloned() else {
            return;
        };
        let update = StigmergyUpdate {
            key: key.to_string(),
            entry,
        };
        self.subscribers
            .retain(|subscriber| subscriber.send(update.clone()).is_ok());
    }

    fn adopt(&mut self, key: &str, remote: StigmergyEntry<V>, outbox: &mut Outbox) {
        log::debug!(
            "agent {} adopts `{}`/{} ts={} owner={}",
            self.owner,
            self.channel,
            key,
            remote.timestamp,
            remote.owner
        );
        self.entries.insert(key.to_string(), remote);
        self.notify(key);
        self.emit(outbox, StigmergyOp::Put, key);
    }

    fn settle(&mut self, key: &str, remote: StigmergyEntry<V>, outbox: &mut Outbox) {
        let Some(local) = self.entries.get(key) else {
            return;
        };

        let winner = self.resolver.resolve(key, local, &remote);
        if &winner != local {
            log::debug!(
                "agent {} resolved `{}`/{} ts={} in favour of owner {}",
                self.owner,
                self.channel,
                key,
                winner.timestamp,
                winner.owner
            );
            self.entries.insert(key.to_string(), winner);
            self.notify(key);
        }
        self.emit(outbox, StigmergyOp::Put, key);
    }

    fn on_put(&mut self, message: &StigmergyMessage, outbox: &mut Outbox) {
        let Some(remote) = self.decode(message) else {
            return;
        };

        let local = self
            .entries
            .get(&message.key)
            .map(|e| (e.timestamp, e.owner));
        match local {
            None => self.adopt(&message.key, remote, outbox),
            Some((timestamp, _)) if timestamp < remote.timestamp => {
                self.adopt(&message.key, remote, outbox)
            }
            Some((timestamp, owner)) if timestamp == remote.timestamp && owner != remote.owner => {
                self.settle(&message.key, remote, outbox)
            }
            Some(_) => {}
        }
    }

    fn on_get(&mut self, message: &StigmergyMessage, outbox: &mut Outbox) {
        let Some((timestamp, owner)) = self
            .entries
            .get(&message.key)
            .map(|e| (e.timestamp, e.owner))
        else {
            return;
        };

        if timestamp > message.timestamp {
            self.emit(outbox, StigmergyOp::Put, &message.key);
        } else if timestamp == message.timestamp {
            if owner != message.owner {
                if let Some(remote) = self.decode(message) {
                    self.settle(&message.key, remote, outbox);
                }
            }
        } else if let Some(remote) = self.decode(message) {
            self.adopt(&message.key, remote, outbox);
        }
    }
}

/// Handle to one agent's replica of one stigmergy channel.
///
/// Clones share the same replica; hand one to the scheduler through
/// [`VirtualStigmergy::component`] and keep others in the components that
/// read and write it.
pub struct VirtualStigmergy<V> {
    inner: Arc<RwLock<Replica<V>>>,
}

impl<V> Clone for VirtualStigmergy<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: StigmergyValue> VirtualStigmergy<V> {
    pub fn new(
        channel: impl Into<String>,
        owner: AgentId,
        resolver: impl ConflictResolver<V> + 'static,
    ) -> Result<Self, StigmergyError> {
        let channel = channel.into();
        if channel.trim().is_empty() {
            return Err(StigmergyError::EmptyChannel);
        }
        if channel.chars().any(char::is_whitespace) {
            return Err(StigmergyError::InvalidChannel(channel));
        }

        Ok(Self {
            inner: Arc::new(RwLock::new(Replica {
                channel,
                owner,
                entries: BTreeMap::new(),
                resolver: Box::new(resolver),
                subscribers: Vec::new(),
            })),
        })
    }

    /// Replica using [`LowestOwnerWins`] to settle collisions.
    pub fn with_default_resolver(
        channel: impl Into<String>,
        owner: AgentId,
    ) -> Result<Self, StigmergyError> {
        Self::new(channel, owner, LowestOwnerWins)
    }

    pub fn channel(&self) -> String {
        self.inner.read().channel.clone()
    }

    pub fn owner(&self) -> AgentId {
        self.inner.read().owner
    }

    /// Writes locally with the next timestamp for `key` and broadcasts the entry.
    pub fn put(&self, outbox: &mut Outbox, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut replica = self.inner.write();
        let timestamp = replica.entries.get(&key).map_or(0, |e| e.timestamp) + 1;
        let owner = replica.owner;
        replica
            .entries
            .insert(key.clone(), StigmergyEntry::new(value, timestamp, owner));
        replica.emit(outbox, StigmergyOp::Put, &key);
    }

    /// Returns the local view at once and asks peers to correct it. A
    /// correction only shows up on a later read.
    pub fn try_get(&self, outbox: &mut Outbox, key: &str) -> Option<V> {
        let replica = self.inner.read();
        replica.emit(outbox, StigmergyOp::Get, key);
        replica.entries.get(key).map(|e| e.value.clone())
    }

    /// Local lookup only.
    pub fn has(&self, key: &str) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// Rebroadcasts every local entry. Expensive; meant for rendezvous points.
    pub fn send_all(&self, outbox: &mut Outbox) {
        let replica = self.inner.read();
        for key in replica.entries.keys() {
            replica.emit(outbox, StigmergyOp::Put, key);
        }
    }

    pub fn entry(&self, key: &str) -> Option<StigmergyEntry<V>> {
        self.inner.read().entries.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<StigmergyUpdate<V>> {
        let (tx, rx) = unbounded_channel();
        self.inner.write().subscribers.push(tx);
        rx
    }

    /// Applies one inbound message; corrective rebroadcasts go to `outbox`.
    pub fn receive(&self, message: &StigmergyMessage, outbox: &mut Outbox) {
        let mut replica = self.inner.write();
        if message.channel != replica.channel {
            return;
        }
        match message.op {
            StigmergyOp::Put => replica.on_put(message, outbox),
            StigmergyOp::Get => replica.on_get(message, outbox),
        }
    }

    pub fn component(&self) -> StigmergyComponent<V> {
        StigmergyComponent {
            name: format!("stigmergy:{}", self.channel()),
            store: self.clone(),
        }
    }

    fn describe(&self) -> String {
        let replica = self.inner.read();
        let entries: Vec<String> = replica
            .entries
            .iter()
            .map(|(key, e)| format!("{}@{}#{}", key, e.timestamp, e.owner))
            .collect();
        format!(
            "channel={} owner={} entries=[{}]",
            replica.channel,
            replica.owner,
            entries.join(", ")
        )
    }
}

/// Feeds this tick's inbound stigmergy traffic into the replica before
/// application components read it.
pub struct StigmergyComponent<V> {
    name: String,
    store: VirtualStigmergy<V>,
}

impl<V: StigmergyValue> Component for StigmergyComponent<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> Priority {
        Priority::uniform(Priority::STIGMERGY)
    }

    fn pre_update(&mut self, ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        for message in ctx.inbox {
            if let Payload::Stigmergy(stigmergy) = &message.payload {
                self.store.receive(stigmergy, ctx.outbox);
            }
        }
        Ok(WaitCondition::next_tick())
    }

    fn post_update(&mut self, _ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        Ok(WaitCondition::parked())
    }

    fn take_children(&mut self) -> Vec<Box<dyn Component>> {
        Vec::new()
    }

    fn debug_dump(&self) -> Option<String> {
        Some(self.store.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(owner: AgentId) -> VirtualStigmergy<String> {
        VirtualStigmergy::with_default_resolver("partition", owner).unwrap()
    }

    fn messages(outbox: Outbox) -> Vec<StigmergyMessage> {
        outbox
            .into_payloads()
            .into_iter()
            .filter_map(|p| match p {
                Payload::Stigmergy(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Delivers everything in `outbox` to `to`, returning what `to` rebroadcasts.
    fn deliver(outbox: Outbox, to: &VirtualStigmergy<String>) -> Outbox {
        let mut replies = Outbox::new();
        for message in messages(outbox) {
            to.receive(&message, &mut replies);
        }
        replies
    }

    #[test]
    fn test_rejects_empty_channel() {
        let result = VirtualStigmergy::<u32>::with_default_resolver("  ", 1);
        assert!(matches!(result, Err(StigmergyError::EmptyChannel)));

        let result = VirtualStigmergy::<u32>::with_default_resolver("two words", 1);
        assert!(matches!(result, Err(StigmergyError::InvalidChannel(_))));
    }

    #[test]
    fn test_put_increments_timestamp() {
        let store = replica(1);
        let mut outbox = Outbox::new();

        for expected in 1..=4 {
            store.put(&mut outbox, "k", format!("v{}", expected));
            assert_eq!(store.entry("k").unwrap().timestamp, expected);
        }

        assert_eq!(outbox.len(), 4);
        let sent = messages(outbox);
        assert!(sent.iter().all(|m| m.op == StigmergyOp::Put && m.owner == 1));
    }

    #[test]
    fn test_try_get_returns_local_view_and_broadcasts_get() {
        let store = replica(1);
        let mut outbox = Outbox::new();

        assert_eq!(store.try_get(&mut outbox, "missing"), None);
        store.put(&mut outbox, "k", "a".to_string());
        assert_eq!(store.try_get(&mut outbox, "k"), Some("a".to_string()));

        let sent = messages(outbox);
        assert_eq!(sent[0].op, StigmergyOp::Get);
        assert_eq!(sent[0].timestamp, 0);
        assert_eq!(sent[0].value, None);
        assert_eq!(sent[2].op, StigmergyOp::Get);
        assert_eq!(sent[2].timestamp, 1);
    }

    #[test]
    fn test_has_is_local_only() {
        let store = replica(1);
        let mut outbox = Outbox::new();
        assert!(!store.has("k"));
        store.put(&mut outbox, "k", "a".to_string());
        let before = outbox.len();
        assert!(store.has("k"));
        assert_eq!(outbox.len(), before);
    }

    #[test]
    fn test_newer_put_is_adopted_and_flooded() {
        let a = replica(1);
        let b = replica(2);
        let mut outbox = Outbox::new();
        a.put(&mut outbox, "k", "x".to_string());

        let flood = deliver(outbox, &b);

        assert_eq!(b.entry("k"), Some(StigmergyEntry::new("x".to_string(), 1, 1)));
        let rebroadcast = messages(flood);
        assert_eq!(rebroadcast.len(), 1);
        assert_eq!(rebroadcast[0].owner, 1);
    }

    #[test]
    fn test_stale_put_is_ignored() {
        let a = replica(1);
        let b = replica(2);
        let mut old = Outbox::new();
        a.put(&mut old, "k", "old".to_string());

        let mut scratch = Outbox::new();
        b.put(&mut scratch, "k", "b1".to_string());
        b.put(&mut scratch, "k", "b2".to_string());

        let replies = deliver(old, &b);
        assert!(replies.is_empty());
        assert_eq!(b.entry("k").unwrap().value, "b2");
    }

    #[test]
    fn test_equal_timestamp_conflict_picks_lower_owner() {
        let low = replica(3);
        let high = replica(7);
        let mut low_out = Outbox::new();
        let mut high_out = Outbox::new();
        low.put(&mut low_out, "k", "v1".to_string());
        high.put(&mut high_out, "k", "v2".to_string());

        let from_high = deliver(low_out, &high);
        let from_low = deliver(high_out, &low);

        let winner = StigmergyEntry::new("v1".to_string(), 1, 3);
        assert_eq!(high.entry("k"), Some(winner.clone()));
        assert_eq!(low.entry("k"), Some(winner));
        assert_eq!(messages(from_high)[0].owner, 3);
        assert_eq!(messages(from_low)[0].owner, 3);
    }

    #[test]
    fn test_get_with_older_view_triggers_correction() {
        let a = replica(1);
        let b = replica(2);
        let mut scratch = Outbox::new();
        a.put(&mut scratch, "k", "fresh".to_string());

        let mut ask = Outbox::new();
        assert_eq!(b.try_get(&mut ask, "k"), None);

        let correction = deliver(ask, &a);
        let sent = messages(correction);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].op, StigmergyOp::Put);

        let mut outbox = Outbox::new();
        for m in &sent {
            b.receive(m, &mut outbox);
        }
        assert_eq!(b.try_get(&mut outbox, "k"), Some("fresh".to_string()));
    }

    #[test]
    fn test_get_with_newer_view_is_adopted() {
        let a = replica(1);
        let b = replica(2);
        let mut scratch = Outbox::new();
        a.put(&mut scratch, "k", "old".to_string());
        b.put(&mut scratch, "k", "b1".to_string());
        b.put(&mut scratch, "k", "b2".to_string());

        let mut ask = Outbox::new();
        b.try_get(&mut ask, "k");
        let replies = deliver(ask, &a);

        assert_eq!(a.entry("k"), Some(StigmergyEntry::new("b2".to_string(), 2, 2)));
        assert_eq!(messages(replies)[0].op, StigmergyOp::Put);
    }

    #[test]
    fn test_get_for_unknown_key_is_ignored() {
        let a = replica(1);
        let b = replica(2);
        let mut ask = Outbox::new();
        b.try_get(&mut ask, "nothing");

        assert!(deliver(ask, &a).is_empty());
        assert!(a.is_empty());
    }

    #[test]
    fn test_send_all_rebroadcasts_every_entry() {
        let store = replica(1);
        let mut outbox = Outbox::new();
        store.put(&mut outbox, "a", "1".to_string());
        store.put(&mut outbox, "b", "2".to_string());

        let mut all = Outbox::new();
        store.send_all(&mut all);
        let keys: Vec<String> = messages(all).into_iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_other_channels_are_ignored() {
        let store = replica(1);
        let other = VirtualStigmergy::<String>::with_default_resolver("visited", 2).unwrap();
        let mut outbox = Outbox::new();
        other.put(&mut outbox, "k", "x".to_string());

        let replies = deliver(outbox, &store);
        assert!(replies.is_empty());
        assert!(!store.has("k"));
    }

    #[test]
    fn test_undecodable_value_is_dropped() {
        let store = VirtualStigmergy::<u32>::with_default_resolver("numbers", 1).unwrap();
        let message = StigmergyMessage {
            channel: "numbers".to_string(),
            op: StigmergyOp::Put,
            key: "k".to_string(),
            value: Some(serde_json::json!("not a number")),
            timestamp: 4,
            owner: 2,
        };

        let mut outbox = Outbox::new();
        store.receive(&message, &mut outbox);
        assert!(outbox.is_empty());
        assert!(!store.has("k"));
    }

    #[test]
    fn test_received_values_are_independent_copies() {
        let a = VirtualStigmergy::<Vec<u32>>::with_default_resolver("lists", 1).unwrap();
        let b = VirtualStigmergy::<Vec<u32>>::with_default_resolver("lists", 2).unwrap();
        let mut outbox = Outbox::new();
        a.put(&mut outbox, "k", vec![1, 2]);

        let mut replies = Outbox::new();
        for payload in outbox.into_payloads() {
            if let Payload::Stigmergy(m) = payload {
                b.receive(&m, &mut replies);
            }
        }

        let mut local = a.entry("k").unwrap().value;
        local.push(99);
        assert_eq!(b.entry("k").unwrap().value, vec![1, 2]);
        assert_eq!(a.entry("k").unwrap().value, vec![1, 2]);
    }

    #[test]
    fn test_subscribers_see_adopted_entries() {
        let a = replica(1);
        let b = replica(2);
        let mut updates = b.subscribe();
        let mut outbox = Outbox::new();
        a.put(&mut outbox, "k", "x".to_string());

        deliver(outbox, &b);

        let update = updates.try_recv().unwrap();
        assert_eq!(update.key, "k");
        assert_eq!(update.entry.value, "x");
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn test_local_put_does_not_notify() {
        let a = replica(1);
        let mut updates = a.subscribe();
        let mut outbox = Outbox::new();
        a.put(&mut outbox, "k", "x".to_string());
        assert!(updates.try_recv().is_err());
    }
}
