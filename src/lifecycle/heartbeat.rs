use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::HeartbeatConfig;
use crate::engine::{Component, Priority, StepContext, WaitCondition};
use crate::types::{AgentId, Heartbeat, LogicTick, PartitionId, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub agent: AgentId,
    pub last_seen: LogicTick,
    pub partition: PartitionId,
}

/// Last heartbeat heard from every peer, plus the partitions left without
/// any live member.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatTable {
    records: BTreeMap<AgentId, HeartbeatRecord>,
    orphaned: BTreeSet<PartitionId>,
}

impl HeartbeatTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, agent: AgentId) -> Option<&HeartbeatRecord> {
        self.records.get(&agent)
    }

    pub fn records(&self) -> impl Iterator<Item = &HeartbeatRecord> {
        self.records.values()
    }

    pub fn orphaned(&self) -> &BTreeSet<PartitionId> {
        &self.orphaned
    }

    /// Stores the heartbeat if it is newer than what we have for that agent.
    pub fn observe(&mut self, heartbeat: &Heartbeat) -> bool {
        if let Some(existing) = self.records.get(&heartbeat.agent) {
            if existing.last_seen >= heartbeat.tick {
                return false;
            }
        }

        self.records.insert(
            heartbeat.agent,
            HeartbeatRecord {
                agent: heartbeat.agent,
                last_seen: heartbeat.tick,
                partition: heartbeat.partition,
            },
        );
        self.orphaned.remove(&heartbeat.partition);
        true
    }

    /// Drops every record last seen before `now - timeout`. A partition whose
    /// last live member is dropped becomes orphaned, unless the observer itself
    /// works it.
    pub fn expire(
        &mut self,
        now: LogicTick,
        timeout: LogicTick,
        own_partition: PartitionId,
    ) -> Vec<HeartbeatRecord> {
        let cutoff = now.saturating_sub(timeout);
        let failed: Vec<HeartbeatRecord> = self
            .records
            .values()
            .filter(|r| r.last_seen < cutoff)
            .copied()
            .collect();

        for record in &failed {
            self.records.remove(&record.agent);
        }

        for record in &failed {
            let staffed = record.partition == own_partition
                || self.records.values().any(|r| r.partition == record.partition);
            if !staffed {
                self.orphaned.insert(record.partition);
            }
        }

        failed
    }

    /// Decides whether the observer should move to an orphaned partition.
    ///
    /// The donor is the partition with the most live members (the observer
    /// included), ties going to the lower partition id, and it must keep at
    /// least one member after giving one up. Only the lowest-id member of the
    /// donor moves, to the lowest orphaned partition id.
    pub fn redistribution(&self, self_id: AgentId, own_partition: PartitionId) -> Option<PartitionId> {
        let target = *self.orphaned.iter().next()?;

        let mut members: BTreeMap<PartitionId, BTreeSet<AgentId>> = BTreeMap::new();
        for record in self.records.values() {
            members.entry(record.partition).or_default().insert(record.agent);
        }
        members.entry(own_partition).or_default().insert(self_id);

        let (donor, donor_members) = members
            .iter()
            .max_by(|(pa, a), (pb, b)| a.len().cmp(&b.len()).then(pb.cmp(pa)))?;

        if *donor != own_partition || donor_members.len() < 2 {
            return None;
        }
        if donor_members.iter().next() != Some(&self_id) {
            return None;
        }
        Some(target)
    }

    pub fn claim(&mut self, partition: PartitionId) {
        self.orphaned.remove(&partition);
    }
}

/// Broadcasts this agent's heartbeat every tick, tracks peers, and moves
/// the agent to an orphaned partition when it is the designated donor.
pub struct HeartbeatComponent {
    table: HeartbeatTable,
    timeout: LogicTick,
}

impl HeartbeatComponent {
    pub fn new(timeout: LogicTick) -> Self {
        Self {
            table: HeartbeatTable::new(),
            timeout,
        }
    }

    pub fn from_config(config: &HeartbeatConfig) -> Self {
        Self::new(config.timeout_ticks)
    }

    pub fn table(&self) -> &HeartbeatTable {
        &self.table
    }

    /// Offset by the observer's id so simultaneous detections spread out.
    pub fn effective_timeout(&self, self_id: AgentId) -> LogicTick {
        self.timeout + LogicTick::from(self_id)
    }
}

impl Component for HeartbeatComponent {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn priority(&self) -> Priority {
        Priority::uniform(Priority::HEARTBEAT)
    }

    fn pre_update(&mut self, ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        for message in ctx.inbox {
            if let Payload::Heartbeat(heartbeat) = &message.payload {
                if heartbeat.agent != ctx.agent_id {
                    self.table.observe(heartbeat);
                }
            }
        }

        let timeout = self.effective_timeout(ctx.agent_id);
        for failed in self.table.expire(ctx.tick, timeout, *ctx.partition) {
            log::info!(
                "agent {} declares agent {} failed (partition {}, last seen tick {})",
                ctx.agent_id,
                failed.agent,
                failed.partition,
                failed.last_seen
            );
        }

        if let Some(target) = self.table.redistribution(ctx.agent_id, *ctx.partition) {
            log::info!(
                "agent {} moves from partition {} to orphaned partition {}",
                ctx.agent_id,
                *ctx.partition,
                target
            );
            *ctx.partition = target;
            self.table.claim(target);
        }

        ctx.outbox.broadcast(Payload::Heartbeat(Heartbeat {
            agent: ctx.agent_id,
            tick: ctx.tick,
            partition: *ctx.partition,
        }));
        Ok(WaitCondition::next_tick())
    }

    fn post_update(&mut self, _ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        Ok(WaitCondition::parked())
    }

    fn take_children(&mut self) -> Vec<Box<dyn Component>> {
        Vec::new()
    }

    fn debug_dump(&self) -> Option<String> {
        let peers: Vec<String> = self
            .table
            .records()
            .map(|r| format!("{}@{}#p{}", r.agent, r.last_seen, r.partition))
            .collect();
        Some(format!(
            "peers=[{}] orphaned={:?}",
            peers.join(", "),
            self.table.orphaned()
        ))
    }
}
