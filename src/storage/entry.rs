use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::AgentId;

/// Anything storable in a stigmergy replica. Values are owned and cross the
/// wire as JSON, so replicas never share mutable state.
pub trait StigmergyValue: Clone + PartialEq + Serialize + DeserializeOwned + 'static {}

impl<T> StigmergyValue for T where T: Clone + PartialEq + Serialize + DeserializeOwned + 'static {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StigmergyEntry<V> {
    pub value: V,
    pub timestamp: u64,
    pub owner: AgentId,
}

impl<V> StigmergyEntry<V> {
    pub fn new(value: V, timestamp: u64, owner: AgentId) -> Self {
        Self {
            value,
            timestamp,
            owner,
        }
    }
}

/// Picks the winner between two entries for the same key written with the
/// same timestamp by different agents.
///
/// Must be pure and symmetric: every replica that sees both entries has to
/// pick the same one no matter which of them it held first.
pub trait ConflictResolver<V>: Send + Sync {
    fn resolve(
        &self,
        key: &str,
        local: &StigmergyEntry<V>,
        remote: &StigmergyEntry<V>,
    ) -> StigmergyEntry<V>;
}

impl<V, F> ConflictResolver<V> for F
where
    F: Fn(&str, &StigmergyEntry<V>, &StigmergyEntry<V>) -> StigmergyEntry<V> + Send + Sync,
{
    fn resolve(
        &self,
        key: &str,
        local: &StigmergyEntry<V>,
        remote: &StigmergyEntry<V>,
    ) -> StigmergyEntry<V> {
        self(key, local, remote)
    }
}

/// The entry written by the lower agent id wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestOwnerWins;

impl<V: Clone> ConflictResolver<V> for LowestOwnerWins {
    fn resolve(
        &self,
        _key: &str,
        local: &StigmergyEntry<V>,
        remote: &StigmergyEntry<V>,
    ) -> StigmergyEntry<V> {
        if remote.owner < local.owner {
            remote.clone()
        } else {
            local.clone()
        }
    }
}
