pub mod collision;
pub mod target;

pub use collision::CollisionRecovery;
pub use target::{yields_to, TargetRaceComponent};

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::{LogicTick, TilePos};

/// When each vertex was last visited, as far as this agent knows.
#[derive(Debug, Clone, Default)]
pub struct VisitLog {
    inner: Arc<RwLock<BTreeMap<TilePos, LogicTick>>>,
}

impl VisitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tile: TilePos, tick: LogicTick) {
        let mut visits = self.inner.write();
        let slot = visits.entry(tile).or_insert(tick);
        *slot = (*slot).max(tick);
    }

    /// Keeps the later timestamp per vertex. Returns how many vertices changed.
    pub fn merge(&self, visits: &[(TilePos, LogicTick)]) -> usize {
        let mut own = self.inner.write();
        let mut changed = 0;
        for (tile, tick) in visits {
            match own.get(tile) {
                Some(existing) if existing >= tick => {}
                _ => {
                    own.insert(*tile, *tick);
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn last_visit(&self, tile: &TilePos) -> Option<LogicTick> {
        self.inner.read().get(tile).copied()
    }

    pub fn entries(&self) -> Vec<(TilePos, LogicTick)> {
        self.inner.read().iter().map(|(t, k)| (*t, *k)).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    Idle,
    Approaching(TilePos),
    Reached(TilePos),
    /// A closer peer claimed the same target and this agent gave it up.
    ReachedByOther(TilePos),
    /// The path planner found no way to the target.
    Unreachable(TilePos),
}

impl TargetOutcome {
    pub fn target(&self) -> Option<TilePos> {
        match self {
            TargetOutcome::Idle => None,
            TargetOutcome::Approaching(t)
            | TargetOutcome::Reached(t)
            | TargetOutcome::ReachedByOther(t)
            | TargetOutcome::Unreachable(t) => Some(*t),
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, TargetOutcome::Idle | TargetOutcome::Approaching(_))
    }
}

#[derive(Debug)]
struct TaskSlot {
    requested: Option<TilePos>,
    outcome: TargetOutcome,
}

/// Shared slot between whoever picks targets and the component that races for them.
#[derive(Debug, Clone)]
pub struct TargetTask {
    inner: Arc<RwLock<TaskSlot>>,
}

impl Default for TargetTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetTask {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(TaskSlot {
                requested: None,
                outcome: TargetOutcome::Idle,
            })),
        }
    }

    /// Requests a (re)approach; picked up by the race component in its next step.
    pub fn assign(&self, tile: TilePos) {
        self.inner.write().requested = Some(tile);
    }

    pub fn outcome(&self) -> TargetOutcome {
        self.inner.read().outcome
    }

    pub fn pending_request(&self) -> Option<TilePos> {
        self.inner.read().requested
    }

    /// The target being approached or waiting to be approached.
    pub fn current(&self) -> Option<TilePos> {
        let slot = self.inner.read();
        match (slot.requested, slot.outcome) {
            (Some(tile), _) => Some(tile),
            (None, TargetOutcome::Approaching(tile)) => Some(tile),
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current().is_some()
    }

    pub fn clear(&self) {
        let mut slot = self.inner.write();
        slot.requested = None;
        slot.outcome = TargetOutcome::Idle;
    }

    pub(crate) fn take_request(&self) -> Option<TilePos> {
        self.inner.write().requested.take()
    }

    pub(crate) fn set_outcome(&self, outcome: TargetOutcome) {
        self.inner.write().outcome = outcome;
    }
}
