use anyhow::Result;
use rand::rngs::StdRng;

use super::wait::WaitCondition;
use crate::providers::motion::Body;
use crate::types::{AgentId, LogicTick, Message, Outbox, PartitionId, SwarmContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

impl Phase {
    pub fn as_str(&self) -> &str {
        match self {
            Phase::Pre => "pre-update",
            Phase::Post => "post-update",
        }
    }
}

/// Ordering keys for the two phases. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub pre: i32,
    pub post: i32,
}

impl Priority {
    pub const STIGMERGY: i32 = -1000;
    pub const HEARTBEAT: i32 = -900;
    pub const BOOTSTRAP: i32 = -800;
    pub const COLLISION: i32 = -100;
    pub const APPLICATION: i32 = 0;
    pub const NEGOTIATION: i32 = 100;

    pub const fn new(pre: i32, post: i32) -> Self {
        Self { pre, post }
    }

    pub const fn uniform(value: i32) -> Self {
        Self::new(value, value)
    }

    pub fn for_phase(&self, phase: Phase) -> i32 {
        match phase {
            Phase::Pre => self.pre,
            Phase::Post => self.post,
        }
    }
}

/// Everything a component may touch during one step of one agent's tick.
pub struct StepContext<'a> {
    pub agent_id: AgentId,
    pub tick: LogicTick,
    /// Broadcasts delivered to this agent at the start of the tick.
    pub inbox: &'a [Message],
    pub outbox: &'a mut Outbox,
    pub body: &'a mut dyn Body,
    pub partition: &'a mut PartitionId,
    pub swarm: &'a SwarmContext,
    pub rng: &'a mut StdRng,
    /// True while some component of this agent is inside a multi-step maneuver.
    pub maneuvering: bool,
}

/// A unit of per-agent behavior driven by the tick scheduler.
///
/// Each phase method runs one step of the component's logic and returns the
/// condition under which that phase should be resumed. Components that do not
/// use a phase return [`WaitCondition::parked`] from it.
pub trait Component {
    /// Unique per agent.
    fn name(&self) -> &str;
    fn priority(&self) -> Priority;
    fn pre_update(&mut self, ctx: &mut StepContext<'_>) -> Result<WaitCondition>;
    fn post_update(&mut self, ctx: &mut StepContext<'_>) -> Result<WaitCondition>;
    /// Components created since the last call, to be registered with the same scheduler.
    fn take_children(&mut self) -> Vec<Box<dyn Component>>;
    fn debug_dump(&self) -> Option<String>;
}
