use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::component::{Component, StepContext};
use super::scheduler::{TickReport, TickScheduler};
use crate::providers::motion::Body;
use crate::types::{AgentId, LogicTick, Message, Outbox, PartitionId, Payload, SwarmContext, TilePos};

/// One member of the swarm: its body, its partition assignment, and the
/// components the scheduler drives for it.
pub struct SwarmAgent {
    id: AgentId,
    body: Box<dyn Body>,
    partition: PartitionId,
    scheduler: TickScheduler,
    rng: StdRng,
    last_report: TickReport,
}

impl SwarmAgent {
    pub fn new(id: AgentId, body: Box<dyn Body>, partition: PartitionId, seed: u64) -> Self {
        Self {
            id,
            body,
            partition,
            scheduler: TickScheduler::new(),
            rng: StdRng::seed_from_u64(seed ^ u64::from(id).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            last_report: TickReport::default(),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn position(&self) -> TilePos {
        self.body.current_tile()
    }

    pub fn body(&self) -> &dyn Body {
        self.body.as_ref()
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    pub fn last_report(&self) -> TickReport {
        self.last_report
    }

    pub fn register(&mut self, component: Box<dyn Component>) -> Result<()> {
        self.scheduler.register(component, 0)
    }

    pub fn with_component(mut self, component: Box<dyn Component>) -> Result<Self> {
        self.register(component)?;
        Ok(self)
    }

    /// Runs both scheduler phases for `now` against this tick's inbox and
    /// returns the broadcasts queued along the way. Physics advances after the
    /// components have issued their commands.
    pub fn tick(
        &mut self,
        now: LogicTick,
        swarm: &SwarmContext,
        inbox: &[Message],
    ) -> Result<Vec<Payload>> {
        let mut outbox = Outbox::new();
        let mut ctx = StepContext {
            agent_id: self.id,
            tick: now,
            inbox,
            outbox: &mut outbox,
            body: self.body.as_mut(),
            partition: &mut self.partition,
            swarm,
            rng: &mut self.rng,
            maneuvering: false,
        };

        self.last_report = self.scheduler.run_tick(&mut ctx)?;
        self.body.step_physics();
        Ok(outbox.into_payloads())
    }
}
