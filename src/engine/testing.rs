//! Single-component step driver for unit tests.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::component::{Component, StepContext};
use super::wait::WaitCondition;
use crate::providers::map::GridMap;
use crate::providers::simulated::{Occupancy, SimulatedBody};
use crate::types::{AgentId, LogicTick, Message, Outbox, PartitionId, Payload, SwarmContext, TilePos};

pub(crate) struct StepHarness {
    pub agent_id: AgentId,
    pub body: SimulatedBody,
    pub occupancy: Occupancy,
    pub swarm: SwarmContext,
    pub rng: StdRng,
    pub partition: PartitionId,
    pub outbox: Outbox,
    pub maneuvering: bool,
}

impl StepHarness {
    pub fn new(agent_id: AgentId, start: TilePos, map: GridMap, partitions: u32) -> Self {
        let occupancy = Occupancy::new();
        Self {
            agent_id,
            body: SimulatedBody::new(agent_id, start, map.clone(), occupancy.clone()),
            occupancy,
            swarm: SwarmContext::striped(map, partitions),
            rng: StdRng::seed_from_u64(u64::from(agent_id)),
            partition: 0,
            outbox: Outbox::new(),
            maneuvering: false,
        }
    }

    pub fn pre(
        &mut self,
        component: &mut dyn Component,
        tick: LogicTick,
        inbox: &[Message],
    ) -> Result<WaitCondition> {
        let mut ctx = self.context(tick, inbox);
        component.pre_update(&mut ctx)
    }

    pub fn post(
        &mut self,
        component: &mut dyn Component,
        tick: LogicTick,
        inbox: &[Message],
    ) -> Result<WaitCondition> {
        let mut ctx = self.context(tick, inbox);
        component.post_update(&mut ctx)
    }

    pub fn drain(&mut self) -> Vec<Payload> {
        std::mem::take(&mut self.outbox).into_payloads()
    }

    fn context<'a>(&'a mut self, tick: LogicTick, inbox: &'a [Message]) -> StepContext<'a> {
        StepContext {
            agent_id: self.agent_id,
            tick,
            inbox,
            outbox: &mut self.outbox,
            body: &mut self.body,
            partition: &mut self.partition,
            swarm: &self.swarm,
            rng: &mut self.rng,
            maneuvering: self.maneuvering,
        }
    }
}
