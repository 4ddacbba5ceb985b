use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::agent::SwarmAgent;
use crate::transport::Transport;
use crate::types::{AgentId, LogicTick, Message, SwarmContext};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: LogicTick,
    pub broadcasts: usize,
    pub halted: Vec<AgentId>,
}

/// Drives every agent once per logic tick over a shared transport.
pub struct Simulation {
    tick: LogicTick,
    swarm: SwarmContext,
    agents: BTreeMap<AgentId, SwarmAgent>,
    halted: BTreeSet<AgentId>,
    transport: Box<dyn Transport>,
}

impl Simulation {
    pub fn new(swarm: SwarmContext, transport: Box<dyn Transport>) -> Self {
        Self {
            tick: 0,
            swarm,
            agents: BTreeMap::new(),
            halted: BTreeSet::new(),
            transport,
        }
    }

    pub fn tick(&self) -> LogicTick {
        self.tick
    }

    pub fn swarm(&self) -> &SwarmContext {
        &self.swarm
    }

    pub fn add_agent(&mut self, agent: SwarmAgent) -> Result<()> {
        if self.agents.contains_key(&agent.id()) {
            bail!("agent {} is already part of the simulation", agent.id());
        }
        self.halted.remove(&agent.id());
        self.agents.insert(agent.id(), agent);
        Ok(())
    }

    /// Takes an agent out of the swarm, as if it had crashed or left radio range for good.
    pub fn remove_agent(&mut self, id: AgentId) -> Option<SwarmAgent> {
        self.halted.remove(&id);
        self.agents.remove(&id)
    }

    pub fn agent(&self, id: AgentId) -> Option<&SwarmAgent> {
        self.agents.get(&id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &SwarmAgent> {
        self.agents.values()
    }

    pub fn is_halted(&self, id: AgentId) -> bool {
        self.halted.contains(&id)
    }

    /// Advances one logic tick. Agents tick in ascending id order; an agent
    /// whose tick fails is halted and skipped from then on.
    pub fn step(&mut self) -> TickSummary {
        self.tick += 1;
        self.transport.advance();

        let mut summary = TickSummary {
            tick: self.tick,
            ..Default::default()
        };

        for (id, agent) in self.agents.iter_mut() {
            if self.halted.contains(id) {
                continue;
            }

            let inbox = self.transport.receive(*id, agent.position());
            let position = agent.position();
            match agent.tick(self.tick, &self.swarm, &inbox) {
                Ok(payloads) => {
                    summary.broadcasts += payloads.len();
                    for payload in payloads {
                        self.transport
                            .broadcast(Message::new(*id, position, payload));
                    }
                }
                Err(e) => {
                    log::error!("agent {} halted at tick {}: {:#}", id, self.tick, e);
                    summary.halted.push(*id);
                }
            }
        }

        self.halted.extend(summary.halted.iter().copied());
        summary
    }

    pub fn run(&mut self, ticks: u64) -> Vec<TickSummary> {
        (0..ticks).map(|_| self.step()).collect()
    }

    pub fn run_until(&mut self, tick: LogicTick) {
        while self.tick < tick {
            self.step();
        }
    }

    /// Same as [`Simulation::run`] but yields to the runtime between ticks.
    pub async fn run_paced(&mut self, ticks: u64, interval: Duration) -> Vec<TickSummary> {
        let mut summaries = Vec::with_capacity(ticks as usize);
        for _ in 0..ticks {
            summaries.push(self.step());
            tokio::time::sleep(interval).await;
        }
        summaries
    }
}
