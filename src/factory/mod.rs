use anyhow::Result;
use std::collections::BTreeSet;

use crate::capabilities::{ExplorerComponent, PartitionPlan, VisitMark};
use crate::config::SwarmConfig;
use crate::engine::SwarmAgent;
use crate::lifecycle::{BootstrapComponent, BootstrapHandle, HeartbeatComponent};
use crate::negotiation::{CollisionRecovery, TargetRaceComponent, TargetTask, VisitLog};
use crate::providers::map::GridMap;
use crate::providers::simulated::{Occupancy, SimulatedBody};
use crate::storage::VirtualStigmergy;
use crate::types::{AgentId, PartitionId, TilePos};

/// Shared handles into the components of an explorer agent.
#[derive(Clone)]
pub struct AgentHandles {
    pub task: TargetTask,
    pub visits: VisitLog,
    pub visited: VirtualStigmergy<VisitMark>,
    pub plan: BootstrapHandle<PartitionPlan>,
}

pub struct SpawnedAgent {
    pub agent: SwarmAgent,
    pub handles: AgentHandles,
}

/// Builds simulated agents on one map, all sharing the same occupancy grid.
pub struct AgentFactory {
    config: SwarmConfig,
    map: GridMap,
    occupancy: Occupancy,
    partitions: u32,
}

impl AgentFactory {
    pub fn new(config: SwarmConfig, map: GridMap, partitions: u32) -> Self {
        Self {
            config,
            map,
            occupancy: Occupancy::new(),
            partitions: partitions.max(1),
        }
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn occupancy(&self) -> Occupancy {
        self.occupancy.clone()
    }

    /// An agent with a body and no components.
    pub fn bare(&self, id: AgentId, start: TilePos, partition: PartitionId) -> SwarmAgent {
        let body = SimulatedBody::new(id, start, self.map.clone(), self.occupancy.clone());
        SwarmAgent::new(id, Box::new(body), partition, self.config.transport.seed)
    }

    /// An agent running the full stack: heartbeats, bootstrap, collision
    /// recovery, the explorer and the target race.
    pub fn explorer(&self, id: AgentId, start: TilePos) -> Result<SpawnedAgent> {
        let partitions = self.partitions;
        let bootstrap = BootstrapComponent::from_config(
            &self.config.bootstrap,
            move |agents: &BTreeSet<AgentId>| PartitionPlan::round_robin(agents, partitions),
        );
        let plan = bootstrap.handle();
        let task = TargetTask::new();
        let visits = VisitLog::new();

        let explorer = ExplorerComponent::new(id, plan.clone(), task.clone(), visits.clone())?;
        let handles = AgentHandles {
            task: task.clone(),
            visits: visits.clone(),
            visited: explorer.visited(),
            plan,
        };

        let agent = self
            .bare(id, start, 0)
            .with_component(Box::new(HeartbeatComponent::from_config(&self.config.heartbeat)))?
            .with_component(Box::new(bootstrap))?
            .with_component(Box::new(CollisionRecovery::new(
                self.config.collision.clone(),
                task.clone(),
                visits,
            )))?
            .with_component(Box::new(explorer))?
            .with_component(Box::new(TargetRaceComponent::new(task)))?;

        Ok(SpawnedAgent { agent, handles })
    }
}
