use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::engine::{Component, Priority, StepContext, WaitCondition};
use crate::lifecycle::{BootstrapHandle, BootstrapState};
use crate::negotiation::{TargetOutcome, TargetTask, VisitLog};
use crate::storage::{StigmergyUpdate, VirtualStigmergy};
use crate::types::{AgentId, PartitionId, TilePos};

pub const VISITED_CHANNEL: &str = "visited";

/// Leader-computed assignment of agents to partitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub assignments: BTreeMap<AgentId, PartitionId>,
}

impl PartitionPlan {
    /// Deals agents out over `partitions` in ascending id order.
    pub fn round_robin(agents: &BTreeSet<AgentId>, partitions: u32) -> Self {
        let partitions = partitions.max(1);
        let assignments = agents
            .iter()
            .enumerate()
            .map(|(i, agent)| (*agent, i as u32 % partitions))
            .collect();
        Self { assignments }
    }

    pub fn partition_of(&self, agent: AgentId) -> Option<PartitionId> {
        self.assignments.get(&agent).copied()
    }
}

/// Value stored per vertex in the `visited` channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisitMark {
    pub tile: TilePos,
    pub agent: AgentId,
}

/// Sweeps the vertices of the agent's partition one target at a time.
///
/// Waits for the bootstrap plan, then repeatedly hands the nearest vertex
/// nobody is known to have visited to the target race. Visits are published
/// in the `visited` stigmergy channel, whose replica component is spawned as
/// a child on the first step.
pub struct ExplorerComponent {
    plan: BootstrapHandle<PartitionPlan>,
    visited: VirtualStigmergy<VisitMark>,
    updates: UnboundedReceiver<StigmergyUpdate<VisitMark>>,
    child: Option<Box<dyn Component>>,
    task: TargetTask,
    visits: VisitLog,
    assigned: bool,
    explored: usize,
    finished: Option<PartitionId>,
}

impl ExplorerComponent {
    pub fn new(
        owner: AgentId,
        plan: BootstrapHandle<PartitionPlan>,
        task: TargetTask,
        visits: VisitLog,
    ) -> Result<Self> {
        let visited = VirtualStigmergy::with_default_resolver(VISITED_CHANNEL, owner)
            .context("failed to open the visited channel")?;
        let updates = visited.subscribe();
        Ok(Self {
            child: Some(Box::new(visited.component())),
            plan,
            visited,
            updates,
            task,
            visits,
            assigned: false,
            explored: 0,
            finished: None,
        })
    }

    pub fn visited(&self) -> VirtualStigmergy<VisitMark> {
        self.visited.clone()
    }

    pub fn explored(&self) -> usize {
        self.explored
    }

    fn mark_visited(&mut self, ctx: &mut StepContext<'_>, tile: TilePos) {
        self.visits.record(tile, ctx.tick);
        self.visited.put(
            ctx.outbox,
            tile.key(),
            VisitMark {
                tile,
                agent: ctx.agent_id,
            },
        );
        self.explored += 1;
    }

    fn drain_updates(&mut self, ctx: &StepContext<'_>) {
        while let Ok(update) = self.updates.try_recv() {
            self.visits.record(update.entry.value.tile, ctx.tick);
        }
    }

    fn settle_outcome(&mut self, ctx: &mut StepContext<'_>) {
        match self.task.outcome() {
            TargetOutcome::Reached(tile) => {
                self.mark_visited(ctx, tile);
                self.task.clear();
            }
            TargetOutcome::ReachedByOther(tile) | TargetOutcome::Unreachable(tile) => {
                // Someone closer takes it, or nobody can; either way skip it.
                self.visits.record(tile, ctx.tick);
                self.task.clear();
            }
            TargetOutcome::Idle | TargetOutcome::Approaching(_) => {}
        }
    }

    fn next_target(&self, ctx: &StepContext<'_>) -> Option<TilePos> {
        let here = ctx.body.current_tile();
        ctx.swarm
            .vertices_of(*ctx.partition)
            .iter()
            .filter(|tile| self.visits.last_visit(tile).is_none() && !self.visited.has(&tile.key()))
            .min_by_key(|tile| (tile.manhattan(&here), **tile))
            .copied()
    }
}

impl Component for ExplorerComponent {
    fn name(&self) -> &str {
        "explorer"
    }

    fn priority(&self) -> Priority {
        Priority::uniform(Priority::APPLICATION)
    }

    fn pre_update(&mut self, ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        if !self.assigned {
            match self.plan.state() {
                BootstrapState::Pending => return Ok(WaitCondition::next_tick()),
                BootstrapState::Unreachable => return Ok(WaitCondition::parked()),
                BootstrapState::Ready(outcome) => {
                    if let Some(partition) = outcome.value.partition_of(ctx.agent_id) {
                        log::info!(
                            "agent {} explores partition {} of {} agents",
                            ctx.agent_id,
                            partition,
                            outcome.discovered.len()
                        );
                        *ctx.partition = partition;
                    }
                    self.assigned = true;
                }
            }
        }

        self.drain_updates(ctx);
        if ctx.maneuvering {
            return Ok(WaitCondition::next_tick());
        }

        self.settle_outcome(ctx);
        if self.task.is_busy() {
            return Ok(WaitCondition::next_tick());
        }

        match self.next_target(ctx) {
            Some(tile) if tile == ctx.body.current_tile() => self.mark_visited(ctx, tile),
            Some(tile) => {
                // Ask peers to correct us if they already know about this vertex.
                self.visited.try_get(ctx.outbox, &tile.key());
                self.task.assign(tile);
                self.finished = None;
            }
            None if self.finished != Some(*ctx.partition) => {
                log::info!(
                    "agent {} finished partition {} after {} visits",
                    ctx.agent_id,
                    *ctx.partition,
                    self.explored
                );
                self.visited.send_all(ctx.outbox);
                self.finished = Some(*ctx.partition);
            }
            None => {}
        }
        Ok(WaitCondition::next_tick())
    }

    fn post_update(&mut self, _ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        Ok(WaitCondition::parked())
    }

    fn take_children(&mut self) -> Vec<Box<dyn Component>> {
        self.child.take().into_iter().collect()
    }

    fn debug_dump(&self) -> Option<String> {
        Some(format!(
            "explored={} known_visited={} target={:?}",
            self.explored,
            self.visits.len(),
            self.task.current()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::StepHarness;
    use crate::lifecycle::BootstrapComponent;
    use crate::providers::map::GridMap;
    use crate::types::{BootstrapMessage, Message, Payload, StigmergyOp};

    /// A leader-side bootstrap that has already produced `plan` for agent 0.
    fn ready_plan(plan: PartitionPlan) -> BootstrapHandle<PartitionPlan> {
        let mut harness = StepHarness::new(0, TilePos::new(0, 0), GridMap::new(2, 1), 1);
        let mut bootstrap = BootstrapComponent::new(0, 2, move |_| plan);
        let handle = bootstrap.handle();
        harness.pre(&mut bootstrap, 1, &[]).unwrap();
        harness.pre(&mut bootstrap, 2, &[]).unwrap();
        handle
    }

    #[test]
    fn test_round_robin_plan() {
        let agents: BTreeSet<AgentId> = [4, 1, 9].into_iter().collect();
        let plan = PartitionPlan::round_robin(&agents, 2);
        assert_eq!(plan.partition_of(1), Some(0));
        assert_eq!(plan.partition_of(4), Some(1));
        assert_eq!(plan.partition_of(9), Some(0));
        assert_eq!(plan.partition_of(2), None);
    }

    #[test]
    fn test_waits_for_bootstrap() {
        let bootstrap = BootstrapComponent::new(0, 2, |ids: &BTreeSet<AgentId>| {
            PartitionPlan::round_robin(ids, 1)
        });
        let mut explorer =
            ExplorerComponent::new(1, bootstrap.handle(), TargetTask::new(), VisitLog::new())
                .unwrap();
        let mut harness = StepHarness::new(1, TilePos::new(0, 0), GridMap::new(3, 1), 1);

        let wait = harness.pre(&mut explorer, 1, &[]).unwrap();
        assert_eq!(wait, WaitCondition::next_tick());
        assert!(harness.drain().is_empty());
        assert_eq!(explorer.take_children().len(), 1);
        assert!(explorer.take_children().is_empty());
    }

    #[test]
    fn test_unreachable_leader_parks_explorer() {
        let mut bootstrap = BootstrapComponent::new(0, 1, |ids: &BTreeSet<AgentId>| {
            PartitionPlan::round_robin(ids, 1)
        });
        let handle = bootstrap.handle();
        let mut harness = StepHarness::new(1, TilePos::new(0, 0), GridMap::new(3, 1), 1);
        harness.pre(&mut bootstrap, 1, &[]).unwrap();
        harness.pre(&mut bootstrap, 2, &[]).unwrap();
        assert!(handle.is_unreachable());

        let mut explorer =
            ExplorerComponent::new(1, handle, TargetTask::new(), VisitLog::new()).unwrap();
        assert!(harness.pre(&mut explorer, 3, &[]).unwrap().is_parked());
    }

    #[test]
    fn test_applies_plan_and_picks_nearest_vertex() {
        let plan = PartitionPlan {
            assignments: [(0, 1)].into_iter().collect(),
        };
        let task = TargetTask::new();
        let mut explorer =
            ExplorerComponent::new(0, ready_plan(plan), task.clone(), VisitLog::new()).unwrap();

        // Two stripes over a 4x1 map: partition 1 holds (2, 0) and (3, 0).
        let mut harness = StepHarness::new(0, TilePos::new(0, 0), GridMap::new(4, 1), 2);
        harness.pre(&mut explorer, 3, &[]).unwrap();

        assert_eq!(harness.partition, 1);
        assert_eq!(task.pending_request(), Some(TilePos::new(2, 0)));

        let asked: Vec<String> = harness
            .drain()
            .into_iter()
            .filter_map(|payload| match payload {
                Payload::Stigmergy(m) if m.op == StigmergyOp::Get => Some(m.key),
                _ => None,
            })
            .collect();
        assert_eq!(asked, vec![TilePos::new(2, 0).key()]);
    }

    #[test]
    fn test_reached_target_is_published() {
        let plan = PartitionPlan {
            assignments: [(0, 0)].into_iter().collect(),
        };
        let task = TargetTask::new();
        let visits = VisitLog::new();
        let mut explorer =
            ExplorerComponent::new(0, ready_plan(plan), task.clone(), visits.clone()).unwrap();
        let mut harness = StepHarness::new(0, TilePos::new(0, 0), GridMap::new(2, 1), 1);

        // Standing on an unvisited vertex counts as visiting it.
        harness.pre(&mut explorer, 3, &[]).unwrap();
        assert_eq!(visits.last_visit(&TilePos::new(0, 0)), Some(3));
        harness.drain();

        harness.pre(&mut explorer, 4, &[]).unwrap();
        assert_eq!(task.pending_request(), Some(TilePos::new(1, 0)));
        task.take_request();
        task.set_outcome(TargetOutcome::Reached(TilePos::new(1, 0)));

        harness.pre(&mut explorer, 5, &[]).unwrap();
        assert_eq!(explorer.explored(), 2);
        assert!(explorer.visited().has("1,0"));
        assert!(!task.is_busy());
    }

    #[test]
    fn test_peer_visits_are_skipped() {
        let plan = PartitionPlan {
            assignments: [(0, 0)].into_iter().collect(),
        };
        let task = TargetTask::new();
        let mut explorer =
            ExplorerComponent::new(0, ready_plan(plan), task.clone(), VisitLog::new()).unwrap();
        let peer = VirtualStigmergy::with_default_resolver(VISITED_CHANNEL, 5).unwrap();
        let mut peer_outbox = crate::types::Outbox::new();
        peer.put(
            &mut peer_outbox,
            TilePos::new(1, 0).key(),
            VisitMark {
                tile: TilePos::new(1, 0),
                agent: 5,
            },
        );
        for payload in peer_outbox.into_payloads() {
            if let Payload::Stigmergy(message) = payload {
                explorer.visited().receive(&message, &mut crate::types::Outbox::new());
            }
        }

        let mut harness = StepHarness::new(0, TilePos::new(1, 0), GridMap::new(3, 1), 1);
        harness.pre(&mut explorer, 3, &[]).unwrap();

        // (1, 0) is known visited, so the nearest candidate is (0, 0).
        assert_eq!(task.pending_request(), Some(TilePos::new(0, 0)));
    }

    #[test]
    fn test_follower_plan_from_leader_message() {
        let mut bootstrap = BootstrapComponent::new(0, 2, |ids: &BTreeSet<AgentId>| {
            PartitionPlan::round_robin(ids, 2)
        });
        let handle = bootstrap.handle();
        let mut harness = StepHarness::new(3, TilePos::new(0, 0), GridMap::new(4, 1), 2);
        harness.pre(&mut bootstrap, 1, &[]).unwrap();

        let plan = PartitionPlan {
            assignments: [(0, 0), (3, 1)].into_iter().collect(),
        };
        let outcome = Message::new(
            0,
            TilePos::new(3, 0),
            Payload::Bootstrap(BootstrapMessage::Outcome {
                value: serde_json::to_value(&plan).unwrap(),
                discovered: [0, 3].into_iter().collect(),
            }),
        );
        harness.pre(&mut bootstrap, 2, &[outcome]).unwrap();

        let mut explorer =
            ExplorerComponent::new(3, handle, TargetTask::new(), VisitLog::new()).unwrap();
        harness.pre(&mut explorer, 3, &[]).unwrap();
        assert_eq!(harness.partition, 1);
    }
}
