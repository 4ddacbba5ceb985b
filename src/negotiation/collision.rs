use anyhow::Result;
use rand::seq::IndexedRandom;
use std::collections::{BTreeMap, BTreeSet};

use super::{TargetTask, VisitLog};
use crate::config::CollisionConfig;
use crate::engine::{Component, Priority, StepContext, WaitCondition};
use crate::types::{AgentId, CollisionReport, MotionStatus, Payload, TilePos};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Watching,
    Negotiating,
    Reversing,
    Reversed,
    Rotated,
}

/// Physical contact recovery: halt, back off, rotate if still stuck, then
/// retry the target. With negotiation on, colliding agents also swap visit
/// logs and every agent except the lowest id present picks a nearby
/// alternate target.
pub struct CollisionRecovery {
    config: CollisionConfig,
    task: TargetTask,
    visits: VisitLog,
    stage: Stage,
    original: Option<TilePos>,
    retarget: Option<TilePos>,
    recoveries: u64,
}

impl CollisionRecovery {
    pub fn new(config: CollisionConfig, task: TargetTask, visits: VisitLog) -> Self {
        Self {
            config,
            task,
            visits,
            stage: Stage::Watching,
            original: None,
            retarget: None,
            recoveries: 0,
        }
    }

    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    fn halt(&mut self, ctx: &mut StepContext<'_>) -> WaitCondition {
        ctx.body.stop_current_task();
        self.original = self.task.current();
        self.retarget = None;
        self.recoveries += 1;
        log::debug!(
            "agent {} collided at {} heading for {:?}",
            ctx.agent_id,
            ctx.body.current_tile(),
            self.original
        );

        if self.config.negotiate {
            ctx.outbox.broadcast(Payload::Collision(CollisionReport {
                agent: ctx.agent_id,
                partition: *ctx.partition,
                target: self.original,
                visited: self.visits.entries(),
            }));
            self.stage = Stage::Negotiating;
            return WaitCondition::ticks(1).in_maneuver();
        }

        self.stage = Stage::Reversing;
        WaitCondition::status(MotionStatus::Idle).in_maneuver()
    }

    fn negotiate(&mut self, ctx: &mut StepContext<'_>) {
        let here = ctx.body.current_tile();
        let inbox = ctx.inbox;

        // Anyone heard from within reach counts as present, reporting or not.
        let mut present: BTreeMap<AgentId, TilePos> = BTreeMap::new();
        let mut reports: Vec<&CollisionReport> = Vec::new();
        for message in inbox {
            if message.position.distance_to(&here) > self.config.contact_radius {
                continue;
            }
            present.insert(message.sender, message.position);
            if let Payload::Collision(report) = &message.payload {
                reports.push(report);
            }
        }

        for report in &reports {
            self.visits.merge(&report.visited);
        }

        let lowest = present
            .keys()
            .copied()
            .chain(std::iter::once(ctx.agent_id))
            .min()
            .unwrap_or(ctx.agent_id);
        if lowest == ctx.agent_id {
            return;
        }

        let Some(target) = self.original else {
            return;
        };

        let mut avoid: BTreeSet<TilePos> = BTreeSet::from([here, target]);
        avoid.extend(present.values().copied());
        for report in &reports {
            avoid.extend(report.target);
        }

        let open: Vec<TilePos> = ctx
            .swarm
            .map
            .neighbors(&target)
            .into_iter()
            .filter(|tile| !avoid.contains(tile))
            .collect();
        let own: Vec<TilePos> = open
            .iter()
            .copied()
            .filter(|tile| ctx.swarm.partition_of(tile) == Some(*ctx.partition))
            .collect();
        let candidates = if own.is_empty() { open } else { own };

        match candidates.choose(&mut *ctx.rng) {
            Some(alternate) => {
                log::debug!(
                    "agent {} yields {} to agent {} and heads for {}",
                    ctx.agent_id,
                    target,
                    lowest,
                    alternate
                );
                self.retarget = Some(*alternate);
            }
            None => log::debug!(
                "agent {} has no alternate around {}; keeping it",
                ctx.agent_id,
                target
            ),
        }
    }

    fn reverse(&mut self, ctx: &mut StepContext<'_>) -> WaitCondition {
        ctx.body.move_by(self.config.reverse_distance, true);
        self.stage = Stage::Reversed;
        WaitCondition::status(MotionStatus::Idle).in_maneuver()
    }

    fn retry(&mut self, ctx: &mut StepContext<'_>) -> WaitCondition {
        if let Some(target) = self.retarget.take().or(self.original) {
            log::debug!("agent {} retries towards {}", ctx.agent_id, target);
            self.task.assign(target);
        }
        self.original = None;
        self.stage = Stage::Watching;
        WaitCondition::next_tick()
    }
}

impl Component for CollisionRecovery {
    fn name(&self) -> &str {
        "collision"
    }

    fn priority(&self) -> Priority {
        Priority::uniform(Priority::COLLISION)
    }

    fn pre_update(&mut self, ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        let wait = match self.stage {
            Stage::Watching if ctx.body.is_colliding() => self.halt(ctx),
            Stage::Watching => WaitCondition::next_tick(),
            Stage::Negotiating => {
                self.negotiate(ctx);
                self.reverse(ctx)
            }
            Stage::Reversing => self.reverse(ctx),
            Stage::Reversed if ctx.body.is_colliding() => {
                ctx.body.rotate(self.config.rotate_angle_degrees);
                self.stage = Stage::Rotated;
                WaitCondition::status(MotionStatus::Idle).in_maneuver()
            }
            Stage::Reversed | Stage::Rotated => self.retry(ctx),
        };
        Ok(wait)
    }

    fn post_update(&mut self, _ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        Ok(WaitCondition::parked())
    }

    fn take_children(&mut self) -> Vec<Box<dyn Component>> {
        Vec::new()
    }

    fn debug_dump(&self) -> Option<String> {
        Some(format!(
            "stage={:?} recoveries={} retarget={:?}",
            self.stage, self.recoveries, self.retarget
        ))
    }
}
