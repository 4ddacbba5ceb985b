use anyhow::Result;

use super::{TargetOutcome, TargetTask};
use crate::engine::{Component, Priority, StepContext, WaitCondition};
use crate::types::{MotionStatus, Payload, TargetClaim, TilePos};

/// Distance at which an idle body counts as standing on its target.
const ARRIVAL_RADIUS: f32 = 0.5;

/// Whether an agent at `own` distance gives way to a rival claim at `rival`.
///
/// Strictly closer rivals win. Equal distances do not yield on either side,
/// so two agents can keep insisting on the same target.
pub fn yields_to(own: f32, rival: f32) -> bool {
    rival < own
}

/// Races peers for the target in a [`TargetTask`]: claims it every tick while
/// approaching and abandons it when a peer reports being strictly closer.
pub struct TargetRaceComponent {
    task: TargetTask,
    target: Option<TilePos>,
}

impl TargetRaceComponent {
    pub fn new(task: TargetTask) -> Self {
        Self { task, target: None }
    }

    pub fn task(&self) -> TargetTask {
        self.task.clone()
    }

    fn begin(&mut self, ctx: &mut StepContext<'_>, tile: TilePos) {
        if ctx.body.path_and_move_to(tile) {
            self.target = Some(tile);
            self.task.set_outcome(TargetOutcome::Approaching(tile));
        } else {
            log::warn!("agent {} has no path to target {}", ctx.agent_id, tile);
            self.target = None;
            self.task.set_outcome(TargetOutcome::Unreachable(tile));
        }
    }

    fn closer_rival(&self, ctx: &StepContext<'_>, target: TilePos, own: f32) -> Option<TargetClaim> {
        ctx.inbox
            .iter()
            .filter_map(|message| match &message.payload {
                Payload::TargetClaim(claim) if claim.target == target => Some(*claim),
                _ => None,
            })
            .filter(|claim| yields_to(own, claim.distance))
            .min_by(|a, b| a.distance.total_cmp(&b.distance).then(a.agent.cmp(&b.agent)))
    }
}

impl Component for TargetRaceComponent {
    fn name(&self) -> &str {
        "target-race"
    }

    fn priority(&self) -> Priority {
        Priority::uniform(Priority::NEGOTIATION)
    }

    fn pre_update(&mut self, _ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        Ok(WaitCondition::parked())
    }

    fn post_update(&mut self, ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        if let Some(tile) = self.task.take_request() {
            self.begin(ctx, tile);
        }

        let Some(target) = self.target else {
            return Ok(WaitCondition::next_tick());
        };

        let distance = ctx.body.relative_position_to(target).distance;
        if distance <= ARRIVAL_RADIUS && ctx.body.status() == MotionStatus::Idle {
            log::debug!("agent {} reached target {}", ctx.agent_id, target);
            self.target = None;
            self.task.set_outcome(TargetOutcome::Reached(target));
            return Ok(WaitCondition::next_tick());
        }

        // A collision maneuver owns the body until it finishes.
        if !ctx.maneuvering {
            if let Some(rival) = self.closer_rival(ctx, target, distance) {
                log::info!(
                    "agent {} abandons target {} to agent {} ({:.2} < {:.2})",
                    ctx.agent_id,
                    target,
                    rival.agent,
                    rival.distance,
                    distance
                );
                ctx.body.stop_current_task();
                self.target = None;
                self.task.set_outcome(TargetOutcome::ReachedByOther(target));
                return Ok(WaitCondition::next_tick());
            }
        }

        ctx.outbox.broadcast(Payload::TargetClaim(TargetClaim {
            target,
            distance,
            agent: ctx.agent_id,
        }));
        Ok(WaitCondition::next_tick())
    }

    fn take_children(&mut self) -> Vec<Box<dyn Component>> {
        Vec::new()
    }

    fn debug_dump(&self) -> Option<String> {
        Some(format!("target={:?} outcome={:?}", self.target, self.task.outcome()))
    }
}
