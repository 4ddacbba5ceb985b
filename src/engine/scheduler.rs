use anyhow::{bail, Context, Result};

use super::component::{Component, Phase, Priority, StepContext};
use super::wait::WaitCondition;
use crate::types::LogicTick;

#[derive(Debug, Clone, Copy)]
struct Resume {
    wait: WaitCondition,
    since: LogicTick,
}

struct Slot {
    component: Box<dyn Component>,
    priority: Priority,
    pre: Resume,
    post: Resume,
}

impl Slot {
    fn resume(&self, phase: Phase) -> Resume {
        match phase {
            Phase::Pre => self.pre,
            Phase::Post => self.post,
        }
    }

    fn set_resume(&mut self, phase: Phase, resume: Resume) {
        match phase {
            Phase::Pre => self.pre = resume,
            Phase::Post => self.post = resume,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub steps: usize,
    pub spawned: usize,
}

/// Cooperative two-phase scheduler for the components of one agent.
#[derive(Default)]
pub struct TickScheduler {
    slots: Vec<Slot>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component; it becomes eligible in the next phase that starts.
    pub fn register(&mut self, component: Box<dyn Component>, now: LogicTick) -> Result<()> {
        if self
            .slots
            .iter()
            .any(|slot| slot.component.name() == component.name())
        {
            bail!("component `{}` is already registered", component.name());
        }

        let ready = Resume {
            wait: WaitCondition::immediately(),
            since: now,
        };
        self.slots.push(Slot {
            priority: component.priority(),
            component,
            pre: ready,
            post: ready,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn component_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| slot.component.name().to_string())
            .collect()
    }

    pub fn maneuvering(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.pre.wait.maneuver || slot.post.wait.maneuver)
    }

    pub fn debug_dump(&self) -> Vec<(String, String)> {
        self.slots
            .iter()
            .filter_map(|slot| {
                slot.component
                    .debug_dump()
                    .map(|dump| (slot.component.name().to_string(), dump))
            })
            .collect()
    }

    /// Runs the pre-update phase, then the post-update phase. The first failing
    /// step aborts the rest of the tick.
    pub fn run_tick(&mut self, ctx: &mut StepContext<'_>) -> Result<TickReport> {
        let mut report = TickReport::default();
        self.run_phase(Phase::Pre, ctx, &mut report)?;
        self.run_phase(Phase::Post, ctx, &mut report)?;
        Ok(report)
    }

    fn run_phase(
        &mut self,
        phase: Phase,
        ctx: &mut StepContext<'_>,
        report: &mut TickReport,
    ) -> Result<()> {
        let mut order: Vec<usize> = (0..self.slots.len()).collect();
        order.sort_by_key(|&index| self.slots[index].priority.for_phase(phase));

        for index in order {
            let status = ctx.body.status();
            let resume = self.slots[index].resume(phase);
            if !resume.wait.is_satisfied(resume.since, ctx.tick, status) {
                continue;
            }

            ctx.maneuvering = self.maneuvering();
            let slot = &mut self.slots[index];
            let wait = match phase {
                Phase::Pre => slot.component.pre_update(ctx),
                Phase::Post => slot.component.post_update(ctx),
            }
            .with_context(|| {
                format!(
                    "agent {} component `{}` failed during {} at tick {}",
                    ctx.agent_id,
                    slot.component.name(),
                    phase.as_str(),
                    ctx.tick
                )
            })?;

            log::trace!(
                "agent {} tick {} {} `{}` -> {:?}",
                ctx.agent_id,
                ctx.tick,
                phase.as_str(),
                slot.component.name(),
                wait
            );

            slot.set_resume(
                phase,
                Resume {
                    wait,
                    since: ctx.tick,
                },
            );
            report.steps += 1;

            let children = slot.component.take_children();
            for child in children {
                self.register(child, ctx.tick)?;
                report.spawned += 1;
            }
        }

        Ok(())
    }
}
