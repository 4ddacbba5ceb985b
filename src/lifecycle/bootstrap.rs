use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::BootstrapConfig;
use crate::engine::{Component, Priority, StepContext, WaitCondition};
use crate::types::{AgentId, BootstrapMessage, LogicTick, Payload};

#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapOutcome<T> {
    pub value: T,
    pub discovered: BTreeSet<AgentId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapState<T> {
    Pending,
    Ready(BootstrapOutcome<T>),
    /// The leader's outcome never arrived; the agent stays parked.
    Unreachable,
}

/// Read-only view of the bootstrap result for downstream components.
pub struct BootstrapHandle<T> {
    inner: Arc<RwLock<BootstrapState<T>>>,
}

impl<T> Clone for BootstrapHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> BootstrapHandle<T> {
    pub fn state(&self) -> BootstrapState<T> {
        self.inner.read().clone()
    }

    pub fn outcome(&self) -> Option<BootstrapOutcome<T>> {
        match &*self.inner.read() {
            BootstrapState::Ready(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(&*self.inner.read(), BootstrapState::Unreachable)
    }

    fn set(&self, state: BootstrapState<T>) {
        *self.inner.write() = state;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Start,
    Collecting,
    Awaiting { deadline: LogicTick },
    Finished,
}

type Factory<T> = Box<dyn FnOnce(&BTreeSet<AgentId>) -> T>;

/// One-shot leader computation: followers announce themselves, the leader
/// computes a value once from everyone it heard and broadcasts it back.
pub struct BootstrapComponent<T> {
    leader: AgentId,
    reply_window: LogicTick,
    factory: Option<Factory<T>>,
    stage: Stage,
    handle: BootstrapHandle<T>,
}

impl<T> BootstrapComponent<T>
where
    T: Clone + Serialize + DeserializeOwned + 'static,
{
    pub fn new(
        leader: AgentId,
        reply_window: LogicTick,
        factory: impl FnOnce(&BTreeSet<AgentId>) -> T + 'static,
    ) -> Self {
        Self {
            leader,
            reply_window,
            factory: Some(Box::new(factory)),
            stage: Stage::Start,
            handle: BootstrapHandle {
                inner: Arc::new(RwLock::new(BootstrapState::Pending)),
            },
        }
    }

    pub fn from_config(
        config: &BootstrapConfig,
        factory: impl FnOnce(&BTreeSet<AgentId>) -> T + 'static,
    ) -> Self {
        Self::new(config.leader_id, config.reply_window_ticks, factory)
    }

    pub fn handle(&self) -> BootstrapHandle<T> {
        self.handle.clone()
    }

    fn start(&mut self, ctx: &mut StepContext<'_>) -> WaitCondition {
        if ctx.agent_id == self.leader {
            self.stage = Stage::Collecting;
            return WaitCondition::ticks(1);
        }

        ctx.outbox
            .broadcast(Payload::Bootstrap(BootstrapMessage::Announce {
                agent: ctx.agent_id,
            }));
        self.stage = Stage::Awaiting {
            deadline: ctx.tick + self.reply_window,
        };
        WaitCondition::next_tick()
    }

    fn collect(&mut self, ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        let mut discovered: BTreeSet<AgentId> = ctx
            .inbox
            .iter()
            .filter_map(|message| match &message.payload {
                Payload::Bootstrap(BootstrapMessage::Announce { agent }) => Some(*agent),
                _ => None,
            })
            .collect();
        discovered.insert(ctx.agent_id);

        let factory = self
            .factory
            .take()
            .context("bootstrap value was already computed")?;
        let value = factory(&discovered);
        let encoded = serde_json::to_value(&value).context("failed to encode bootstrap value")?;

        ctx.outbox
            .broadcast(Payload::Bootstrap(BootstrapMessage::Outcome {
                value: encoded,
                discovered: discovered.clone(),
            }));
        log::info!(
            "agent {} computed bootstrap value for {} agents",
            ctx.agent_id,
            discovered.len()
        );

        self.handle
            .set(BootstrapState::Ready(BootstrapOutcome { value, discovered }));
        self.stage = Stage::Finished;
        Ok(WaitCondition::parked())
    }

    fn await_outcome(&mut self, ctx: &mut StepContext<'_>, deadline: LogicTick) -> WaitCondition {
        for message in ctx.inbox {
            if message.sender != self.leader {
                continue;
            }
            if let Payload::Bootstrap(BootstrapMessage::Outcome { value, discovered }) =
                &message.payload
            {
                match serde_json::from_value::<T>(value.clone()) {
                    Ok(value) => {
                        self.handle.set(BootstrapState::Ready(BootstrapOutcome {
                            value,
                            discovered: discovered.clone(),
                        }));
                        self.stage = Stage::Finished;
                        return WaitCondition::parked();
                    }
                    Err(e) => log::warn!(
                        "agent {} cannot decode bootstrap value from leader {}: {}",
                        ctx.agent_id,
                        self.leader,
                        e
                    ),
                }
            }
        }

        if ctx.tick >= deadline {
            log::warn!(
                "agent {} heard nothing from bootstrap leader {} by tick {}; parking",
                ctx.agent_id,
                self.leader,
                ctx.tick
            );
            self.handle.set(BootstrapState::Unreachable);
            self.stage = Stage::Finished;
            return WaitCondition::parked();
        }

        WaitCondition::next_tick()
    }
}

impl<T> Component for BootstrapComponent<T>
where
    T: Clone + Serialize + DeserializeOwned + 'static,
{
    fn name(&self) -> &str {
        "bootstrap"
    }

    fn priority(&self) -> Priority {
        Priority::uniform(Priority::BOOTSTRAP)
    }

    fn pre_update(&mut self, ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        match self.stage {
            Stage::Start => Ok(self.start(ctx)),
            Stage::Collecting => self.collect(ctx),
            Stage::Awaiting { deadline } => Ok(self.await_outcome(ctx, deadline)),
            Stage::Finished => Ok(WaitCondition::parked()),
        }
    }

    fn post_update(&mut self, _ctx: &mut StepContext<'_>) -> Result<WaitCondition> {
        Ok(WaitCondition::parked())
    }

    fn take_children(&mut self) -> Vec<Box<dyn Component>> {
        Vec::new()
    }

    fn debug_dump(&self) -> Option<String> {
        Some(format!("leader={} stage={:?}", self.leader, self.stage))
    }
}
