pub mod agent;
pub mod component;
pub mod scheduler;
pub mod simulation;
pub mod wait;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::SwarmAgent;
pub use component::{Component, Phase, Priority, StepContext};
pub use scheduler::{TickReport, TickScheduler};
pub use simulation::{Simulation, TickSummary};
pub use wait::{Until, WaitCondition};
