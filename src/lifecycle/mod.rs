pub mod bootstrap;
pub mod heartbeat;

pub use bootstrap::{BootstrapComponent, BootstrapHandle, BootstrapOutcome, BootstrapState};
pub use heartbeat::{HeartbeatComponent, HeartbeatRecord, HeartbeatTable};
