pub mod types;
pub mod engine;
pub mod storage;
pub mod transport;
pub mod providers;
pub mod lifecycle;
pub mod negotiation;
pub mod capabilities;
pub mod factory;
pub mod config;

pub use config::SwarmConfig;
pub use types::*;
