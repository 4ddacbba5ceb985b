pub mod memory;

pub use memory::{InMemoryBroadcast, TransportStats};

use crate::types::{AgentId, Message, TilePos};

/// Unreliable broadcast medium with one-tick latency.
pub trait Transport {
    /// Queues a broadcast sent during the current tick.
    fn broadcast(&mut self, message: Message);
    /// Broadcasts from the previous tick that reach `agent` at `position`.
    /// Never includes the agent's own messages. Called once per agent per tick.
    fn receive(&mut self, agent: AgentId, position: TilePos) -> Vec<Message>;
    /// Opens the next tick: last tick's broadcasts become receivable and
    /// anything older is discarded.
    fn advance(&mut self);
}
