pub mod entry;
pub mod stigmergy;

pub use entry::{ConflictResolver, LowestOwnerWins, StigmergyEntry, StigmergyValue};
pub use stigmergy::{StigmergyComponent, StigmergyUpdate, VirtualStigmergy};

#[derive(Debug, thiserror::Error)]
pub enum StigmergyError {
    #[error("stigmergy channel name must not be empty")]
    EmptyChannel,
    #[error("stigmergy channel `{0}` must not contain whitespace")]
    InvalidChannel(String),
}
