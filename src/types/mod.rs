pub mod context;
pub mod message;

pub use context::{Partition, SwarmContext};
pub use message::{
    BootstrapMessage, CollisionReport, Heartbeat, Message, Outbox, Payload, StigmergyMessage,
    StigmergyOp, TargetClaim,
};

use serde::{Deserialize, Serialize};
use std::fmt;

pub type AgentId = u32;
pub type PartitionId = u32;
pub type LogicTick = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &TilePos) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn manhattan(&self, other: &TilePos) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// Stable string form used as a stigmergy key.
    pub fn key(&self) -> String {
        format!("{},{}", self.x, self.y)
    }
}

impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionStatus {
    Idle,     // No task, body at rest
    Moving,   // Executing a path or maneuver
    Stopping, // Task aborted, decelerating
}

impl MotionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MotionStatus::Idle => "Idle",
            MotionStatus::Moving => "Moving",
            MotionStatus::Stopping => "Stopping",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativePosition {
    pub distance: f32,
    /// Degrees, relative to the body's heading. Positive is counter-clockwise.
    pub angle: f32,
}
