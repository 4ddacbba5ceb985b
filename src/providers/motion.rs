use crate::types::{MotionStatus, RelativePosition, TilePos};

/// Movement commands accepted by the body's motion executor.
pub trait Motion {
    fn stop_current_task(&mut self);
    /// Plans a path and starts following it. Returns `false` when no path exists.
    fn path_and_move_to(&mut self, target: TilePos) -> bool;
    fn move_by(&mut self, distance: f32, reverse: bool);
    fn rotate(&mut self, angle_degrees: f32);
    fn is_colliding(&self) -> bool;
    fn status(&self) -> MotionStatus;
}

pub trait Positioning {
    fn current_tile(&self) -> TilePos;
    fn relative_position_to(&self, tile: TilePos) -> RelativePosition;
}

/// Everything an agent drives: motion, positioning, and the physics step the
/// harness advances once per logic tick.
pub trait Body: Motion + Positioning {
    fn step_physics(&mut self);
}
