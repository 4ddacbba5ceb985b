pub mod map;
pub mod motion;
pub mod simulated;

pub use map::GridMap;
pub use motion::{Body, Motion, Positioning};
pub use simulated::{Occupancy, SimulatedBody};
