use crate::types::{LogicTick, MotionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Until {
    TicksElapsed(u32),
    StatusEquals(MotionStatus),
    /// Never resumes. Used for unused phases and permanent parking.
    Never,
}

/// Suspension descriptor a component hands back to the scheduler after each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCondition {
    pub until: Until,
    /// Set when the step was an internal stage of a multi-step maneuver rather
    /// than steady-state re-entry.
    pub maneuver: bool,
}

impl WaitCondition {
    pub const fn ticks(n: u32) -> Self {
        Self {
            until: Until::TicksElapsed(n),
            maneuver: false,
        }
    }

    pub const fn next_tick() -> Self {
        Self::ticks(1)
    }

    /// Ready at the first phase evaluation, including the current tick.
    pub const fn immediately() -> Self {
        Self::ticks(0)
    }

    pub const fn status(status: MotionStatus) -> Self {
        Self {
            until: Until::StatusEquals(status),
            maneuver: false,
        }
    }

    pub const fn parked() -> Self {
        Self {
            until: Until::Never,
            maneuver: false,
        }
    }

    pub const fn in_maneuver(mut self) -> Self {
        self.maneuver = true;
        self
    }

    pub fn is_parked(&self) -> bool {
        self.until == Until::Never
    }

    /// `since` is the tick the component yielded this condition.
    pub fn is_satisfied(&self, since: LogicTick, now: LogicTick, status: MotionStatus) -> bool {
        match self.until {
            Until::TicksElapsed(n) => now.saturating_sub(since) >= u64::from(n),
            Until::StatusEquals(expected) => status == expected,
            Until::Never => false,
        }
    }
}
