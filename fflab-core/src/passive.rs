use crate::geometry::Vec2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PassiveMovePhase {
    #[default]
    Idle,
    Moving,
    Holding,
    RampDown,
    Finished,
}

impl PassiveMovePhase {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Snapshot of the passive-move primitive, captured each control tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PassiveMoveState {
    pub phase: PassiveMovePhase,
    /// Seconds since the phase began.
    pub phase_elapsed: f64,
    /// Spring gain envelope in [0, 1].
    pub ramp: f64,
    /// Commanded position on the planned path.
    pub position: Vec2,
}
