use crate::geometry::Vec2;
use serde::{Deserialize, Serialize};

/// One control-loop reading of the manipulandum handle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KinematicSample {
    pub position: Vec2,
    pub velocity: Vec2,
    pub speed: f64,
}

impl KinematicSample {
    pub fn new(position: Vec2, velocity: Vec2) -> Self {
        Self {
            position,
            velocity,
            speed: velocity.norm(),
        }
    }

    pub fn at_rest(position: Vec2) -> Self {
        Self::new(position, Vec2::ZERO)
    }
}

/// Force/torque transducer reading from the handle, when one is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HandleLoad {
    pub forces: [f64; 3],
    pub torques: [f64; 3],
}
