use std::time::Duration;

use fflab_core::Vec2;
use fflab_timing::DebouncedCondition;

use crate::config::ExperimentConfig;

pub fn is_home(position: Vec2, home: Vec2, tolerance: f64) -> bool {
    position.distance(home) <= tolerance
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Region {
    Circle { center: Vec2, radius: f64 },
    /// Half-extents on each axis.
    Rectangle { center: Vec2, width: f64, height: f64 },
}

impl Region {
    /// Via region at `center`: a rectangle when both extents are set,
    /// otherwise a circle.
    pub fn via(center: Vec2, config: &ExperimentConfig) -> Self {
        if config.via_is_rectangle() {
            Region::Rectangle {
                center,
                width: config.via_width,
                height: config.via_height,
            }
        } else {
            Region::Circle {
                center,
                radius: config.via_radius,
            }
        }
    }

    pub fn contains(&self, p: Vec2) -> bool {
        match *self {
            Region::Circle { center, radius } => is_home(p, center, radius),
            Region::Rectangle {
                center,
                width,
                height,
            } => (p.x - center.x).abs() <= width && (p.y - center.y).abs() <= height,
        }
    }
}

/// Movement predicates evaluated on the latest sample.
///
/// Each dwell requirement owns its own debounce so one predicate cannot
/// reset another's hold period.
#[derive(Debug, Clone)]
pub struct MovementDetector {
    not_moving_speed: f64,
    start_tolerance: f64,
    finish_tolerance: f64,
    not_moving: DebouncedCondition,
    finished: DebouncedCondition,
}

impl MovementDetector {
    pub fn new(config: &ExperimentConfig) -> Self {
        Self {
            not_moving_speed: config.not_moving_speed,
            start_tolerance: config.start_tolerance,
            finish_tolerance: config.finish_tolerance,
            not_moving: DebouncedCondition::from_secs(config.not_moving_time),
            finished: DebouncedCondition::from_secs(config.finish_tolerance_time),
        }
    }

    /// Hand speed has stayed at or below the threshold for the dwell time.
    /// A zero threshold disables the check.
    pub fn not_moving(&mut self, now: Duration, speed: f64) -> bool {
        if self.not_moving_speed == 0.0 {
            return true;
        }
        self.not_moving.update(now, speed <= self.not_moving_speed)
    }

    pub fn movement_started(&self, position: Vec2, start: Vec2) -> bool {
        !is_home(position, start, self.start_tolerance)
    }

    /// Hand has stayed inside the finish tolerance for the dwell time.
    pub fn movement_finished(&mut self, now: Duration, position: Vec2, finish: Vec2) -> bool {
        self.finished
            .update(now, is_home(position, finish, self.finish_tolerance))
    }

    pub fn reset(&mut self, now: Duration) {
        self.not_moving.reset(now);
        self.finished.reset(now);
    }
}
