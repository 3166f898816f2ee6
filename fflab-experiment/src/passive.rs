use std::time::Duration;

use fflab_core::{PassiveMovePhase, PassiveMoveState, Vec2};
use fflab_timing::DebouncedCondition;
use tracing::debug;

use crate::config::PassiveMoveParams;
use crate::error::DeviceError;

/// Robot-driven move of the hand from one point to another.
pub trait PassiveMove {
    fn open(&mut self, params: &PassiveMoveParams) -> Result<(), DeviceError>;

    /// Begins a move. Returns false when the primitive was never opened.
    fn start(&mut self, now: Duration, from: Vec2, to: Vec2) -> bool;

    /// Force to apply this tick, or `None` when no move is in progress.
    fn update(&mut self, now: Duration, position: Vec2, velocity: Vec2) -> Option<Vec2>;

    fn finished(&self) -> bool;

    fn current_state(&self) -> PassiveMoveState;
}

/// Spring toward a minimum-jerk path, then a hold at the end point and a
/// ramp down of the spring.
#[derive(Debug, Clone, Default)]
pub struct MinimumJerkMove {
    params: Option<PassiveMoveParams>,
    from: Vec2,
    to: Vec2,
    phase_start: Duration,
    hold: Option<DebouncedCondition>,
    state: PassiveMoveState,
}

impl MinimumJerkMove {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> PassiveMovePhase {
        self.state.phase
    }

    fn enter(&mut self, now: Duration, phase: PassiveMovePhase) {
        debug!(from = ?self.state.phase, to = ?phase, "passive move phase");
        self.state.phase = phase;
        self.state.phase_elapsed = 0.0;
        self.phase_start = now;
        if let Some(hold) = self.hold.as_mut() {
            hold.reset(now);
        }
    }
}

/// Normalised minimum-jerk position profile for `tau` in [0, 1].
pub fn minimum_jerk(tau: f64) -> f64 {
    let t = tau.clamp(0.0, 1.0);
    let t3 = t * t * t;
    t3 * (10.0 - 15.0 * t + 6.0 * t * t)
}

impl PassiveMove for MinimumJerkMove {
    fn open(&mut self, params: &PassiveMoveParams) -> Result<(), DeviceError> {
        if params.movement_time.is_nan() || params.movement_time <= 0.0 {
            return Err(DeviceError::PassiveMove(format!(
                "movement time {} must be positive",
                params.movement_time
            )));
        }
        if params.position_tolerance < 0.0 || params.velocity_tolerance < 0.0 {
            return Err(DeviceError::PassiveMove("negative tolerance".into()));
        }
        self.hold = Some(DebouncedCondition::from_secs(params.hold_time));
        self.params = Some(params.clone());
        self.state = PassiveMoveState::default();
        Ok(())
    }

    fn start(&mut self, now: Duration, from: Vec2, to: Vec2) -> bool {
        if self.params.is_none() {
            return false;
        }
        self.from = from;
        self.to = to;
        self.state.position = from;
        self.state.ramp = 0.0;
        self.enter(now, PassiveMovePhase::Moving);
        true
    }

    fn update(&mut self, now: Duration, position: Vec2, velocity: Vec2) -> Option<Vec2> {
        let params = self.params.as_ref()?;
        let k = params.spring_constant;
        let ramp_time = params.ramp_time;
        let t = now.saturating_sub(self.phase_start).as_secs_f64();
        self.state.phase_elapsed = t;

        match self.state.phase {
            PassiveMovePhase::Idle | PassiveMovePhase::Finished => None,
            PassiveMovePhase::Moving => {
                let movement_time = params.movement_time;
                let s = minimum_jerk(t / movement_time);
                let desired = self.from + (self.to - self.from) * s;
                let ramp = if ramp_time > 0.0 { (t / ramp_time).min(1.0) } else { 1.0 };
                self.state.position = desired;
                self.state.ramp = ramp;
                let force = (position - desired) * (k * ramp);
                if t >= movement_time {
                    self.enter(now, PassiveMovePhase::Holding);
                }
                Some(force)
            }
            PassiveMovePhase::Holding => {
                let within = position.distance(self.to) <= params.position_tolerance
                    && velocity.norm() <= params.velocity_tolerance;
                self.state.position = self.to;
                self.state.ramp = 1.0;
                let force = (position - self.to) * k;
                let held = self.hold.as_mut().is_some_and(|h| h.update(now, within));
                if held {
                    self.enter(now, PassiveMovePhase::RampDown);
                }
                Some(force)
            }
            PassiveMovePhase::RampDown => {
                let ramp = if ramp_time > 0.0 { (1.0 - t / ramp_time).max(0.0) } else { 0.0 };
                self.state.position = self.to;
                self.state.ramp = ramp;
                if ramp == 0.0 {
                    self.enter(now, PassiveMovePhase::Finished);
                }
                Some((position - self.to) * (k * ramp))
            }
        }
    }

    fn finished(&self) -> bool {
        self.state.phase == PassiveMovePhase::Finished
    }

    fn current_state(&self) -> PassiveMoveState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn params() -> PassiveMoveParams {
        PassiveMoveParams {
            movement_time: 0.5,
            hold_time: 0.05,
            ramp_time: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn profile_endpoints_and_midpoint() {
        assert_eq!(minimum_jerk(0.0), 0.0);
        assert_abs_diff_eq!(minimum_jerk(0.5), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(minimum_jerk(1.0), 1.0, epsilon = 1e-12);
        assert_eq!(minimum_jerk(2.0), minimum_jerk(1.0));
    }

    #[test]
    fn start_requires_open() {
        let mut m = MinimumJerkMove::new();
        assert!(!m.start(ms(0), Vec2::ZERO, Vec2::new(0.0, 10.0)));
        assert!(m.update(ms(1), Vec2::ZERO, Vec2::ZERO).is_none());
    }

    #[test]
    fn rejects_zero_movement_time() {
        let mut m = MinimumJerkMove::new();
        let bad = PassiveMoveParams {
            movement_time: 0.0,
            ..Default::default()
        };
        assert!(m.open(&bad).is_err());
    }

    #[test]
    fn perfectly_tracking_hand_runs_every_phase() {
        let mut m = MinimumJerkMove::new();
        m.open(&params()).unwrap();
        let from = Vec2::new(0.0, 10.0);
        let to = Vec2::new(0.0, -10.0);
        assert!(m.start(ms(0), from, to));
        assert_eq!(m.phase(), PassiveMovePhase::Moving);

        // A hand one tick behind the plan only feels a small pull.
        let mut finished_at = None;
        for i in 1..=2000u64 {
            let now = ms(i);
            let hand = m.current_state().position;
            if let Some(f) = m.update(now, hand, Vec2::ZERO) {
                assert!(f.norm() < 3.0, "tick {i}: {f:?}");
            }
            if m.finished() {
                finished_at = Some(i);
                break;
            }
        }
        let end = finished_at.expect("move never finished");
        // movement + hold + ramp down, one tick of slack per phase change.
        assert!((650..=660).contains(&end), "finished at {end} ms");
        assert!(m.update(ms(end + 1), to, Vec2::ZERO).is_none());
    }

    #[test]
    fn spring_pulls_toward_plan() {
        let mut m = MinimumJerkMove::new();
        m.open(&params()).unwrap();
        m.start(ms(0), Vec2::ZERO, Vec2::new(10.0, 0.0));
        let f = m.update(ms(200), Vec2::ZERO, Vec2::ZERO).unwrap();
        assert!(f.x > 0.0);
        assert_abs_diff_eq!(f.y, 0.0);
    }

    #[test]
    fn hold_waits_for_the_hand() {
        let mut m = MinimumJerkMove::new();
        m.open(&params()).unwrap();
        let to = Vec2::new(10.0, 0.0);
        m.start(ms(0), Vec2::ZERO, to);
        m.update(ms(500), to, Vec2::ZERO);
        assert_eq!(m.phase(), PassiveMovePhase::Holding);
        for i in 501..1000u64 {
            m.update(ms(i), Vec2::ZERO, Vec2::ZERO);
        }
        assert_eq!(m.phase(), PassiveMovePhase::Holding);
    }
}
