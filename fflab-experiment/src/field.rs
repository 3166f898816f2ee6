use std::time::Duration;

use fflab_core::{
    ChannelOrder, FieldKind, ForceFieldSpec, KinematicSample, MovementOrder, PassiveMoveState,
    Rotation, TrialSpec, Vec2,
};
use tracing::{debug, warn};

use crate::config::{ExperimentConfig, PassiveMoveParams};
use crate::error::DeviceError;
use crate::passive::PassiveMove;
use crate::ramp::Ramp;

/// Computes the robot force each control tick from the active field.
///
/// The robot field is the one the forces come from. It follows the trial
/// field except for `SameAsLast` trials, which keep whatever was loaded
/// before.
#[derive(Debug)]
pub struct ForceFieldEngine<M> {
    force_max: f64,
    ramp_time: f64,
    channel_ramp_time: f64,
    channel_width_initial: f64,
    missed_via_distance: f64,
    moved_too_far_distance: f64,
    passive_params: PassiveMoveParams,

    robot_field: ForceFieldSpec,
    robot_rotation: Rotation,
    ramp: Ramp,
    channel_ramp: Ramp,
    origin: Vec2,
    field_angle: f64,
    started: bool,

    passive: M,
    passive_state: PassiveMoveState,
    passive_start: Option<Vec2>,
    passive_end: Option<Vec2>,

    missed_via: bool,
    moved_too_far: bool,
    trial: Option<TrialSpec>,
}

impl<M: PassiveMove> ForceFieldEngine<M> {
    pub fn new(config: &ExperimentConfig, passive: M) -> Self {
        Self {
            force_max: config.force_max,
            ramp_time: config.force_field_ramp_time,
            channel_ramp_time: config.channel_width_ramp_time,
            channel_width_initial: config.channel_width_initial,
            missed_via_distance: config.missed_via_distance,
            moved_too_far_distance: config.moved_too_far_distance,
            passive_params: config.passive_move.clone(),

            robot_field: ForceFieldSpec::none(),
            robot_rotation: Rotation::IDENTITY,
            ramp: Ramp::new(),
            channel_ramp: Ramp::new(),
            origin: Vec2::ZERO,
            field_angle: 0.0,
            started: false,

            passive,
            passive_state: PassiveMoveState::default(),
            passive_start: None,
            passive_end: None,

            missed_via: false,
            moved_too_far: false,
            trial: None,
        }
    }

    /// Starts both ramps and the passive-move primitive. The force ramp is
    /// zeroed so nothing is applied until a field is started.
    pub fn open(&mut self, now: Duration) -> Result<(), DeviceError> {
        self.ramp.start(now, self.ramp_time);
        self.ramp.zero();
        self.channel_ramp.start(now, self.channel_ramp_time);
        self.passive.open(&self.passive_params)
    }

    pub fn load_trial(&mut self, trial: &TrialSpec) {
        self.channel_ramp.one();
        if trial.field.kind != FieldKind::SameAsLast {
            self.robot_field = trial.field;
            self.robot_rotation = Rotation::from_degrees(trial.field.angle);
        }
        self.trial = Some(*trial);
    }

    /// Clears the per-trial overshoot latches.
    pub fn begin_trial(&mut self) {
        self.missed_via = false;
        self.moved_too_far = false;
    }

    /// Fades the trial field in from the current hand position.
    ///
    /// Returns false when the call was a no-op.
    pub fn start(&mut self, now: Duration, position: Vec2) -> bool {
        let Some(trial) = self.trial else {
            return false;
        };
        if self.started || (trial.is_passive_wait() && !trial.passive_wait_first) {
            return false;
        }

        self.started = true;
        self.field_angle = 0.0;

        if trial.is_passive_move() {
            self.ramp.one();
            let to = trial.geometry.finish;
            self.passive_start = Some(position);
            self.passive_end = Some(to);
            if !self.passive.start(now, position, to) {
                warn!(trial = trial.index, "passive move did not start");
            }
        } else {
            self.origin = position;
            if self.robot_field.kind == FieldKind::Channel
                && trial.channel_order == ChannelOrder::Second
            {
                let d = self.origin - trial.geometry.finish;
                self.field_angle = d.x.atan2(-d.y).to_degrees();
                self.channel_ramp.down(now);
            }
            self.ramp.up(now);
        }

        debug!(
            trial = trial.index,
            field = %self.robot_field.kind,
            angle = self.field_angle,
            "force field start"
        );
        true
    }

    /// Fades the field out. Returns false when the call was a no-op.
    pub fn stop(&mut self, now: Duration) -> bool {
        let Some(trial) = self.trial else {
            return false;
        };
        if (trial.is_passive_wait() && !trial.passive_wait_last)
            || trial.field.kind == FieldKind::SameAsLast
        {
            return false;
        }
        if !self.started {
            return false;
        }
        self.ramp.down(now);
        self.started = false;
        debug!(trial = trial.index, "force field stop");
        true
    }

    /// Raw field force before the ramp and the norm clamp.
    pub fn field_force(&mut self, now: Duration, sample: &KinematicSample) -> Vec2 {
        let c0 = self.robot_field.constant(0);
        let c1 = self.robot_field.constant(1);

        let force = match self.robot_field.kind {
            FieldKind::None | FieldKind::SameAsLast => Vec2::ZERO,
            FieldKind::Viscous => self.robot_rotation * sample.velocity * c0,
            FieldKind::Channel => {
                let width = self.channel_width_initial * self.channel_ramp.current_value(now);
                let r = Rotation::from_degrees(self.channel_angle());
                let p = r * (sample.position - self.origin);
                let v = r * sample.velocity;

                let d = if p.x.abs() >= width {
                    p.x.signum() * (p.x.abs() - width)
                } else {
                    0.0
                };
                let fx = if d != 0.0 { c0 * d + c1 * v.x } else { 0.0 };
                r.inverse() * Vec2::new(fx, 0.0)
            }
            FieldKind::PassiveMove => self
                .passive
                .update(now, sample.position, sample.velocity)
                .unwrap_or(Vec2::ZERO),
            FieldKind::Spring2D => (sample.position - self.origin) * c0 + sample.velocity * c1,
        };

        self.passive_state = self.passive.current_state();
        force
    }

    fn channel_angle(&self) -> f64 {
        let Some(trial) = self.trial.as_ref() else {
            return -self.field_angle;
        };
        let sym = trial.context.symmetry_angle();
        match trial.movement_order {
            MovementOrder::SingleMovement => sym + trial.context.target_angle() - self.field_angle,
            MovementOrder::FollowThrough | MovementOrder::LeadIn => sym - self.field_angle,
        }
    }

    /// Latches the missed-via or moved-too-far flag once the hand passes
    /// the configured distance beyond the via point along the symmetry axis.
    pub fn update_overshoot(&mut self, position: Vec2) {
        let Some(trial) = self.trial.as_ref() else {
            return;
        };
        if trial.is_passive_move() {
            return;
        }
        let along = (Rotation::from_degrees(trial.context.symmetry_angle())
            * (position - trial.geometry.via))
            .y;

        if trial.context.kind.is_full_movement() {
            if self.missed_via_distance != 0.0 && along >= self.missed_via_distance {
                self.missed_via = true;
            }
        } else if self.moved_too_far_distance != 0.0 && along >= self.moved_too_far_distance {
            self.moved_too_far = true;
        }
    }

    /// Applies the ramp and the norm clamp. Returns the force and the ramp
    /// value it was scaled by.
    pub fn output(&mut self, now: Duration, raw: Vec2) -> (Vec2, f64) {
        let ramp = self.ramp.current_value(now);
        ((raw * ramp).clamp_norm(self.force_max), ramp)
    }

    pub fn shutdown(&mut self, now: Duration) {
        self.ramp.stop(now);
        self.channel_ramp.stop(now);
        self.started = false;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn robot_field(&self) -> &ForceFieldSpec {
        &self.robot_field
    }

    pub fn field_angle(&self) -> f64 {
        self.field_angle
    }

    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn missed_via(&self) -> bool {
        self.missed_via
    }

    pub fn moved_too_far(&self) -> bool {
        self.moved_too_far
    }

    pub fn passive_finished(&self) -> bool {
        self.passive.finished()
    }

    pub fn passive_state(&self) -> PassiveMoveState {
        self.passive_state
    }

    pub fn passive_endpoints(&self) -> (Option<Vec2>, Option<Vec2>) {
        (self.passive_start, self.passive_end)
    }

    /// Forgets the endpoints of the last passive move.
    pub fn clear_passive_endpoints(&mut self) {
        self.passive_start = None;
        self.passive_end = None;
    }

    pub fn ramp_target(&self) -> f64 {
        self.ramp.target()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passive::MinimumJerkMove;
    use approx::assert_abs_diff_eq;
    use fflab_core::{ContextKind, ContextSpec, MovementDirection, TrialGeometry};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn trial(field: ForceFieldSpec, context: ContextSpec) -> TrialSpec {
        TrialSpec {
            index: 0,
            phase: 0,
            field_index: 0,
            field,
            context,
            movement_order: MovementOrder::FollowThrough,
            channel_order: ChannelOrder::First,
            geometry: TrialGeometry {
                start: Vec2::new(0.0, -10.0),
                via: Vec2::ZERO,
                target: Vec2::new(0.0, 10.0),
                finish: Vec2::new(0.0, 10.0),
            },
            trial_delay: 0.3,
            passive_wait_first: false,
            passive_wait_last: false,
            direction: MovementDirection::Out,
        }
    }

    fn engine(config: &ExperimentConfig) -> ForceFieldEngine<MinimumJerkMove> {
        let mut e = ForceFieldEngine::new(config, MinimumJerkMove::new());
        e.open(ms(0)).unwrap();
        e
    }

    fn moving(x: f64, y: f64) -> KinematicSample {
        KinematicSample::new(Vec2::new(x, y), Vec2::new(20.0, 30.0))
    }

    #[test]
    fn nothing_is_applied_before_start() {
        let config = ExperimentConfig::default();
        let mut e = engine(&config);
        e.load_trial(&trial(
            ForceFieldSpec::viscous(15.0, 90.0),
            ContextSpec::new(ContextKind::StaticOn),
        ));
        let raw = e.field_force(ms(10), &moving(1.0, 2.0));
        assert!(raw.norm() > 0.0);
        let (force, ramp) = e.output(ms(10), raw);
        assert_eq!(ramp, 0.0);
        assert_eq!(force, Vec2::ZERO);
    }

    #[test]
    fn viscous_rotates_velocity() {
        let config = ExperimentConfig::default();
        let mut e = engine(&config);
        e.load_trial(&trial(
            ForceFieldSpec::viscous(0.1, 90.0),
            ContextSpec::new(ContextKind::StaticOn),
        ));
        let f = e.field_force(ms(0), &KinematicSample::new(Vec2::ZERO, Vec2::new(0.0, 10.0)));
        assert_abs_diff_eq!(f.x, -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(f.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn channel_restores_outside_width_only() {
        let config = ExperimentConfig {
            channel_width_initial: 1.0,
            ..Default::default()
        };
        let mut e = engine(&config);
        e.load_trial(&trial(
            ForceFieldSpec::channel(-2000.0, -20.0),
            ContextSpec::new(ContextKind::StaticOn),
        ));
        assert!(e.start(ms(0), Vec2::ZERO));

        let still = |x: f64| KinematicSample::at_rest(Vec2::new(x, 3.0));
        let right = e.field_force(ms(1), &still(1.5));
        assert_abs_diff_eq!(right.x, -1000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(right.y, 0.0, epsilon = 1e-6);

        let left = e.field_force(ms(1), &still(-1.25));
        assert_abs_diff_eq!(left.x, 500.0, epsilon = 1e-6);

        assert_eq!(e.field_force(ms(1), &still(0.9)), Vec2::ZERO);
        assert_eq!(e.field_force(ms(1), &still(-1.0)), Vec2::ZERO);
    }

    #[test]
    fn channel_second_aims_at_finish_and_narrows() {
        let config = ExperimentConfig {
            channel_width_initial: 2.0,
            channel_width_ramp_time: 0.1,
            ..Default::default()
        };
        let mut e = engine(&config);
        let mut t = trial(
            ForceFieldSpec::channel(-2000.0, 0.0),
            ContextSpec::new(ContextKind::StaticOn),
        );
        t.channel_order = ChannelOrder::Second;
        e.load_trial(&t);

        // Finish is at (0, 10); start the channel to its left.
        assert!(e.start(ms(0), Vec2::new(-10.0, 10.0)));
        assert_abs_diff_eq!(e.field_angle(), -90.0, epsilon = 1e-9);

        // Once the width has ramped to zero any sideways offset is pushed back.
        let off_axis = KinematicSample::at_rest(Vec2::new(-5.0, 10.5));
        let f = e.field_force(ms(200), &off_axis);
        assert!(f.y < 0.0);
        assert_abs_diff_eq!(f.x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn spring_pulls_to_origin() {
        let config = ExperimentConfig::default();
        let mut e = engine(&config);
        e.load_trial(&trial(
            ForceFieldSpec::spring(-100.0, -1.0),
            ContextSpec::new(ContextKind::StaticOn),
        ));
        e.start(ms(0), Vec2::new(1.0, 1.0));
        let f = e.field_force(ms(1), &KinematicSample::new(Vec2::new(2.0, 1.0), Vec2::new(0.0, 5.0)));
        assert_abs_diff_eq!(f.x, -100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(f.y, -5.0, epsilon = 1e-9);
    }

    #[test]
    fn ramp_fades_and_output_is_clamped() {
        let config = ExperimentConfig {
            force_max: 10.0,
            force_field_ramp_time: 0.1,
            ..Default::default()
        };
        let mut e = engine(&config);
        e.load_trial(&trial(
            ForceFieldSpec::spring(-100.0, 0.0),
            ContextSpec::new(ContextKind::StaticOn),
        ));
        e.start(ms(0), Vec2::ZERO);

        let sample = KinematicSample::at_rest(Vec2::new(0.01, 0.0));
        let raw = e.field_force(ms(50), &sample);
        let (half, ramp) = e.output(ms(50), raw);
        assert_abs_diff_eq!(ramp, 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(half.x, -0.5, epsilon = 1e-9);

        let far = KinematicSample::at_rest(Vec2::new(5.0, 0.0));
        let raw = e.field_force(ms(200), &far);
        let (clamped, _) = e.output(ms(200), raw);
        assert_abs_diff_eq!(clamped.norm(), 10.0, epsilon = 1e-9);

        assert!(e.stop(ms(200)));
        assert!(!e.stop(ms(200)));
        let (_, ramp) = e.output(ms(400), raw);
        assert_eq!(ramp, 0.0);
    }

    #[test]
    fn same_as_last_keeps_robot_field() {
        let config = ExperimentConfig::default();
        let mut e = engine(&config);
        e.load_trial(&trial(
            ForceFieldSpec::viscous(0.15, 90.0),
            ContextSpec::new(ContextKind::StaticOn),
        ));
        e.load_trial(&trial(
            ForceFieldSpec::same_as_last(),
            ContextSpec::new(ContextKind::PassiveMove),
        ));
        assert_eq!(e.robot_field().kind, FieldKind::Viscous);
        assert_eq!(e.robot_field().constant(0), 0.15);

        // Stopping is suppressed so the held field stays on.
        e.start(ms(0), Vec2::ZERO);
        assert!(!e.stop(ms(1)));
        assert!(e.is_started());
    }

    #[test]
    fn passive_wait_gates_start_and_stop() {
        let config = ExperimentConfig::default();
        let mut e = engine(&config);
        let mut t = trial(ForceFieldSpec::viscous(0.1, 0.0), ContextSpec::new(ContextKind::PassiveWait));
        e.load_trial(&t);
        assert!(!e.start(ms(0), Vec2::ZERO));

        t.passive_wait_first = true;
        e.load_trial(&t);
        assert!(e.start(ms(0), Vec2::ZERO));
        assert!(!e.stop(ms(1)));

        t.passive_wait_last = true;
        e.load_trial(&t);
        assert!(e.stop(ms(2)));
    }

    #[test]
    fn passive_move_trial_drives_primitive_to_finish() {
        let config = ExperimentConfig::default();
        let mut e = engine(&config);
        e.load_trial(&trial(
            ForceFieldSpec::passive_move(),
            ContextSpec::new(ContextKind::PassiveMove),
        ));
        let from = Vec2::new(0.0, -10.0);
        assert!(e.start(ms(0), from));
        assert_eq!(e.passive_endpoints(), (Some(from), Some(Vec2::new(0.0, 10.0))));

        let f = e.field_force(ms(300), &KinematicSample::at_rest(from));
        assert!(f.y > 0.0);
        let (_, ramp) = e.output(ms(300), f);
        assert_eq!(ramp, 1.0);
        assert!(!e.passive_finished());
    }

    #[test]
    fn overshoot_latches_by_context() {
        let config = ExperimentConfig {
            missed_via_distance: 2.0,
            moved_too_far_distance: 3.0,
            ..Default::default()
        };
        let mut e = engine(&config);
        e.load_trial(&trial(ForceFieldSpec::none(), ContextSpec::new(ContextKind::StaticOn)));
        e.begin_trial();
        e.update_overshoot(Vec2::new(0.0, 1.9));
        assert!(!e.missed_via());
        e.update_overshoot(Vec2::new(0.0, 2.0));
        assert!(e.missed_via());
        assert!(!e.moved_too_far());

        e.load_trial(&trial(ForceFieldSpec::none(), ContextSpec::new(ContextKind::CentralOnly)));
        e.begin_trial();
        e.update_overshoot(Vec2::new(0.0, 2.5));
        assert!(!e.moved_too_far());
        e.update_overshoot(Vec2::new(0.0, 3.5));
        assert!(e.moved_too_far());
        assert!(!e.missed_via());
    }
}
