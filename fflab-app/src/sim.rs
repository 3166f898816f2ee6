use fflab_core::{HandleLoad, KinematicSample, TrialSpec, TrialState, Vec2};
use fflab_experiment::{minimum_jerk, DeviceError, HapticDevice};
use rand::Rng;
use tracing::{debug, info};

/// Hand plus handle mass (kg).
const MASS: f64 = 1.5;
/// Positions are cm, forces N.
const CM_PER_M: f64 = 100.0;

/// Joint stiffness and damping the synthetic subject tracks its plan with.
const TRACK_STIFFNESS: f64 = 4.0;
const TRACK_DAMPING: f64 = 0.45;
/// Damping left when the subject lets the robot lead.
const COMPLIANT_DAMPING: f64 = 0.3;

/// Seconds to bring the hand back to a start position.
const HOMING_TIME: f64 = 0.6;

#[derive(Debug, Clone, Copy)]
struct Segment {
    from: Vec2,
    to: Vec2,
    begin: f64,
    duration: f64,
}

impl Segment {
    fn eval(&self, t: f64) -> (Vec2, Vec2) {
        let tau = ((t - self.begin) / self.duration).clamp(0.0, 1.0);
        let rate = if tau > 0.0 && tau < 1.0 {
            30.0 * tau * tau * (1.0 - tau) * (1.0 - tau) / self.duration
        } else {
            0.0
        };
        let d = self.to - self.from;
        (self.from + d * minimum_jerk(tau), d * rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Hold,
    Homing,
    Waiting,
    Reaching,
    Compliant,
}

/// Subject model: goes home, waits for the go cue, reacts after a random
/// delay and reaches through the via point with minimum-jerk legs.
#[derive(Debug)]
pub struct SyntheticSubject<R> {
    rng: R,
    intent: Intent,
    plan: Vec<Segment>,
    hold: Vec2,
    trial: Option<usize>,
}

impl<R: Rng> SyntheticSubject<R> {
    pub fn new(rng: R, hand: Vec2) -> Self {
        Self {
            rng,
            intent: Intent::Hold,
            plan: Vec::new(),
            hold: hand,
            trial: None,
        }
    }

    fn plan_homing(&mut self, t: f64, hand: Vec2, start: Vec2) {
        self.plan = vec![Segment {
            from: hand,
            to: start,
            begin: t,
            duration: HOMING_TIME,
        }];
        self.hold = start;
        self.intent = Intent::Homing;
    }

    fn plan_reach(&mut self, t: f64, trial: &TrialSpec) {
        let g = trial.geometry;
        let reaction = self.rng.random_range(0.18..0.3);
        let mut begin = t + reaction;
        self.plan.clear();
        for (from, to) in [(g.start, g.via), (g.via, g.finish)] {
            if from.distance(to) < 1e-6 {
                continue;
            }
            let duration = self.rng.random_range(0.25..0.35);
            self.plan.push(Segment {
                from,
                to,
                begin,
                duration,
            });
            begin += duration + self.rng.random_range(0.08..0.12);
        }
        self.hold = g.finish;
        self.intent = Intent::Reaching;
        debug!(trial = trial.index, reaction, legs = self.plan.len(), "subject reach planned");
    }

    /// Updates the subject's intent from what the controller shows.
    pub fn observe(&mut self, t: f64, hand: Vec2, state: TrialState, trial: Option<&TrialSpec>) {
        let Some(trial) = trial else {
            return;
        };
        if self.trial != Some(trial.index) {
            self.trial = Some(trial.index);
            self.intent = Intent::Hold;
            self.hold = hand;
        }

        match state {
            TrialState::Home if trial.is_passive_move() => self.intent = Intent::Compliant,
            TrialState::Home if self.intent == Intent::Hold && self.hold != trial.geometry.start => {
                self.plan_homing(t, hand, trial.geometry.start)
            }
            TrialState::Delay | TrialState::Go if self.intent != Intent::Compliant => {
                self.intent = Intent::Waiting;
                self.hold = trial.geometry.start;
            }
            TrialState::MoveWait if self.intent == Intent::Waiting => {
                if trial.is_passive_wait() {
                    self.intent = Intent::Hold;
                } else {
                    self.plan_reach(t, trial);
                }
            }
            TrialState::Error | TrialState::Setup if self.intent != Intent::Compliant => {
                self.intent = Intent::Hold;
                self.hold = hand;
            }
            _ => {}
        }
    }

    /// Force the subject's arm applies to the handle.
    pub fn force(&self, t: f64, hand: Vec2, velocity: Vec2) -> Vec2 {
        let (desired, desired_velocity) = match self.intent {
            Intent::Compliant => return velocity * -COMPLIANT_DAMPING,
            Intent::Hold | Intent::Waiting => (self.hold, Vec2::ZERO),
            Intent::Homing | Intent::Reaching => self
                .plan
                .iter()
                .rev()
                .find(|s| t >= s.begin)
                .or(self.plan.first())
                .map_or((self.hold, Vec2::ZERO), |s| s.eval(t)),
        };
        (desired - hand) * TRACK_STIFFNESS + (desired_velocity - velocity) * TRACK_DAMPING
    }
}

/// Point-mass manipulandum with a synthetic subject holding the handle.
pub struct SimulatedRig<R> {
    subject: SyntheticSubject<R>,
    position: Vec2,
    velocity: Vec2,
    dt: f64,
    hz: f64,
    t: f64,
    subject_force: Vec2,
    sensor: bool,
    opened: bool,
    running: bool,
}

impl<R: Rng> SimulatedRig<R> {
    pub fn new(rng: R, hz: f64, start: Vec2) -> Self {
        Self {
            subject: SyntheticSubject::new(rng, start),
            position: start,
            velocity: Vec2::ZERO,
            dt: 1.0 / hz,
            hz,
            t: 0.0,
            subject_force: Vec2::ZERO,
            sensor: false,
            opened: false,
            running: false,
        }
    }

    pub fn with_force_sensor(mut self, fitted: bool) -> Self {
        self.sensor = fitted;
        self
    }

    /// Lets the subject see the controller's state before the next sample.
    pub fn observe(&mut self, state: TrialState, trial: Option<&TrialSpec>) {
        self.subject.observe(self.t, self.position, state, trial);
    }
}

impl<R: Rng> HapticDevice for SimulatedRig<R> {
    fn open(&mut self) -> Result<(), DeviceError> {
        if !(self.hz.is_finite() && self.hz > 0.0) {
            return Err(DeviceError::Open(format!("invalid servo rate {} Hz", self.hz)));
        }
        self.opened = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if !self.opened {
            return Err(DeviceError::Start("simulator not opened".into()));
        }
        self.running = true;
        info!(hz = self.hz, "simulated rig running");
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn is_safe(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }

    fn is_activated(&self) -> bool {
        self.running
    }

    fn is_ramped(&self) -> bool {
        self.running
    }

    fn read_sample(&mut self) -> KinematicSample {
        KinematicSample::new(self.position, self.velocity)
    }

    /// Integrates one servo period with the commanded force applied.
    fn apply_force(&mut self, force: Vec2) {
        if !self.running {
            return;
        }
        self.subject_force = self.subject.force(self.t, self.position, self.velocity);
        let accel = (force + self.subject_force) * (CM_PER_M / MASS);
        self.velocity = self.velocity + accel * self.dt;
        self.position = self.position + self.velocity * self.dt;
        self.t += self.dt;
    }

    fn read_force_torque(&mut self) -> Option<HandleLoad> {
        self.sensor.then(|| HandleLoad {
            forces: [self.subject_force.x, self.subject_force.y, 0.0],
            torques: [0.0; 3],
        })
    }

    fn reset_sensor_bias(&mut self) -> Result<(), DeviceError> {
        self.subject_force = Vec2::ZERO;
        Ok(())
    }

    fn loop_frequency(&self) -> f64 {
        self.hz
    }
}
