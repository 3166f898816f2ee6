#![allow(dead_code)]

use std::time::Duration;

use fflab_core::{
    ContextKind, ContextSpec, ForceFieldSpec, HandleLoad, KinematicSample, PassiveMovePhase,
    TrialState, Vec2,
};
use fflab_experiment::{
    minimum_jerk, Cue, DeviceError, DeviceStatus, DisplayState, ExperimentConfig,
    ExperimentStateMachine, FieldDefinition, Flow, HapticDevice, MemoryStore, MinimumJerkMove,
    PlannedTrial, Presenter, TrialList, TrialListBuilder, TrialPlan,
};
use fflab_timing::{Clock, ManualClock};
use rand::SeedableRng;
use rand::rngs::StdRng;

pub const CONTROL_PERIOD: Duration = Duration::from_millis(1);
pub const IDLE_EVERY: u64 = 10;

pub type Machine =
    ExperimentStateMachine<ManualClock, TrialList, MemoryStore, RecordingPresenter, MinimumJerkMove>;

#[derive(Debug, Default)]
pub struct RecordingPresenter {
    pub cues: Vec<Cue>,
    pub messages: Vec<String>,
    pub last: DisplayState,
}

impl RecordingPresenter {
    pub fn count(&self, cue: Cue) -> usize {
        self.cues.iter().filter(|c| **c == cue).count()
    }
}

impl Presenter for RecordingPresenter {
    fn present(&mut self, display: &DisplayState) {
        if !display.message.is_empty()
            && self.messages.last().map(String::as_str) != Some(display.message.as_ref())
        {
            self.messages.push(display.message.to_string());
        }
        self.last = display.clone();
    }

    fn play_cue(&mut self, cue: Cue) {
        self.cues.push(cue);
    }
}

/// Device stand-in that only tracks its lifecycle.
#[derive(Debug, Default)]
pub struct BenchDevice {
    pub started: bool,
    pub closed: bool,
    pub last_force: Vec2,
}

impl HapticDevice for BenchDevice {
    fn open(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_safe(&self) -> bool {
        true
    }

    fn is_activated(&self) -> bool {
        true
    }

    fn is_ramped(&self) -> bool {
        true
    }

    fn read_sample(&mut self) -> KinematicSample {
        KinematicSample::default()
    }

    fn apply_force(&mut self, force: Vec2) {
        self.last_force = force;
    }

    fn read_force_torque(&mut self) -> Option<HandleLoad> {
        None
    }

    fn loop_frequency(&self) -> f64 {
        1000.0
    }
}

pub fn config() -> ExperimentConfig {
    ExperimentConfig {
        movement_duration_timeout: 1.5,
        via_timeout_time: 0.3,
        ..ExperimentConfig::default()
    }
}

/// Two-part reach straight ahead through the via point at the origin.
pub fn reach(field: ForceFieldSpec) -> FieldDefinition {
    FieldDefinition {
        field,
        context: ContextSpec::new(ContextKind::StaticOn),
    }
}

pub fn trial_list(config: &ExperimentConfig, fields: Vec<FieldDefinition>, order: &[usize]) -> TrialList {
    build_list(config, fields, order, false)
}

/// Like [`trial_list`] but with a robot-driven return before every
/// subject trial after the first.
pub fn trial_list_with_returns(
    config: &ExperimentConfig,
    fields: Vec<FieldDefinition>,
    order: &[usize],
) -> TrialList {
    build_list(config, fields, order, true)
}

fn build_list(
    config: &ExperimentConfig,
    fields: Vec<FieldDefinition>,
    order: &[usize],
    returns: bool,
) -> TrialList {
    let plan = TrialPlan {
        fields,
        trials: order
            .iter()
            .map(|&field_index| PlannedTrial {
                phase: 0,
                field_index,
            })
            .collect(),
    };
    TrialListBuilder::new(config)
        .plan(plan)
        .with_passive_returns(returns)
        .build(&mut StdRng::seed_from_u64(1))
        .expect("valid plan")
}

/// How the scripted subject reaches once the go cue has been given.
#[derive(Debug, Clone, Copy)]
pub struct Script {
    pub reaction: f64,
    pub first_leg: f64,
    pub dwell: f64,
    pub second_leg: f64,
    /// Where the first leg ends, relative to the via point.
    pub aim: Vec2,
}

impl Script {
    pub const REACH: Script = Script {
        reaction: 0.15,
        first_leg: 0.2,
        dwell: 0.1,
        second_leg: 0.2,
        aim: Vec2::ZERO,
    };

    /// Never leaves the start.
    pub const FROZEN: Script = Script {
        reaction: f64::INFINITY,
        first_leg: 0.2,
        dwell: 0.1,
        second_leg: 0.2,
        aim: Vec2::ZERO,
    };
}

fn leg(from: Vec2, to: Vec2, t: f64, duration: f64) -> (Vec2, Vec2) {
    let tau = (t / duration).clamp(0.0, 1.0);
    let rate = if (0.0..1.0).contains(&tau) && t > 0.0 {
        30.0 * tau * tau * (1.0 - tau) * (1.0 - tau) / duration
    } else {
        0.0
    };
    let d = to - from;
    (from + d * minimum_jerk(tau), d * rate)
}

/// The state machine wired to a scripted hand and a manual clock.
pub struct Rig {
    pub clock: ManualClock,
    pub machine: Machine,
    pub device: BenchDevice,
    pub script: Script,
    pub status: DeviceStatus,
    pub history: Vec<TrialState>,
    hand: Vec2,
    go_at: Option<Duration>,
    ticks: u64,
}

impl Rig {
    pub fn new(config: ExperimentConfig, trials: TrialList, store: MemoryStore, script: Script) -> Self {
        let clock = ManualClock::new();
        let hand = trials.trials()[0].geometry.start;
        let mut machine = ExperimentStateMachine::new(
            config,
            clock.clone(),
            trials,
            store,
            RecordingPresenter::default(),
            MinimumJerkMove::new(),
        )
        .expect("valid machine");
        let mut device = BenchDevice::default();
        machine.open_device(&mut device).expect("device opens");
        let history = vec![machine.state()];
        Self {
            clock,
            machine,
            device,
            script,
            status: DeviceStatus::READY,
            history,
            hand,
            go_at: None,
            ticks: 0,
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    fn sample(&mut self) -> KinematicSample {
        let state = self.machine.state();
        let trial = self.machine.current_trial().copied();

        if matches!(state, TrialState::Setup | TrialState::Home) {
            self.go_at = None;
        }
        if state == TrialState::Home {
            if let Some(t) = trial.filter(|t| !t.is_passive_move()) {
                self.hand = t.geometry.start;
            }
        }

        // On a passive return the hand goes wherever the robot takes it.
        if trial.is_some_and(|t| t.is_passive_move()) {
            let planned = self.machine.engine().passive_state();
            if matches!(state, TrialState::MoveWait | TrialState::Moving0)
                && planned.phase != PassiveMovePhase::Idle
            {
                self.hand = planned.position;
            }
            return KinematicSample::at_rest(self.hand);
        }
        if state == TrialState::MoveWait && self.go_at.is_none() {
            self.go_at = Some(self.now());
        }

        let (Some(go), Some(t)) = (self.go_at, trial) else {
            return KinematicSample::at_rest(self.hand);
        };
        let s = self.script;
        let since = self.now().saturating_sub(go).as_secs_f64() - s.reaction;
        let g = t.geometry;
        let via = g.via + s.aim;

        let (position, velocity) = if since <= 0.0 {
            (g.start, Vec2::ZERO)
        } else if since < s.first_leg {
            leg(g.start, via, since, s.first_leg)
        } else if since < s.first_leg + s.dwell {
            (via, Vec2::ZERO)
        } else {
            leg(via, g.target, since - s.first_leg - s.dwell, s.second_leg)
        };
        self.hand = position;
        KinematicSample::new(position, velocity)
    }

    /// One control period, plus an idle tick every tenth period.
    pub fn step(&mut self) -> Flow {
        self.control_step();
        if self.ticks % IDLE_EVERY != 0 {
            return Flow::Continue;
        }
        self.idle_step()
    }

    /// One control period with no idle tick.
    pub fn control_step(&mut self) {
        self.clock.advance(CONTROL_PERIOD);
        self.ticks += 1;

        let sample = self.sample();
        let force = self.machine.on_control_tick(sample, None);
        self.device.apply_force(force);
        self.observe();
    }

    pub fn idle_step(&mut self) -> Flow {
        let flow = self.machine.on_idle_tick(self.status);
        self.observe();
        flow
    }

    /// Shifts the resting hand, as a subject drifting off the start.
    pub fn displace_hand(&mut self, offset: Vec2) {
        self.hand = self.hand + offset;
    }

    fn observe(&mut self) {
        let state = self.machine.state();
        if self.history.last() != Some(&state) {
            self.history.push(state);
        }
    }

    /// Steps until `done` holds or the flow ends. Panics after `max_secs`
    /// of simulated time.
    pub fn run_until(&mut self, max_secs: f64, mut done: impl FnMut(&Machine) -> bool) -> Flow {
        let limit = self.now() + Duration::from_secs_f64(max_secs);
        while self.now() < limit {
            let flow = self.step();
            if flow.is_done() || done(&self.machine) {
                return flow;
            }
        }
        panic!(
            "condition not reached within {max_secs} s; state {} history {:?}",
            self.machine.state(),
            self.history
        );
    }

    pub fn run_to_state(&mut self, state: TrialState, max_secs: f64) {
        self.run_until(max_secs, |m| m.state() == state);
    }

    pub fn store(&self) -> &MemoryStore {
        self.machine.store()
    }

    pub fn presenter(&self) -> &RecordingPresenter {
        self.machine.presenter()
    }
}
