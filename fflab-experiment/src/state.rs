use std::borrow::Cow;
use std::time::Duration;

use fflab_core::{
    ChannelOrder, FrameRecord, HandleLoad, KinematicSample, MissCounts, MissReason,
    MovementOrder, TrialOutcome, TrialRecord, TrialSpec, TrialState, Vec2,
};
use fflab_timing::{Clock, LoopMonitor, LoopStats, RunningStats, Timer};
use tracing::{debug, error, info, warn};

use crate::config::{ExperimentConfig, MissPolicy};
use crate::detector::{is_home, MovementDetector, Region};
use crate::device::{DeviceStatus, HapticDevice};
use crate::error::{ExperimentError, StoreError, TrialListError};
use crate::feedback::{speed_feedback, Feedback};
use crate::field::ForceFieldEngine;
use crate::passive::PassiveMove;
use crate::present::{
    compose_display, progress_from_start, uses_target_resolve, Cue, Presenter, Scene,
};
use crate::recorder::TrialRecordAccumulator;
use crate::store::TrialStore;
use crate::trial_list::TrialSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The device reported an unsafe condition.
    Unsafe,
    /// A trial row could not be written.
    StoreFailed,
}

/// What the driver should do after an idle tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Every trial in the list has been run.
    Finished,
    Shutdown(ShutdownReason),
}

impl Flow {
    pub fn is_done(&self) -> bool {
        !matches!(self, Flow::Continue)
    }
}

#[derive(Debug, Clone, Copy)]
struct Timers {
    state: Timer,
    trial: Timer,
    experiment: Timer,
    inter_trial: Timer,
    reaction: Timer,
    duration: Timer,
    first_leg: Timer,
    second_leg: Timer,
    passing_via: Timer,
    via_not_moving: Timer,
}

impl Timers {
    const fn new() -> Self {
        Self {
            state: Timer::new("state"),
            trial: Timer::new("trial"),
            experiment: Timer::new("experiment"),
            inter_trial: Timer::new("inter-trial"),
            reaction: Timer::new("reaction"),
            duration: Timer::new("duration"),
            first_leg: Timer::new("first-leg"),
            second_leg: Timer::new("second-leg"),
            passing_via: Timer::new("passing-via"),
            via_not_moving: Timer::new("via-not-moving"),
        }
    }
}

/// Timings latched during one attempt.
#[derive(Debug, Clone, Copy, Default)]
struct Measures {
    reaction_time: Option<f64>,
    movement_duration: Option<f64>,
    first_leg_time: Option<f64>,
    second_leg_time: Option<f64>,
    passing_via_time: Option<f64>,
    via_not_moving_time: Option<f64>,
    post_move_delay: Option<f64>,
    trial_duration: Option<f64>,
}

impl Measures {
    fn apply(&self, row: &mut TrialRecord) {
        row.reaction_time = self.reaction_time;
        row.movement_duration = self.movement_duration;
        row.first_leg_time = self.first_leg_time;
        row.second_leg_time = self.second_leg_time;
        row.passing_via_time = self.passing_via_time;
        row.via_not_moving_time = self.via_not_moving_time;
        row.post_move_delay = self.post_move_delay;
        row.trial_duration = self.trial_duration;
    }
}

/// The trial sequencer and everything it mutates.
///
/// Driven from one thread through two entry points: [`on_control_tick`]
/// at the servo rate, which advances only the loop-task states and returns
/// the force to apply, and [`on_idle_tick`] at display rate, which advances
/// every other state, saves finished rows and refreshes the display.
///
/// [`on_control_tick`]: ExperimentStateMachine::on_control_tick
/// [`on_idle_tick`]: ExperimentStateMachine::on_idle_tick
pub struct ExperimentStateMachine<C, S, W, P, M>
where
    C: Clock,
    S: TrialSource,
    W: TrialStore,
    P: Presenter,
    M: PassiveMove,
{
    clock: C,
    config: ExperimentConfig,
    source: S,
    store: W,
    presenter: P,
    engine: ForceFieldEngine<M>,
    detector: MovementDetector,
    recorder: TrialRecordAccumulator,
    monitor: LoopMonitor,

    state: TrialState,
    last_state: TrialState,
    first: bool,
    error_resume: TrialState,

    trial_index: usize,
    trial: Option<TrialSpec>,
    via_region: Region,
    trial_running: bool,
    attempt: u32,
    misses: MissCounts,
    deferred_miss: Option<MissReason>,
    pending_record: Option<TrialRecord>,
    pending_cue: Option<Cue>,
    store_failed: bool,

    timers: Timers,
    measures: Measures,
    via_dwell: f64,
    target_resolved: bool,
    full_movement_times: RunningStats,

    sample: KinematicSample,
    handle: HandleLoad,
    robot_active: bool,
    last_latency: Duration,
    message: Cow<'static, str>,
    rest_index: usize,
    rest_fraction: Option<f64>,
}

impl<C, S, W, P, M> ExperimentStateMachine<C, S, W, P, M>
where
    C: Clock,
    S: TrialSource,
    W: TrialStore,
    P: Presenter,
    M: PassiveMove,
{
    pub fn new(
        config: ExperimentConfig,
        clock: C,
        source: S,
        store: W,
        presenter: P,
        passive: M,
    ) -> Result<Self, ExperimentError> {
        config.validate()?;
        if source.trial_count() == 0 {
            return Err(TrialListError::Empty.into());
        }

        let mut full_movement_times = RunningStats::new();
        full_movement_times.push(config.post_move_delay_init);

        Ok(Self {
            engine: ForceFieldEngine::new(&config, passive),
            detector: MovementDetector::new(&config),
            recorder: TrialRecordAccumulator::new(config.frame_capacity),
            via_region: Region::via(config.via_position, &config),
            monitor: LoopMonitor::new(),
            clock,
            source,
            store,
            presenter,

            state: TrialState::Initialize,
            last_state: TrialState::Initialize,
            first: true,
            error_resume: TrialState::Setup,

            trial_index: 0,
            trial: None,
            trial_running: false,
            attempt: 0,
            misses: MissCounts::default(),
            deferred_miss: None,
            pending_record: None,
            pending_cue: None,
            store_failed: false,

            timers: Timers::new(),
            measures: Measures::default(),
            via_dwell: 0.0,
            target_resolved: false,
            full_movement_times,

            sample: KinematicSample::default(),
            handle: HandleLoad::default(),
            robot_active: false,
            last_latency: Duration::ZERO,
            message: Cow::Borrowed(""),
            rest_index: 0,
            rest_fraction: None,
            config,
        })
    }

    /// Opens the device, the data store and the field engine, then starts
    /// the servo loop on the device.
    pub fn open_device<D: HapticDevice>(&mut self, device: &mut D) -> Result<(), ExperimentError> {
        device.open()?;
        self.store.open()?;
        self.engine.open(self.clock.now())?;
        device.start()?;
        info!(
            hz = device.loop_frequency(),
            trials = self.source.trial_count(),
            "device started"
        );
        Ok(())
    }

    /// Servo-rate entry point. Returns the force to command.
    pub fn on_control_tick(&mut self, sample: KinematicSample, handle: Option<HandleLoad>) -> Vec2 {
        let now = self.clock.now();
        let period = self.monitor.tick_start(now);
        self.sample = sample;
        if let Some(load) = handle {
            self.handle = load;
        }

        let raw = self.engine.field_force(now, &sample);
        self.engine.update_overshoot(sample.position);

        if self.state.is_loop_task() {
            self.process_loop_task(now);
        }

        let (force, ramp) = self.engine.output(now, raw);
        self.recorder.append_frame_if_recording(FrameRecord {
            trial_time: self.timers.trial.elapsed_secs(now),
            state: self.state,
            loop_latency: self.last_latency.as_secs_f64(),
            loop_period: period.as_secs_f64(),
            position: sample.position,
            velocity: sample.velocity,
            force,
            handle: self.handle,
            cursor: sample.position,
            ramp,
            target_resolved: self.target_resolved,
            passive: self.engine.passive_state(),
        });

        self.last_latency = self.monitor.tick_end(self.clock.now());
        force
    }

    /// Display-rate entry point.
    pub fn on_idle_tick(&mut self, status: DeviceStatus) -> Flow {
        let now = self.clock.now();

        if !status.safe {
            if self.state != TrialState::Exit {
                error!(trial = self.trial_index, "robot not safe");
                self.flush_missed(now);
                if self.trial_running {
                    self.abort_trial(now);
                }
                self.goto(now, TrialState::Exit);
            }
            return Flow::Shutdown(ShutdownReason::Unsafe);
        }
        self.robot_active = status.is_active();

        if self.trial_running && self.deferred_miss.is_none() {
            if !self.robot_active {
                self.raise_miss(now, MissReason::RobotInactive, reason_message(MissReason::RobotInactive));
            } else if self.recorder.is_full() {
                self.raise_miss(now, MissReason::FrameDataFull, reason_message(MissReason::FrameDataFull));
            }
        }

        if !self.state.is_loop_task() {
            self.process_idle(now);
        }

        if let Some(record) = self.pending_record.take() {
            self.save_record(now, &record);
        }
        if let Some(cue) = self.pending_cue.take() {
            self.presenter.play_cue(cue);
        }
        if self.state == TrialState::Exit {
            self.enter_exit(now);
        }

        self.update_target_resolve();
        let display = compose_display(
            Scene {
                state: self.state,
                trial: self.trial.as_ref(),
                position: self.sample.position,
                target_resolved: self.target_resolved,
                start_tolerance: self.config.start_tolerance,
                second_distance: self.config.movement_second_distance,
            },
            self.message.clone(),
            self.rest_fraction,
        );
        self.presenter.present(&display);

        match self.state {
            TrialState::Exit if self.store_failed => Flow::Shutdown(ShutdownReason::StoreFailed),
            TrialState::Exit => Flow::Finished,
            _ => Flow::Continue,
        }
    }

    /// Fades the field out, stops and closes the device, closes the store
    /// and logs loop timing.
    pub fn shutdown<D: HapticDevice>(&mut self, device: &mut D) {
        let now = self.clock.now();
        self.flush_missed(now);
        if self.trial_running {
            self.abort_trial(now);
        }
        self.engine.shutdown(now);
        device.apply_force(Vec2::ZERO);
        device.stop();
        device.close();
        if let Err(e) = self.store.close() {
            error!(error = %e, "cannot close data file");
        }

        let period = self.monitor.period_stats();
        let latency = self.monitor.latency_stats();
        info!(
            samples = period.samples,
            hz = period.effective_hz,
            mean_ms = period.mean_ns / 1e6,
            jitter_ms = period.jitter_ns / 1e6,
            max_ms = period.max_ns / 1e6,
            "control loop period"
        );
        info!(
            mean_us = latency.mean_ns / 1e3,
            max_us = latency.max_ns / 1e3,
            "control loop latency"
        );
        info!(
            trials = self.trial_index + 1,
            misses = self.misses.total,
            "session closed"
        );
    }

    fn process_loop_task(&mut self, now: Duration) {
        debug_assert!(self.state.is_loop_task(), "{} is an idle state", self.state);
        let Some(trial) = self.trial else {
            return;
        };
        let position = self.sample.position;

        match self.state {
            TrialState::MoveWait => {
                if self.detector.movement_started(position, trial.geometry.start)
                    || trial.is_passive_move()
                    || trial.is_passive_wait()
                {
                    self.timers.duration.reset(now);
                    self.timers.first_leg.reset(now);
                    self.measures.reaction_time = Some(self.timers.reaction.elapsed_secs(now));
                    self.goto(now, TrialState::Moving0);
                } else if self
                    .timers
                    .reaction
                    .expired_secs(now, self.config.movement_reaction_timeout)
                {
                    self.goto(now, TrialState::TimeOut);
                }
            }
            TrialState::Moving0 => self.moving0(now, &trial),
            TrialState::ViaPoint => self.via_point(now, &trial),
            TrialState::Moving1 => {
                if self
                    .detector
                    .movement_finished(now, position, trial.geometry.finish)
                {
                    let duration = self.timers.duration.elapsed_secs(now);
                    self.measures.second_leg_time = Some(self.timers.second_leg.elapsed_secs(now));
                    self.measures.movement_duration = Some(duration);
                    self.full_movement_times.push(duration);
                    if trial.channel_order == ChannelOrder::Second {
                        self.engine.stop(now);
                    }
                    self.goto(now, TrialState::Finish);
                } else if self
                    .timers
                    .duration
                    .expired_secs(now, self.config.movement_duration_timeout)
                {
                    self.goto(now, TrialState::TimeOut);
                }
            }
            TrialState::PostMoveDelay => {
                let delay = self.measures.post_move_delay.unwrap_or(0.0);
                if self.timers.state.expired_secs(now, delay) {
                    self.goto(now, TrialState::Finish);
                }
            }
            _ => {}
        }
    }

    fn moving0(&mut self, now: Duration, trial: &TrialSpec) {
        let position = self.sample.position;

        if trial.is_passive_move() {
            if self.engine.passive_finished() {
                self.measures.movement_duration = Some(self.timers.duration.elapsed_secs(now));
                self.goto(now, TrialState::Finish);
            }
            return;
        }

        if trial.is_passive_wait() {
            let duration = self.timers.duration.elapsed_secs(now);
            self.measures.movement_duration = Some(duration);
            self.measures.post_move_delay = Some(self.post_move_delay(duration));
            self.goto(now, TrialState::PostMoveDelay);
            return;
        }

        if self
            .timers
            .duration
            .expired_secs(now, self.config.movement_duration_timeout)
        {
            self.goto(now, TrialState::TimeOut);
            return;
        }

        if trial.context.kind.is_full_movement() {
            if self.via_region.contains(position) {
                self.measures.first_leg_time = Some(self.timers.first_leg.elapsed_secs(now));
                self.timers.passing_via.reset(now);
                self.timers.via_not_moving.reset(now);
                if trial.channel_order == ChannelOrder::First {
                    self.engine.stop(now);
                }
                self.goto(now, TrialState::ViaPoint);
            } else if self.engine.missed_via() {
                self.raise_miss(now, MissReason::MissedVia, reason_message(MissReason::MissedVia));
            }
        } else if self
            .detector
            .movement_finished(now, position, trial.geometry.finish)
        {
            let duration = self.timers.duration.elapsed_secs(now);
            self.measures.first_leg_time = Some(self.timers.first_leg.elapsed_secs(now));
            self.measures.movement_duration = Some(duration);
            self.measures.post_move_delay = Some(self.post_move_delay(duration));
            if trial.channel_order == ChannelOrder::First {
                self.engine.stop(now);
            }
            let next = if trial.movement_order == MovementOrder::SingleMovement {
                TrialState::Finish
            } else {
                TrialState::PostMoveDelay
            };
            self.goto(now, next);
        }
    }

    fn via_point(&mut self, now: Duration, trial: &TrialSpec) {
        let position = self.sample.position;
        let tolerance = self.config.via_tolerance_time;

        if self
            .timers
            .duration
            .expired_secs(now, self.config.movement_duration_timeout)
        {
            self.goto(now, TrialState::TimeOut);
            return;
        }

        let timeout = self.config.via_timeout_time;
        if timeout != 0.0 && self.via_dwell >= timeout {
            self.raise_miss(now, MissReason::ViaTooLong, reason_message(MissReason::ViaTooLong));
            return;
        }

        // The dwell clock restarts on fast movement until a dwell is latched.
        if self.via_dwell == 0.0 && self.sample.speed >= self.config.via_not_moving_speed {
            self.timers.via_not_moving.reset(now);
        }
        if self.timers.via_not_moving.expired_secs(now, tolerance) {
            self.via_dwell = self.timers.via_not_moving.elapsed_secs(now);
            self.measures.via_not_moving_time = Some(self.via_dwell);
        }

        if self.via_dwell >= tolerance
            && trial.channel_order == ChannelOrder::Second
            && !self.engine.is_started()
        {
            self.engine.start(now, position);
        }

        if !self.via_region.contains(position) {
            self.measures.passing_via_time = Some(self.timers.passing_via.elapsed_secs(now));
            if self.via_dwell < tolerance {
                self.raise_miss(now, MissReason::ViaTooShort, reason_message(MissReason::ViaTooShort));
                return;
            }
            self.timers.second_leg.reset(now);
            self.goto(now, TrialState::Moving1);
        }
    }

    /// Mean full-movement duration less this movement's, never negative.
    fn post_move_delay(&self, duration: f64) -> f64 {
        (self.full_movement_times.mean() - duration).max(0.0)
    }

    fn process_idle(&mut self, now: Duration) {
        debug_assert!(!self.state.is_loop_task(), "{} runs in the control tick", self.state);
        let position = self.sample.position;

        match self.state {
            TrialState::Initialize => {
                self.timers.experiment.reset(now);
                self.goto(now, TrialState::Setup);
            }
            TrialState::Setup => {
                let still = self.detector.not_moving(now, self.sample.speed);
                if !(still && self.robot_active) {
                    return;
                }
                let Some(trial) = self.trial_setup() else {
                    self.goto(now, TrialState::Exit);
                    return;
                };
                // A passive return after the final trial leads nowhere.
                if trial.is_passive_move() && self.trial_index + 1 == self.source.trial_count() {
                    self.goto(now, TrialState::Exit);
                    return;
                }
                self.goto(now, TrialState::Home);
            }
            TrialState::Home => {
                let Some(trial) = self.trial else {
                    return;
                };
                if trial.is_passive_move() {
                    self.goto(now, TrialState::Start);
                    return;
                }
                let still = self.detector.not_moving(now, self.sample.speed);
                if still
                    && is_home(position, trial.geometry.start, self.config.start_tolerance)
                    && self.robot_active
                {
                    self.goto(now, TrialState::Start);
                }
            }
            TrialState::Start => {
                let Some(trial) = self.trial else {
                    return;
                };
                self.trial_start(now, &trial);
                let next = if trial.is_passive_move() {
                    TrialState::MoveWait
                } else {
                    TrialState::Delay
                };
                self.goto(now, next);
            }
            TrialState::Delay => {
                let Some(trial) = self.trial else {
                    return;
                };
                if trial.is_held_return() {
                    if self
                        .timers
                        .state
                        .expired_secs(now, self.config.passive_move.total_time())
                    {
                        self.goto(now, TrialState::Finish);
                    }
                    return;
                }
                if self.timers.state.expired_secs(now, trial.trial_delay) {
                    self.goto(now, TrialState::Go);
                } else if self.detector.movement_started(position, trial.geometry.start) {
                    self.raise_miss(now, MissReason::MoveTooSoon, reason_message(MissReason::MoveTooSoon));
                }
            }
            TrialState::Go => {
                if !self.trial.is_some_and(|t| t.is_passive_wait()) {
                    self.presenter.play_cue(Cue::Go);
                }
                self.timers.reaction.reset(now);
                self.goto(now, TrialState::MoveWait);
            }
            TrialState::Finish => {
                self.stop_trial(now);
                if let Some(record) = self.finalize(now, TrialOutcome::Completed) {
                    if !self.save_record(now, &record) {
                        return;
                    }
                }
                self.goto(now, TrialState::Feedback);
            }
            TrialState::Feedback => {
                let Some(trial) = self.trial else {
                    return;
                };
                if self.take_first() && !trial.is_passive_wait() {
                    self.show_feedback(&trial);
                }
                if self.timers.state.expired_secs(now, self.config.feedback_time)
                    || trial.is_passive_move()
                {
                    if self.rest_break_now(now) {
                        self.message = Cow::Borrowed("");
                        self.goto(now, TrialState::Rest);
                    } else {
                        self.goto(now, TrialState::Next);
                    }
                }
            }
            TrialState::Next => {
                if self.trial_index + 1 >= self.source.trial_count() {
                    self.goto(now, TrialState::Exit);
                    return;
                }
                self.trial_index += 1;
                self.attempt = 0;
                if self.last_state == TrialState::Rest && !self.robot_active {
                    self.trial_setup();
                }
                self.goto(now, TrialState::InterTrial);
            }
            TrialState::InterTrial => {
                if self
                    .timers
                    .inter_trial
                    .expired_secs(now, self.config.inter_trial_delay)
                {
                    self.message = Cow::Borrowed("");
                    self.goto(now, TrialState::Setup);
                }
            }
            TrialState::Exit => self.enter_exit(now),
            TrialState::TimeOut => {
                let message = timeout_message(self.last_state);
                self.raise_miss(now, MissReason::TimeOut, message);
            }
            TrialState::Error => {
                if !self.timers.state.expired_secs(now, self.config.error_wait) {
                    return;
                }
                if let Some(reason) = self.deferred_miss.take() {
                    self.abort_trial(now);
                    if let Some(record) = self.finalize(now, TrialOutcome::Missed(reason)) {
                        if !self.save_record(now, &record) {
                            return;
                        }
                    }
                }
                self.message = Cow::Borrowed("");
                self.goto(now, self.error_resume);
            }
            TrialState::Rest => {
                let seconds = self.config.rest_break_seconds;
                let remaining = seconds - self.timers.state.elapsed_secs(now);
                self.rest_fraction = Some((remaining / seconds).max(0.0));
                if remaining <= 0.0 {
                    self.rest_fraction = None;
                    self.goto(now, TrialState::Next);
                }
            }
            TrialState::MoveWait
            | TrialState::Moving0
            | TrialState::ViaPoint
            | TrialState::Moving1
            | TrialState::PostMoveDelay => {}
        }
    }

    fn goto(&mut self, now: Duration, next: TrialState) {
        if self.state == next {
            return;
        }
        debug!(
            from = %self.state,
            to = %next,
            ms = self.timers.state.elapsed_secs(now) * 1e3,
            "state"
        );
        self.timers.state.reset(now);
        self.first = true;
        self.last_state = self.state;
        self.state = next;
    }

    /// True once per state entry.
    fn take_first(&mut self) -> bool {
        std::mem::replace(&mut self.first, false)
    }

    fn trial_setup(&mut self) -> Option<TrialSpec> {
        let Some(trial) = self.source.load_trial(self.trial_index) else {
            error!(trial = self.trial_index, "trial missing from list");
            return None;
        };
        self.engine.load_trial(&trial);
        self.via_region = Region::via(trial.geometry.via, &self.config);
        self.trial = Some(trial);
        self.trial_running = false;
        info!(
            trial = trial.index,
            field = %trial.field.kind,
            context = %trial.context.kind,
            order = ?trial.movement_order,
            "trial setup"
        );
        Some(trial)
    }

    fn trial_start(&mut self, now: Duration, trial: &TrialSpec) {
        self.attempt += 1;
        self.recorder
            .begin_trial(trial, self.attempt, self.timers.experiment.elapsed_secs(now));
        self.timers.trial.reset(now);
        self.timers.reaction.reset(now);
        self.trial_running = true;

        self.measures = Measures::default();
        self.via_dwell = 0.0;
        self.target_resolved = false;
        self.engine.begin_trial();
        self.engine.clear_passive_endpoints();
        self.detector.reset(now);

        if trial.channel_order == ChannelOrder::First || trial.is_passive_move() {
            self.engine.start(now, self.sample.position);
        }
        self.recorder.start_recording_frames();

        info!(
            trial = trial.index,
            attempt = self.attempt,
            phase = trial.phase,
            target_angle = trial.context.target_angle(),
            field = %trial.field.kind,
            "starting trial"
        );
    }

    fn stop_trial(&mut self, now: Duration) {
        self.trial_running = false;
        self.recorder.stop_recording_frames();
        self.engine.stop(now);
        self.measures.trial_duration = Some(self.timers.trial.elapsed_secs(now));
        self.timers.inter_trial.reset(now);
        info!(trial = self.trial_index, "stopping trial");
    }

    fn abort_trial(&mut self, now: Duration) {
        self.trial_running = false;
        self.recorder.stop_recording_frames();
        self.engine.stop(now);
        debug!(trial = self.trial_index, attempt = self.attempt, "aborting trial");
    }

    /// Counts the miss and shows the error. The attempt is aborted now or,
    /// under [`MissPolicy::DeferAbort`], when the error display ends.
    fn raise_miss(&mut self, now: Duration, reason: MissReason, message: Cow<'static, str>) {
        self.misses.record(reason);
        match self.config.miss_policy {
            MissPolicy::AbortOnMiss => {
                self.abort_trial(now);
                self.pending_record = self.finalize(now, TrialOutcome::Missed(reason));
            }
            MissPolicy::DeferAbort => self.deferred_miss = Some(reason),
        }

        let percent = self.misses.percent_of((self.trial_index + 1) as u32);
        warn!(
            trial = self.trial_index,
            attempt = self.attempt,
            ?reason,
            total = self.misses.total,
            percent = percent.round(),
            "miss trial"
        );

        self.message = message;
        self.pending_cue = Some(Cue::Error);
        self.error_resume = TrialState::Setup;
        self.goto(now, TrialState::Error);
    }

    /// Saves a miss that was counted but whose row has not been written yet.
    fn flush_missed(&mut self, now: Duration) {
        if let Some(reason) = self.deferred_miss.take() {
            self.abort_trial(now);
            self.pending_record = self.finalize(now, TrialOutcome::Missed(reason));
        }
        if let Some(record) = self.pending_record.take() {
            self.save_record(now, &record);
        }
    }

    fn finalize(&mut self, now: Duration, outcome: TrialOutcome) -> Option<TrialRecord> {
        let experiment_time = self.timers.experiment.elapsed_secs(now);
        let (passive_start, passive_end) = self.engine.passive_endpoints();
        if let Some(row) = self.recorder.row_mut() {
            self.measures.apply(row);
            row.experiment_time = experiment_time;
            row.passive_start = passive_start;
            row.passive_end = passive_end;
        }
        let record = self
            .recorder
            .finalize_trial_row(self.trial_index, outcome, self.misses);
        if record.is_none() {
            warn!(trial = self.trial_index, "no open trial row to finalize");
        }
        record
    }

    fn write_record(&mut self, record: &TrialRecord) -> Result<(), StoreError> {
        self.store
            .save_frames(record.trial, record.attempt, self.recorder.frames())?;
        self.store.save_trial(record)
    }

    /// Returns false when the store failed and the run is ending.
    fn save_record(&mut self, now: Duration, record: &TrialRecord) -> bool {
        match self.write_record(record) {
            Ok(()) => {
                debug!(
                    trial = record.trial,
                    attempt = record.attempt,
                    frames = record.frame_count,
                    "trial saved"
                );
                true
            }
            Err(e) => {
                error!(trial = record.trial, error = %e, "cannot save trial");
                self.store_failed = true;
                self.goto(now, TrialState::Exit);
                false
            }
        }
    }

    fn show_feedback(&mut self, trial: &TrialSpec) {
        let first = self.measures.first_leg_time.unwrap_or(0.0);
        let second = self.measures.second_leg_time.unwrap_or(0.0);
        match speed_feedback(&self.config, trial, first, second, self.engine.moved_too_far()) {
            Feedback::None => {}
            Feedback::Text(text) => self.message = Cow::Borrowed(text),
            Feedback::Error(text) => {
                self.message = Cow::Borrowed(text);
                self.presenter.play_cue(Cue::Error);
            }
        }
        debug!(first_leg = first, second_leg = second, "movement times");
    }

    fn rest_break_now(&mut self, now: Duration) -> bool {
        let done = self.trial_index + 1;
        if self.config.rest_break_trials.get(self.rest_index) != Some(&done) {
            return false;
        }
        self.rest_index += 1;

        let total = self.source.trial_count();
        let minutes_per_trial = self.timers.experiment.elapsed_secs(now) / 60.0 / done as f64;
        info!(
            rest = self.rest_index,
            breaks = self.config.rest_break_trials.len(),
            seconds = self.config.rest_break_seconds,
            trial = done,
            total,
            percent_done = (100.0 * done as f64 / total as f64).round(),
            minutes_remaining = minutes_per_trial * (total - done) as f64,
            "rest break"
        );
        self.rest_fraction = Some(1.0);
        true
    }

    fn enter_exit(&mut self, now: Duration) {
        if !self.take_first() {
            return;
        }
        let minutes = self.timers.experiment.elapsed_secs(now) / 60.0;
        self.message = Cow::Owned(format!("Game Over ({minutes:.1} minutes)"));
        info!(minutes, misses = self.misses.total, "experiment over");
    }

    fn update_target_resolve(&mut self) {
        if !self.trial_running || self.target_resolved {
            return;
        }
        let Some(trial) = self.trial.as_ref() else {
            return;
        };
        if uses_target_resolve(trial.context.kind)
            && progress_from_start(trial, self.sample.position) > trial.context.resolve_distance()
        {
            self.target_resolved = true;
        }
    }

    pub fn state(&self) -> TrialState {
        self.state
    }

    pub fn last_state(&self) -> TrialState {
        self.last_state
    }

    pub fn trial_index(&self) -> usize {
        self.trial_index
    }

    pub fn current_trial(&self) -> Option<&TrialSpec> {
        self.trial.as_ref()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_trial_running(&self) -> bool {
        self.trial_running
    }

    pub fn misses(&self) -> &MissCounts {
        &self.misses
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn target_resolved(&self) -> bool {
        self.target_resolved
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn engine(&self) -> &ForceFieldEngine<M> {
        &self.engine
    }

    pub fn recorder(&self) -> &TrialRecordAccumulator {
        &self.recorder
    }

    pub fn store(&self) -> &W {
        &self.store
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn period_stats(&self) -> LoopStats {
        self.monitor.period_stats()
    }

    pub fn latency_stats(&self) -> LoopStats {
        self.monitor.latency_stats()
    }
}

fn reason_message(reason: MissReason) -> Cow<'static, str> {
    Cow::Borrowed(reason.message())
}

fn timeout_message(state: TrialState) -> Cow<'static, str> {
    match state {
        TrialState::MoveWait => Cow::Borrowed("Move After Beep"),
        TrialState::Moving0 | TrialState::Moving1 => Cow::Borrowed("Too Slow"),
        TrialState::ViaPoint => Cow::Borrowed("Too Long at CT"),
        other => Cow::Owned(format!("{other} TimeOut")),
    }
}
