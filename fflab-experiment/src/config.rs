use std::path::Path;

use fflab_core::{MovementType, Vec2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What happens to a trial when a miss is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Stop the field and recording at once and emit the missed record.
    #[default]
    AbortOnMiss,
    /// Keep the trial running through the error display; abort and emit
    /// the record when the error wait ends.
    DeferAbort,
}

/// Pre-go delay drawn for each trial when the list is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DelayDistribution {
    Fixed(f64),
    /// `offset + Exp(lambda)`, redrawn while above `max`.
    Exponential { offset: f64, lambda: f64, max: f64 },
}

const MAX_DELAY_DRAWS: usize = 1000;

impl DelayDistribution {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            DelayDistribution::Fixed(delay) => delay,
            DelayDistribution::Exponential {
                offset,
                lambda,
                max,
            } => {
                for _ in 0..MAX_DELAY_DRAWS {
                    let u: f64 = rng.random_range(1e-5..1.0);
                    let delay = offset - u.ln() / lambda;
                    if delay <= max {
                        return delay;
                    }
                }
                max
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassiveMoveParams {
    /// Seconds to travel from start to end.
    pub movement_time: f64,
    /// Seconds the end position must be held within tolerance.
    pub hold_time: f64,
    /// Seconds for the spring to ramp in and out.
    pub ramp_time: f64,
    /// N/cm, negative for a restoring spring.
    pub spring_constant: f64,
    pub position_tolerance: f64,
    pub velocity_tolerance: f64,
}

impl Default for PassiveMoveParams {
    fn default() -> Self {
        Self {
            movement_time: 0.7,
            hold_time: 0.1,
            ramp_time: 0.1,
            spring_constant: -30.0,
            position_tolerance: 0.2,
            velocity_tolerance: 5.0,
        }
    }
}

impl PassiveMoveParams {
    /// Time a full passive move takes when the hand follows it.
    pub fn total_time(&self) -> f64 {
        self.movement_time + self.hold_time + self.ramp_time
    }
}

/// Session parameters. Distances are cm, speeds cm/s, times seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Norm limit on the commanded force (N).
    pub force_max: f64,
    /// Read the handle force/torque sensor each tick.
    pub robot_ft: bool,
    pub control_rate_hz: f64,
    pub idle_rate_hz: f64,
    pub passive_move: PassiveMoveParams,

    pub movement_type: MovementType,
    pub via_position: Vec2,
    pub movement_first_distance: f64,
    pub movement_second_distance: f64,
    pub via_radius: f64,
    /// Rectangular via region when both width and height are non-zero.
    pub via_width: f64,
    pub via_height: f64,
    pub cursor_radius: f64,
    pub start_tolerance: f64,
    pub finish_tolerance: f64,
    pub finish_tolerance_time: f64,
    pub moved_too_far_distance: f64,
    pub missed_via_distance: f64,

    pub via_tolerance_time: f64,
    pub via_not_moving_speed: f64,
    pub via_timeout_time: f64,
    pub movement_reaction_timeout: f64,
    pub movement_duration_timeout: f64,
    /// Seeds the running mean of full-movement durations.
    pub post_move_delay_init: f64,

    pub movement_first_too_fast: f64,
    pub movement_first_too_slow: f64,
    pub movement_second_too_fast: f64,
    pub movement_second_too_slow: f64,

    pub error_wait: f64,
    pub trial_delay: f64,
    /// Exponential pre-go delay: `offset + Exp(lambda)`, redrawn above `max`.
    /// Disabled when lambda is zero.
    pub trial_delay_offset: f64,
    pub trial_delay_lambda: f64,
    pub trial_delay_max: f64,
    pub inter_trial_delay: f64,
    pub feedback_time: f64,
    pub not_moving_speed: f64,
    pub not_moving_time: f64,

    pub force_field_ramp_time: f64,
    pub channel_width_ramp_time: f64,
    pub channel_width_initial: f64,

    /// Rest after this many trial-list entries have been run.
    pub rest_break_trials: Vec<usize>,
    pub rest_break_seconds: f64,

    /// Control ticks kept per trial attempt.
    pub frame_capacity: usize,
    pub miss_policy: MissPolicy,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            force_max: 40.0,
            robot_ft: false,
            control_rate_hz: 1000.0,
            idle_rate_hz: 60.0,
            passive_move: PassiveMoveParams::default(),

            movement_type: MovementType::OutOnly,
            via_position: Vec2::ZERO,
            movement_first_distance: 10.0,
            movement_second_distance: 10.0,
            via_radius: 0.5,
            via_width: 0.0,
            via_height: 0.0,
            cursor_radius: 0.5,
            start_tolerance: 0.5,
            finish_tolerance: 0.5,
            finish_tolerance_time: 0.1,
            moved_too_far_distance: 0.0,
            missed_via_distance: 0.0,

            via_tolerance_time: 0.05,
            via_not_moving_speed: 5.0,
            via_timeout_time: 0.15,
            movement_reaction_timeout: 0.5,
            movement_duration_timeout: 0.8,
            post_move_delay_init: 0.0,

            movement_first_too_fast: 0.0,
            movement_first_too_slow: 0.0,
            movement_second_too_fast: 0.0,
            movement_second_too_slow: 0.0,

            error_wait: 0.75,
            trial_delay: 0.3,
            trial_delay_offset: 0.0,
            trial_delay_lambda: 0.0,
            trial_delay_max: 0.0,
            inter_trial_delay: 0.5,
            feedback_time: 0.5,
            not_moving_speed: 1.0,
            not_moving_time: 0.1,

            force_field_ramp_time: 0.05,
            channel_width_ramp_time: 0.05,
            channel_width_initial: 0.0,

            rest_break_trials: Vec::new(),
            rest_break_seconds: 30.0,

            frame_capacity: 10_000,
            miss_policy: MissPolicy::AbortOnMiss,
        }
    }
}

impl ExperimentConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("force_max", self.force_max)?;
        positive("control_rate_hz", self.control_rate_hz)?;
        positive("idle_rate_hz", self.idle_rate_hz)?;
        if self.frame_capacity == 0 {
            return Err(ConfigError::invalid("frame_capacity", "must be at least one row"));
        }

        for (name, v) in [
            ("via_radius", self.via_radius),
            ("via_width", self.via_width),
            ("via_height", self.via_height),
            ("start_tolerance", self.start_tolerance),
            ("finish_tolerance", self.finish_tolerance),
            ("finish_tolerance_time", self.finish_tolerance_time),
            ("via_tolerance_time", self.via_tolerance_time),
            ("via_timeout_time", self.via_timeout_time),
            ("movement_reaction_timeout", self.movement_reaction_timeout),
            ("movement_duration_timeout", self.movement_duration_timeout),
            ("error_wait", self.error_wait),
            ("trial_delay", self.trial_delay),
            ("inter_trial_delay", self.inter_trial_delay),
            ("feedback_time", self.feedback_time),
            ("not_moving_speed", self.not_moving_speed),
            ("not_moving_time", self.not_moving_time),
            ("force_field_ramp_time", self.force_field_ramp_time),
            ("channel_width_ramp_time", self.channel_width_ramp_time),
            ("channel_width_initial", self.channel_width_initial),
            ("passive_move.movement_time", self.passive_move.movement_time),
            ("passive_move.hold_time", self.passive_move.hold_time),
            ("passive_move.ramp_time", self.passive_move.ramp_time),
        ] {
            non_negative(name, v)?;
        }
        positive("passive_move.movement_time", self.passive_move.movement_time)?;

        if self.trial_delay_lambda != 0.0 {
            positive("trial_delay_lambda", self.trial_delay_lambda)?;
            non_negative("trial_delay_offset", self.trial_delay_offset)?;
            if self.trial_delay_max <= self.trial_delay_offset {
                return Err(ConfigError::invalid(
                    "trial_delay_max",
                    format!(
                        "{} must exceed trial_delay_offset {}",
                        self.trial_delay_max, self.trial_delay_offset
                    ),
                ));
            }
        }

        if !self.rest_break_trials.is_empty() {
            positive("rest_break_seconds", self.rest_break_seconds)?;
            if self.rest_break_trials.contains(&0) {
                return Err(ConfigError::invalid(
                    "rest_break_trials",
                    "a rest break cannot come before the first trial",
                ));
            }
            if self.rest_break_trials.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ConfigError::invalid(
                    "rest_break_trials",
                    "entries must be strictly increasing",
                ));
            }
        }

        Ok(())
    }

    pub fn delay_distribution(&self) -> DelayDistribution {
        if self.trial_delay_lambda != 0.0 {
            DelayDistribution::Exponential {
                offset: self.trial_delay_offset,
                lambda: self.trial_delay_lambda,
                max: self.trial_delay_max,
            }
        } else {
            DelayDistribution::Fixed(self.trial_delay)
        }
    }

    pub fn via_is_rectangle(&self) -> bool {
        self.via_width * self.via_height != 0.0
    }
}

fn positive(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{v} is not positive")))
    }
}

fn non_negative(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{v} is negative or not finite")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ExperimentConfig::default().validate().unwrap();
    }

    #[test]
    fn json_round_trip_and_partial_files() {
        let config = ExperimentConfig {
            via_position: Vec2::new(0.0, 20.0),
            rest_break_trials: vec![50, 100],
            miss_policy: MissPolicy::DeferAbort,
            ..Default::default()
        };
        let text = serde_json::to_string_pretty(&config).unwrap();
        let back: ExperimentConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);

        let partial: ExperimentConfig =
            serde_json::from_str(r#"{ "force_max": 25.0, "passive_move": { "hold_time": 0.2 } }"#)
                .unwrap();
        assert_eq!(partial.force_max, 25.0);
        assert_eq!(partial.passive_move.hold_time, 0.2);
        assert_eq!(partial.passive_move.movement_time, 0.7);
        assert_eq!(partial.error_wait, 0.75);
    }

    #[test]
    fn rejects_bad_limits() {
        let bad = |c: ExperimentConfig| c.validate().unwrap_err();

        assert!(matches!(
            bad(ExperimentConfig { force_max: 0.0, ..Default::default() }),
            ConfigError::Invalid { field: "force_max", .. }
        ));
        assert!(matches!(
            bad(ExperimentConfig { control_rate_hz: 0.0, ..Default::default() }),
            ConfigError::Invalid { field: "control_rate_hz", .. }
        ));
        assert!(matches!(
            bad(ExperimentConfig {
                rest_break_trials: vec![10, 5],
                ..Default::default()
            }),
            ConfigError::Invalid { field: "rest_break_trials", .. }
        ));
        assert!(matches!(
            bad(ExperimentConfig {
                rest_break_trials: vec![10],
                rest_break_seconds: 0.0,
                ..Default::default()
            }),
            ConfigError::Invalid { field: "rest_break_seconds", .. }
        ));
        assert!(matches!(
            bad(ExperimentConfig {
                trial_delay_lambda: 2.0,
                trial_delay_offset: 0.5,
                trial_delay_max: 0.5,
                ..Default::default()
            }),
            ConfigError::Invalid { field: "trial_delay_max", .. }
        ));
    }

    #[test]
    fn exponential_delays_stay_in_range() {
        use rand::SeedableRng;

        let config = ExperimentConfig {
            trial_delay_offset: 0.4,
            trial_delay_lambda: 4.0,
            trial_delay_max: 1.0,
            ..Default::default()
        };
        let dist = config.delay_distribution();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let draws: Vec<f64> = (0..500).map(|_| dist.sample(&mut rng)).collect();
        assert!(draws.iter().all(|d| (0.4..=1.0).contains(d)));
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!(mean > 0.5 && mean < 0.8, "mean {mean}");

        let fixed = ExperimentConfig::default().delay_distribution();
        assert_eq!(fixed, DelayDistribution::Fixed(0.3));
        assert_eq!(fixed.sample(&mut rng), 0.3);
    }

    #[test]
    fn from_file_reports_path() {
        let err = ExperimentConfig::from_file("/nonexistent/fflab.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fflab.json"));
    }
}
