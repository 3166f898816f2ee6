use fflab_core::TrialSpec;

use crate::config::ExperimentConfig;

/// Post-trial message for the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    None,
    Text(&'static str),
    /// Shown with the error cue.
    Error(&'static str),
}

/// Speed feedback from the leg times of a completed trial.
///
/// Thresholds of zero are disabled. Slow wins over fast when both apply.
pub fn speed_feedback(
    config: &ExperimentConfig,
    trial: &TrialSpec,
    first_leg: f64,
    second_leg: f64,
    moved_too_far: bool,
) -> Feedback {
    if trial.is_passive_move() {
        return Feedback::None;
    }

    let kind = trial.context.kind;
    if kind.is_full_movement() || kind.is_single_movement() {
        let over = |t: f64, limit: f64| limit != 0.0 && t >= limit;
        let under = |t: f64, limit: f64| limit != 0.0 && t <= limit;

        if over(first_leg, config.movement_first_too_slow)
            || over(second_leg, config.movement_second_too_slow)
        {
            Feedback::Text("Too Slow")
        } else if under(first_leg, config.movement_first_too_fast)
            || under(second_leg, config.movement_second_too_fast)
        {
            Feedback::Text("Too Fast")
        } else {
            Feedback::Text("Correct Speed")
        }
    } else if moved_too_far {
        Feedback::Error("Moved Too Far")
    } else {
        Feedback::None
    }
}
