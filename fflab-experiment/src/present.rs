use std::borrow::Cow;

use fflab_core::{ContextKind, FieldKind, MovementOrder, Rotation, TrialSpec, TrialState, Vec2};
use tracing::info;

use crate::detector::is_home;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    Go,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Marker {
    pub position: Vec2,
    /// Hand is on the marker.
    pub lit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetMarker {
    pub position: Vec2,
    /// Solid disc when true, outline ring otherwise.
    pub filled: bool,
}

/// What the subject should see this idle tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayState {
    pub state: TrialState,
    pub cursor: Option<Vec2>,
    pub home: Option<Marker>,
    pub via: Option<Marker>,
    pub target: Option<TargetMarker>,
    pub dual_target: Option<TargetMarker>,
    pub message: Cow<'static, str>,
    /// Remaining share of a rest break, 1 at its start.
    pub rest_fraction: Option<f64>,
}

/// Screen and speaker the controller talks to from the idle tick.
pub trait Presenter {
    fn present(&mut self, display: &DisplayState);

    fn play_cue(&mut self, cue: Cue);
}

/// Logs state and message changes instead of drawing.
#[derive(Debug, Default)]
pub struct LogPresenter {
    last_state: Option<TrialState>,
    last_message: String,
}

impl LogPresenter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Presenter for LogPresenter {
    fn present(&mut self, shown: &DisplayState) {
        if self.last_state != Some(shown.state) {
            self.last_state = Some(shown.state);
            info!(state = %shown.state, "display");
        }
        if self.last_message != shown.message {
            self.last_message = shown.message.to_string();
            if !shown.message.is_empty() {
                info!(message = %shown.message, "display text");
            }
        }
    }

    fn play_cue(&mut self, cue: Cue) {
        info!(?cue, "cue");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _display: &DisplayState) {}

    fn play_cue(&mut self, _cue: Cue) {}
}

/// Distance the hand has travelled from the start toward the via point,
/// measured along the first leg's direction.
pub fn progress_from_start(trial: &TrialSpec, position: Vec2) -> f64 {
    let sym = trial.context.symmetry_angle();
    let angle = match trial.movement_order {
        MovementOrder::FollowThrough => sym,
        MovementOrder::LeadIn | MovementOrder::SingleMovement => {
            sym + trial.context.target_angle()
        }
    };
    (Rotation::from_degrees(angle) * (position - trial.geometry.start)).y
}

/// Whether this context's target display depends on the resolve latch.
pub fn uses_target_resolve(kind: ContextKind) -> bool {
    matches!(
        kind,
        ContextKind::Appear | ContextKind::Stop | ContextKind::DualOff | ContextKind::DualPlanning
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetVisibility {
    pub target: bool,
    pub filled: bool,
    pub dual: bool,
}

pub fn target_visibility(kind: ContextKind, resolved: bool, state: TrialState) -> TargetVisibility {
    let after_go = state >= TrialState::Go;
    let (target, filled, dual) = match kind {
        ContextKind::StaticOn | ContextKind::VisualOnly => (true, true, false),
        ContextKind::Appear => (resolved, true, false),
        ContextKind::Stop => (!resolved, true, false),
        ContextKind::DualOff => (!resolved, true, !resolved),
        ContextKind::DualPlanning => (true, true, !resolved),
        ContextKind::StaticGo => (true, after_go, false),
        ContextKind::DualPlanningGo => (true, after_go, true),
        ContextKind::CentralOnly | ContextKind::PassiveWait | ContextKind::PassiveMove => {
            (false, true, false)
        }
    };
    TargetVisibility {
        target,
        filled,
        dual,
    }
}

/// Inputs to one display frame.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub state: TrialState,
    pub trial: Option<&'a TrialSpec>,
    pub position: Vec2,
    pub target_resolved: bool,
    pub start_tolerance: f64,
    pub second_distance: f64,
}

pub fn compose_display(
    scene: Scene<'_>,
    message: Cow<'static, str>,
    rest_fraction: Option<f64>,
) -> DisplayState {
    let mut display = DisplayState {
        state: scene.state,
        message,
        ..DisplayState::default()
    };

    if scene.state == TrialState::Rest {
        display.rest_fraction = rest_fraction;
        return display;
    }
    if scene.state != TrialState::Error {
        display.cursor = Some(scene.position);
    }
    let Some(trial) = scene.trial else {
        return display;
    };

    let in_trial = scene.state >= TrialState::Setup && scene.state <= TrialState::InterTrial;
    let targets_on = scene.state >= TrialState::Start && scene.state <= TrialState::InterTrial;
    let passive = trial.field.kind == FieldKind::PassiveMove;

    if in_trial && !passive {
        let start = trial.geometry.start;
        display.home = Some(Marker {
            position: start,
            lit: is_home(scene.position, start, scene.start_tolerance),
        });
    }
    if !targets_on {
        return display;
    }

    // Passive returns only show where the robot is taking the hand.
    if passive || trial.context.kind == ContextKind::PassiveMove {
        let finish = trial.geometry.finish;
        display.home = Some(Marker {
            position: finish,
            lit: is_home(scene.position, finish, scene.start_tolerance),
        });
        return display;
    }

    if trial.context.kind != ContextKind::PassiveWait {
        display.via = Some(Marker {
            position: trial.geometry.via,
            lit: false,
        });
    }

    let vis = target_visibility(trial.context.kind, scene.target_resolved, scene.state);
    if vis.target {
        display.target = Some(TargetMarker {
            position: trial.geometry.target,
            filled: vis.filled,
        });
    }
    if vis.dual {
        let angle = trial.context.symmetry_angle() - trial.context.target_angle();
        display.dual_target = Some(TargetMarker {
            position: trial.geometry.via + Vec2::from_angle(angle, scene.second_distance),
            filled: vis.filled && trial.context.kind != ContextKind::DualPlanningGo,
        });
    }
    display
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use fflab_core::{
        ChannelOrder, ContextSpec, ForceFieldSpec, MovementDirection, TrialGeometry,
    };

    fn trial(kind: ContextKind, field: ForceFieldSpec) -> TrialSpec {
        TrialSpec {
            index: 0,
            phase: 0,
            field_index: 0,
            field,
            context: ContextSpec::new(kind).with_target_angle(45.0),
            movement_order: MovementOrder::FollowThrough,
            channel_order: ChannelOrder::First,
            geometry: TrialGeometry {
                start: Vec2::new(0.0, -10.0),
                via: Vec2::ZERO,
                target: Vec2::from_angle(45.0, 10.0),
                finish: Vec2::from_angle(45.0, 10.0),
            },
            trial_delay: 0.3,
            passive_wait_first: false,
            passive_wait_last: false,
            direction: MovementDirection::Out,
        }
    }

    fn scene(state: TrialState, trial: &TrialSpec, resolved: bool) -> Scene<'_> {
        Scene {
            state,
            trial: Some(trial),
            position: Vec2::new(0.0, -10.0),
            target_resolved: resolved,
            start_tolerance: 0.5,
            second_distance: 10.0,
        }
    }

    #[test]
    fn visibility_table() {
        use ContextKind::*;
        let go = TrialState::Moving0;
        let delay = TrialState::Delay;
        assert_eq!(target_visibility(StaticOn, false, delay), TargetVisibility { target: true, filled: true, dual: false });
        assert!(!target_visibility(Appear, false, go).target);
        assert!(target_visibility(Appear, true, go).target);
        assert!(target_visibility(Stop, false, go).target);
        assert!(!target_visibility(Stop, true, go).target);
        assert!(!target_visibility(CentralOnly, true, go).target);
        assert!(target_visibility(DualOff, false, go).dual);
        assert_eq!(target_visibility(DualOff, true, go), TargetVisibility { target: false, filled: true, dual: false });
        assert!(target_visibility(DualPlanning, false, go).dual);
        assert!(!target_visibility(DualPlanning, true, go).dual);
        assert!(!target_visibility(StaticGo, false, delay).filled);
        assert!(target_visibility(StaticGo, false, TrialState::Go).filled);
        assert!(target_visibility(DualPlanningGo, false, delay).dual);
        assert!(!target_visibility(PassiveWait, false, go).target);
    }

    #[test]
    fn resolve_progress_follows_first_leg() {
        let t = trial(ContextKind::Appear, ForceFieldSpec::none());
        assert_abs_diff_eq!(progress_from_start(&t, Vec2::new(0.0, -10.0)), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(progress_from_start(&t, Vec2::new(3.0, -6.0)), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn trial_scene_shows_home_via_and_target() {
        let t = trial(ContextKind::DualPlanningGo, ForceFieldSpec::none());
        let d = compose_display(scene(TrialState::Delay, &t, false), Cow::Borrowed(""), None);
        assert_eq!(d.cursor, Some(Vec2::new(0.0, -10.0)));
        assert!(d.home.unwrap().lit);
        assert!(d.via.is_some());
        assert!(!d.target.unwrap().filled);
        let dual = d.dual_target.unwrap();
        assert!(!dual.filled);
        assert_abs_diff_eq!(dual.position.x, -10.0 * 45f64.to_radians().sin(), epsilon = 1e-9);

        let after_go = compose_display(scene(TrialState::Moving0, &t, false), Cow::Borrowed(""), None);
        assert!(after_go.target.unwrap().filled);
        assert!(!after_go.dual_target.unwrap().filled);
    }

    #[test]
    fn setup_shows_home_only_and_error_hides_cursor() {
        let t = trial(ContextKind::StaticOn, ForceFieldSpec::none());
        let d = compose_display(scene(TrialState::Setup, &t, false), Cow::Borrowed(""), None);
        assert!(d.home.is_some());
        assert!(d.target.is_none());

        let e = compose_display(scene(TrialState::Error, &t, false), Cow::Borrowed("TimeOut"), None);
        assert!(e.cursor.is_none());
        assert!(e.home.is_none());
        assert_eq!(e.message, "TimeOut");
    }

    #[test]
    fn passive_return_shows_finish_only() {
        let t = trial(ContextKind::PassiveMove, ForceFieldSpec::passive_move());
        let d = compose_display(scene(TrialState::Moving0, &t, false), Cow::Borrowed(""), None);
        let home = d.home.unwrap();
        assert_eq!(home.position, t.geometry.finish);
        assert!(!home.lit);
        assert!(d.via.is_none() && d.target.is_none() && d.dual_target.is_none());
    }

    #[test]
    fn log_presenter_remembers_what_it_showed() {
        let mut presenter = LogPresenter::new();
        let shown = DisplayState {
            state: TrialState::Error,
            message: Cow::Borrowed("Missed Via"),
            ..DisplayState::default()
        };
        presenter.present(&shown);
        assert_eq!(presenter.last_state, Some(TrialState::Error));
        assert_eq!(presenter.last_message, "Missed Via");

        presenter.present(&DisplayState::default());
        assert_eq!(presenter.last_state, Some(TrialState::default()));
        assert!(presenter.last_message.is_empty());
    }

    #[test]
    fn rest_shows_fraction_only() {
        let t = trial(ContextKind::StaticOn, ForceFieldSpec::none());
        let d = compose_display(scene(TrialState::Rest, &t, false), Cow::Borrowed("Rest"), Some(0.25));
        assert_eq!(d.rest_fraction, Some(0.25));
        assert!(d.cursor.is_none() && d.home.is_none());
    }
}
