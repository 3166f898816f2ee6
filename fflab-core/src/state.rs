use serde::{Deserialize, Serialize};

/// States of the trial sequencer, in sequencing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum TrialState {
    #[default]
    Initialize,
    Setup,
    Home,
    Start,
    Delay,
    Go,
    MoveWait,
    Moving0,
    ViaPoint,
    Moving1,
    PostMoveDelay,
    Finish,
    Feedback,
    Next,
    InterTrial,
    Exit,
    TimeOut,
    Error,
    Rest,
}

impl TrialState {
    pub const ALL: [TrialState; 19] = [
        TrialState::Initialize,
        TrialState::Setup,
        TrialState::Home,
        TrialState::Start,
        TrialState::Delay,
        TrialState::Go,
        TrialState::MoveWait,
        TrialState::Moving0,
        TrialState::ViaPoint,
        TrialState::Moving1,
        TrialState::PostMoveDelay,
        TrialState::Finish,
        TrialState::Feedback,
        TrialState::Next,
        TrialState::InterTrial,
        TrialState::Exit,
        TrialState::TimeOut,
        TrialState::Error,
        TrialState::Rest,
    ];

    /// States advanced by the control-rate tick. Every other state belongs
    /// to the idle tick.
    pub fn is_loop_task(&self) -> bool {
        match self {
            TrialState::MoveWait
            | TrialState::Moving0
            | TrialState::ViaPoint
            | TrialState::Moving1
            | TrialState::PostMoveDelay => true,
            TrialState::Initialize
            | TrialState::Setup
            | TrialState::Home
            | TrialState::Start
            | TrialState::Delay
            | TrialState::Go
            | TrialState::Finish
            | TrialState::Feedback
            | TrialState::Next
            | TrialState::InterTrial
            | TrialState::Exit
            | TrialState::TimeOut
            | TrialState::Error
            | TrialState::Rest => false,
        }
    }

    /// Numeric code written into frame records.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrialState::Initialize => "Initialize",
            TrialState::Setup => "Setup",
            TrialState::Home => "Home",
            TrialState::Start => "Start",
            TrialState::Delay => "Delay",
            TrialState::Go => "Go",
            TrialState::MoveWait => "MoveWait",
            TrialState::Moving0 => "Moving0",
            TrialState::ViaPoint => "ViaPoint",
            TrialState::Moving1 => "Moving1",
            TrialState::PostMoveDelay => "PostMoveDelay",
            TrialState::Finish => "Finish",
            TrialState::Feedback => "Feedback",
            TrialState::Next => "Next",
            TrialState::InterTrial => "InterTrial",
            TrialState::Exit => "Exit",
            TrialState::TimeOut => "TimeOut",
            TrialState::Error => "Error",
            TrialState::Rest => "Rest",
        }
    }
}

impl std::fmt::Display for TrialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
