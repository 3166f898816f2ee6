use crate::context::ContextSpec;
use crate::field::ForceFieldSpec;
use crate::geometry::Vec2;
use crate::kinematics::HandleLoad;
use crate::passive::PassiveMoveState;
use crate::state::TrialState;
use crate::trial::TrialGeometry;
use serde::{Deserialize, Serialize};

/// Why a trial attempt was thrown away.
///
/// The discriminants are the reason codes written to the data file, so the
/// order is fixed even for reasons nothing raises any more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissReason {
    TimeOut,
    ViaEntry,
    MissedVia,
    ViaTooLong,
    ViaTooShort,
    RobotInactive,
    FrameDataFull,
    MoveTooSoon,
}

impl MissReason {
    pub const ALL: [MissReason; 8] = [
        MissReason::TimeOut,
        MissReason::ViaEntry,
        MissReason::MissedVia,
        MissReason::ViaTooLong,
        MissReason::ViaTooShort,
        MissReason::RobotInactive,
        MissReason::FrameDataFull,
        MissReason::MoveTooSoon,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Operator-facing message shown during the error display.
    pub fn message(&self) -> &'static str {
        match self {
            MissReason::TimeOut => "TimeOut",
            MissReason::ViaEntry => "Missed Target Entrance",
            MissReason::MissedVia => "Missed Central Target",
            MissReason::ViaTooLong => "Too Long at CT",
            MissReason::ViaTooShort => "Slow Down at CT",
            MissReason::RobotInactive => "Handle Switch",
            MissReason::FrameDataFull => "Frame data full",
            MissReason::MoveTooSoon => "Moved Too Soon",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MissCounts {
    pub total: u32,
    pub by_reason: [u32; 8],
}

impl MissCounts {
    pub fn record(&mut self, reason: MissReason) {
        self.total += 1;
        self.by_reason[reason.index()] += 1;
    }

    pub fn count(&self, reason: MissReason) -> u32 {
        self.by_reason[reason.index()]
    }

    /// Misses as a percentage of attempts so far.
    pub fn percent_of(&self, attempts: u32) -> f64 {
        if attempts == 0 {
            0.0
        } else {
            100.0 * self.total as f64 / attempts as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialOutcome {
    Completed,
    Missed(MissReason),
}

impl TrialOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TrialOutcome::Completed)
    }
}

/// One row per executed trial attempt.
///
/// Durations are in seconds; `None` means the trial never got far enough
/// to measure it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial: usize,
    pub attempt: u32,
    pub phase: u32,
    pub field_index: usize,
    pub field: ForceFieldSpec,
    pub context: ContextSpec,
    pub geometry: TrialGeometry,
    pub trial_delay: f64,
    pub passive_wait_first: bool,
    pub passive_wait_last: bool,
    pub reaction_time: Option<f64>,
    pub movement_duration: Option<f64>,
    pub first_leg_time: Option<f64>,
    pub second_leg_time: Option<f64>,
    pub passing_via_time: Option<f64>,
    pub via_not_moving_time: Option<f64>,
    pub post_move_delay: Option<f64>,
    pub trial_duration: Option<f64>,
    pub experiment_time: f64,
    pub passive_start: Option<Vec2>,
    pub passive_end: Option<Vec2>,
    pub frame_count: usize,
    pub misses: MissCounts,
    pub outcome: Option<TrialOutcome>,
}

impl TrialRecord {
    pub fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }
}

/// One row per control tick while a trial is recording.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameRecord {
    pub trial_time: f64,
    pub state: TrialState,
    /// Seconds spent inside the previous control tick.
    pub loop_latency: f64,
    /// Seconds between the previous two control ticks.
    pub loop_period: f64,
    pub position: Vec2,
    pub velocity: Vec2,
    pub force: Vec2,
    pub handle: HandleLoad,
    pub cursor: Vec2,
    pub ramp: f64,
    pub target_resolved: bool,
    pub passive: PassiveMoveState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_indices_are_stable() {
        for (i, r) in MissReason::ALL.iter().enumerate() {
            assert_eq!(r.index(), i);
        }
        assert_eq!(MissReason::MoveTooSoon.index(), 7);
    }

    #[test]
    fn miss_counts_accumulate_per_reason() {
        let mut counts = MissCounts::default();
        counts.record(MissReason::TimeOut);
        counts.record(MissReason::TimeOut);
        counts.record(MissReason::ViaTooShort);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.count(MissReason::TimeOut), 2);
        assert_eq!(counts.count(MissReason::ViaTooShort), 1);
        assert_eq!(counts.count(MissReason::MissedVia), 0);
        assert_eq!(counts.percent_of(6), 50.0);
        assert_eq!(MissCounts::default().percent_of(0), 0.0);
    }
}
