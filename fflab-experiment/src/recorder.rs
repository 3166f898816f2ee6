use fflab_core::{FrameRecord, MissCounts, TrialOutcome, TrialRecord, TrialSpec};

/// Result of offering a frame to the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAppend {
    Skipped,
    Appended,
    Full,
}

/// Collects the current trial row and its per-tick frames.
///
/// The frame buffer is allocated once at the configured capacity; appending
/// never grows it.
#[derive(Debug)]
pub struct TrialRecordAccumulator {
    frames: Vec<FrameRecord>,
    capacity: usize,
    recording: bool,
    row: Option<TrialRecord>,
}

impl TrialRecordAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            capacity,
            recording: false,
            row: None,
        }
    }

    /// Opens a fresh row for an attempt at `trial`. Measurements start unset.
    pub fn begin_trial(&mut self, trial: &TrialSpec, attempt: u32, experiment_time: f64) {
        self.row = Some(TrialRecord {
            trial: trial.index,
            attempt,
            phase: trial.phase,
            field_index: trial.field_index,
            field: trial.field,
            context: trial.context,
            geometry: trial.geometry,
            trial_delay: trial.trial_delay,
            passive_wait_first: trial.passive_wait_first,
            passive_wait_last: trial.passive_wait_last,
            reaction_time: None,
            movement_duration: None,
            first_leg_time: None,
            second_leg_time: None,
            passing_via_time: None,
            via_not_moving_time: None,
            post_move_delay: None,
            trial_duration: None,
            experiment_time,
            passive_start: None,
            passive_end: None,
            frame_count: 0,
            misses: MissCounts::default(),
            outcome: None,
        });
    }

    pub fn row(&self) -> Option<&TrialRecord> {
        self.row.as_ref()
    }

    pub fn row_mut(&mut self) -> Option<&mut TrialRecord> {
        self.row.as_mut()
    }

    pub fn start_recording_frames(&mut self) {
        self.frames.clear();
        self.recording = true;
    }

    pub fn stop_recording_frames(&mut self) {
        self.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn append_frame_if_recording(&mut self, frame: FrameRecord) -> FrameAppend {
        if !self.recording {
            return FrameAppend::Skipped;
        }
        if self.is_full() {
            return FrameAppend::Full;
        }
        self.frames.push(frame);
        FrameAppend::Appended
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    /// Closes the current row with `outcome` and hands it out.
    ///
    /// Returns `None` when no row is open or it belongs to another trial.
    pub fn finalize_trial_row(
        &mut self,
        index: usize,
        outcome: TrialOutcome,
        misses: MissCounts,
    ) -> Option<TrialRecord> {
        let row = self.row.as_mut().filter(|r| r.trial == index)?;
        row.outcome = Some(outcome);
        row.frame_count = self.frames.len();
        row.misses = misses;
        self.row.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fflab_core::{
        ChannelOrder, ContextKind, ContextSpec, ForceFieldSpec, MissReason, MovementDirection,
        MovementOrder, TrialGeometry,
    };

    fn spec(index: usize) -> TrialSpec {
        TrialSpec {
            index,
            phase: 1,
            field_index: 2,
            field: ForceFieldSpec::viscous(0.1, 90.0),
            context: ContextSpec::new(ContextKind::StaticOn),
            movement_order: MovementOrder::FollowThrough,
            channel_order: ChannelOrder::First,
            geometry: TrialGeometry::default(),
            trial_delay: 0.4,
            passive_wait_first: false,
            passive_wait_last: false,
            direction: MovementDirection::Out,
        }
    }

    #[test]
    fn frames_only_while_recording_and_capped() {
        let mut acc = TrialRecordAccumulator::new(3);
        assert_eq!(acc.append_frame_if_recording(FrameRecord::default()), FrameAppend::Skipped);

        acc.start_recording_frames();
        for _ in 0..3 {
            assert_eq!(acc.append_frame_if_recording(FrameRecord::default()), FrameAppend::Appended);
        }
        assert!(acc.is_full());
        assert_eq!(acc.append_frame_if_recording(FrameRecord::default()), FrameAppend::Full);
        assert_eq!(acc.frames().len(), 3);

        acc.start_recording_frames();
        assert!(acc.frames().is_empty());
        acc.stop_recording_frames();
        assert_eq!(acc.append_frame_if_recording(FrameRecord::default()), FrameAppend::Skipped);
    }

    #[test]
    fn row_is_finalized_once() {
        let mut acc = TrialRecordAccumulator::new(10);
        acc.begin_trial(&spec(4), 2, 12.5);
        let row = acc.row().unwrap();
        assert_eq!((row.trial, row.attempt, row.field_index), (4, 2, 2));
        assert!(row.reaction_time.is_none());
        assert!(!row.is_finalized());

        acc.row_mut().unwrap().reaction_time = Some(0.25);
        acc.start_recording_frames();
        acc.append_frame_if_recording(FrameRecord::default());

        let mut misses = MissCounts::default();
        misses.record(MissReason::TimeOut);
        assert!(acc.finalize_trial_row(3, TrialOutcome::Completed, misses).is_none());

        let done = acc
            .finalize_trial_row(4, TrialOutcome::Missed(MissReason::TimeOut), misses)
            .unwrap();
        assert_eq!(done.outcome, Some(TrialOutcome::Missed(MissReason::TimeOut)));
        assert_eq!(done.reaction_time, Some(0.25));
        assert_eq!(done.frame_count, 1);
        assert_eq!(done.misses.total, 1);
        assert!(acc.row().is_none());
        assert!(acc.finalize_trial_row(4, TrialOutcome::Completed, misses).is_none());
    }
}
