use crate::context::{ChannelOrder, ContextKind, ContextSpec, MovementOrder};
use crate::field::{FieldKind, ForceFieldSpec};
use crate::geometry::Vec2;
use serde::{Deserialize, Serialize};

/// How subject movements and returns are arranged in the trial list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MovementType {
    /// Subject moves out and back within one trial.
    OutAndBack,
    /// Subject moves out; the robot returns the hand in a separate trial.
    OutThenBack,
    #[default]
    OutOnly,
}

impl MovementType {
    /// Whether a passive return trial follows every subject trial.
    pub fn has_passive_returns(&self) -> bool {
        !matches!(self, MovementType::OutAndBack)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MovementDirection {
    #[default]
    Out,
    Back,
    OutAndBack,
}

/// Positions used by one trial, in workspace coordinates (cm).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrialGeometry {
    pub start: Vec2,
    pub via: Vec2,
    pub target: Vec2,
    pub finish: Vec2,
}

impl TrialGeometry {
    /// Lays out start, target and finish around the via point.
    pub fn derive(
        via: Vec2,
        first_distance: f64,
        second_distance: f64,
        context: &ContextSpec,
        order: MovementOrder,
        movement: MovementType,
    ) -> Self {
        let sym = context.symmetry_angle();
        let angled = sym + context.target_angle();

        let (start, target) = match order {
            MovementOrder::FollowThrough => (
                via - Vec2::from_angle(sym, first_distance),
                via + Vec2::from_angle(angled, second_distance),
            ),
            MovementOrder::LeadIn => (
                via - Vec2::from_angle(angled, first_distance),
                via + Vec2::from_angle(sym, second_distance),
            ),
            MovementOrder::SingleMovement => (via, via + Vec2::from_angle(angled, first_distance)),
        };

        let mut finish = match movement {
            MovementType::OutAndBack => start,
            MovementType::OutThenBack | MovementType::OutOnly => target,
        };

        // Movement to the central target only.
        if !context.kind.is_full_movement() && order != MovementOrder::SingleMovement {
            finish = via;
        }

        Self {
            start,
            via,
            target,
            finish,
        }
    }
}

/// Everything the sequencer needs to run one entry of the trial list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialSpec {
    /// Position in the trial list, starting at 0.
    pub index: usize,
    pub phase: u32,
    pub field_index: usize,
    pub field: ForceFieldSpec,
    pub context: ContextSpec,
    pub movement_order: MovementOrder,
    pub channel_order: ChannelOrder,
    pub geometry: TrialGeometry,
    /// Seconds from trial start to the go cue.
    pub trial_delay: f64,
    pub passive_wait_first: bool,
    pub passive_wait_last: bool,
    pub direction: MovementDirection,
}

impl TrialSpec {
    pub fn is_passive_move(&self) -> bool {
        self.field.kind == FieldKind::PassiveMove
    }

    pub fn is_passive_wait(&self) -> bool {
        self.context.kind == ContextKind::PassiveWait
    }

    /// Passive return whose field is carried over from a held subject trial.
    pub fn is_held_return(&self) -> bool {
        self.field.kind == FieldKind::SameAsLast && self.context.kind == ContextKind::PassiveMove
    }
}
