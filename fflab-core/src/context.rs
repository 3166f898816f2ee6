use crate::field::FIELD_CONSTANTS;
use serde::{Deserialize, Serialize};

/// Visual and movement paradigm of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Target visible throughout.
    #[default]
    StaticOn,
    /// Target appears once the hand is past the resolve distance.
    Appear,
    /// Target disappears once the hand is past the resolve distance.
    Stop,
    CentralOnly,
    VisualOnly,
    /// Both candidate targets shown until the resolve distance.
    DualOff,
    DualPlanning,
    /// Single movement with a ring target that fills at the go cue.
    StaticGo,
    DualPlanningGo,
    /// Subject is held still while the robot field runs.
    PassiveWait,
    /// Robot returns the hand to the next start position.
    PassiveMove,
}

impl ContextKind {
    pub const ALL: [ContextKind; 11] = [
        ContextKind::StaticOn,
        ContextKind::Appear,
        ContextKind::Stop,
        ContextKind::CentralOnly,
        ContextKind::VisualOnly,
        ContextKind::DualOff,
        ContextKind::DualPlanning,
        ContextKind::StaticGo,
        ContextKind::DualPlanningGo,
        ContextKind::PassiveWait,
        ContextKind::PassiveMove,
    ];

    /// Movement runs start → via → target with a dwell at the via point.
    pub fn is_full_movement(&self) -> bool {
        match self {
            ContextKind::StaticOn | ContextKind::Appear | ContextKind::DualPlanning => true,
            ContextKind::Stop
            | ContextKind::CentralOnly
            | ContextKind::VisualOnly
            | ContextKind::DualOff
            | ContextKind::StaticGo
            | ContextKind::DualPlanningGo
            | ContextKind::PassiveWait
            | ContextKind::PassiveMove => false,
        }
    }

    /// Movement is a single reach that ends at the finish position.
    pub fn is_single_movement(&self) -> bool {
        match self {
            ContextKind::StaticGo | ContextKind::DualPlanningGo | ContextKind::PassiveWait => true,
            ContextKind::StaticOn
            | ContextKind::Appear
            | ContextKind::Stop
            | ContextKind::CentralOnly
            | ContextKind::VisualOnly
            | ContextKind::DualOff
            | ContextKind::DualPlanning
            | ContextKind::PassiveMove => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ContextKind::StaticOn => "StaticOn",
            ContextKind::Appear => "Appear",
            ContextKind::Stop => "Stop",
            ContextKind::CentralOnly => "CentralOnly",
            ContextKind::VisualOnly => "VisualOnly",
            ContextKind::DualOff => "DualOff",
            ContextKind::DualPlanning => "DualPlanning",
            ContextKind::StaticGo => "StaticGo",
            ContextKind::DualPlanningGo => "DualPlanningGo",
            ContextKind::PassiveWait => "PassiveWait",
            ContextKind::PassiveMove => "PassiveMove",
        }
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Context constant 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementOrder {
    /// Straight first leg along the symmetry axis, angled second leg.
    #[default]
    FollowThrough,
    /// Angled first leg, straight second leg.
    LeadIn,
    SingleMovement,
}

impl MovementOrder {
    /// Decodes the numeric context slot; unknown codes are rejected.
    pub fn from_code(code: f64) -> Option<Self> {
        match code as i64 {
            0 => Some(MovementOrder::FollowThrough),
            1 => Some(MovementOrder::LeadIn),
            2 => Some(MovementOrder::SingleMovement),
            _ => None,
        }
    }

    pub fn code(&self) -> f64 {
        match self {
            MovementOrder::FollowThrough => 0.0,
            MovementOrder::LeadIn => 1.0,
            MovementOrder::SingleMovement => 2.0,
        }
    }
}

/// Context constant 4: which leg the channel or field is applied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    #[default]
    First,
    Second,
}

impl ChannelOrder {
    pub fn from_code(code: f64) -> Option<Self> {
        match code as i64 {
            0 => Some(ChannelOrder::First),
            1 => Some(ChannelOrder::Second),
            _ => None,
        }
    }

    pub fn code(&self) -> f64 {
        match self {
            ChannelOrder::First => 0.0,
            ChannelOrder::Second => 1.0,
        }
    }
}

/// Context definition: kind plus positional constants.
///
/// | slot | meaning |
/// |---|---|
/// | 0 | target angle (deg) |
/// | 1 | symmetry-axis angle (deg) |
/// | 2 | target-resolve distance (cm) |
/// | 3 | movement order code |
/// | 4 | channel order code |
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextSpec {
    pub kind: ContextKind,
    #[serde(default)]
    pub constants: [f64; FIELD_CONSTANTS],
}

impl ContextSpec {
    pub fn new(kind: ContextKind) -> Self {
        Self {
            kind,
            constants: [0.0; FIELD_CONSTANTS],
        }
    }

    pub fn with_target_angle(mut self, degrees: f64) -> Self {
        self.constants[0] = degrees;
        self
    }

    pub fn with_symmetry_angle(mut self, degrees: f64) -> Self {
        self.constants[1] = degrees;
        self
    }

    pub fn with_resolve_distance(mut self, distance: f64) -> Self {
        self.constants[2] = distance;
        self
    }

    pub fn with_movement_order(mut self, order: MovementOrder) -> Self {
        self.constants[3] = order.code();
        self
    }

    pub fn with_channel_order(mut self, order: ChannelOrder) -> Self {
        self.constants[4] = order.code();
        self
    }

    pub fn target_angle(&self) -> f64 {
        self.constants[0]
    }

    pub fn symmetry_angle(&self) -> f64 {
        self.constants[1]
    }

    pub fn resolve_distance(&self) -> f64 {
        self.constants[2]
    }

    pub fn movement_order(&self) -> Option<MovementOrder> {
        MovementOrder::from_code(self.constants[3])
    }

    pub fn channel_order(&self) -> Option<ChannelOrder> {
        ChannelOrder::from_code(self.constants[4])
    }
}
