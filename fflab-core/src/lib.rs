pub mod context;
pub mod field;
pub mod geometry;
pub mod kinematics;
pub mod passive;
pub mod record;
pub mod state;
pub mod trial;

pub use context::{ChannelOrder, ContextKind, ContextSpec, MovementOrder};
pub use field::{FieldKind, ForceFieldSpec, FIELD_CONSTANTS};
pub use geometry::{Rotation, Vec2};
pub use kinematics::{HandleLoad, KinematicSample};
pub use passive::{PassiveMovePhase, PassiveMoveState};
pub use record::{FrameRecord, MissCounts, MissReason, TrialOutcome, TrialRecord};
pub use state::TrialState;
pub use trial::{MovementDirection, MovementType, TrialGeometry, TrialSpec};
