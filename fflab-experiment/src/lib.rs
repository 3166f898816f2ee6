pub mod config;
pub mod detector;
pub mod device;
pub mod error;
pub mod feedback;
pub mod field;
pub mod passive;
pub mod present;
pub mod ramp;
pub mod recorder;
pub mod state;
pub mod store;
pub mod trial_list;

pub use config::{DelayDistribution, ExperimentConfig, MissPolicy, PassiveMoveParams};
pub use detector::{is_home, MovementDetector, Region};
pub use device::{DeviceStatus, HapticDevice};
pub use error::{ConfigError, DeviceError, ExperimentError, StoreError, TrialListError};
pub use feedback::{speed_feedback, Feedback};
pub use field::ForceFieldEngine;
pub use passive::{minimum_jerk, MinimumJerkMove, PassiveMove};
pub use present::{Cue, DisplayState, LogPresenter, NullPresenter, Presenter};
pub use ramp::Ramp;
pub use recorder::{FrameAppend, TrialRecordAccumulator};
pub use state::{ExperimentStateMachine, Flow, ShutdownReason};
pub use store::{JsonLinesStore, MemoryStore, TrialStore};
pub use trial_list::{
    FieldDefinition, PlannedTrial, TrialList, TrialListBuilder, TrialPlan, TrialSource,
};
