use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Faults found while building the trial list. None of these can surface
/// once a run has started.
#[derive(Debug, Error)]
pub enum TrialListError {
    #[error("cannot read trial plan {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse trial plan {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("trial plan has no trials")]
    Empty,

    #[error("trial {trial} uses field index {field_index}, but only {defined} are defined")]
    UnknownFieldIndex {
        trial: usize,
        field_index: usize,
        defined: usize,
    },

    #[error("field index {field_index} has invalid movement order code {code}")]
    InvalidMovementOrder { field_index: usize, code: f64 },

    #[error("field index {field_index} has invalid channel order code {code}")]
    InvalidChannelOrder { field_index: usize, code: f64 },

    #[error("rest break after trial {after} is outside the {trials}-trial list")]
    RestBreakOutOfRange { after: usize, trials: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("data file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("data store refused trial {trial}")]
    Rejected { trial: usize },
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("cannot open device: {0}")]
    Open(String),

    #[error("cannot start device: {0}")]
    Start(String),

    #[error("force/torque sensor: {0}")]
    Sensor(String),

    #[error("passive move primitive rejected parameters: {0}")]
    PassiveMove(String),
}

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    TrialList(#[from] TrialListError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}
