use std::error::Error as StdError;

use thiserror::Error;

/// Rewind's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Rewind's crate-wide error type.
///
/// Capture and pipeline failures are reported through this type (or through
/// [`crate::recorder::RecorderEvent`]s for the capture thread); nothing in the crate panics
/// across a thread boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// The audio source refused to open (missing permission or device unavailable).
    #[error("audio source unavailable: {0}")]
    PermissionDenied(String),

    /// The ring buffer could not be allocated, even after degrading capacity.
    #[error("failed to allocate a {requested} byte capture buffer")]
    AllocationFailure { requested: usize },

    /// A transient read failure from the audio source.
    #[error("audio read failed: {0}")]
    DeviceRead(String),

    /// The audio source reported that it stopped; capture cannot continue.
    #[error("audio source stopped: {0}")]
    DeviceStopped(String),

    /// The speech classifier failed on a window.
    #[error("speech inference failed: {0}")]
    Inference(String),

    /// A sample rate (or resampling ratio) the pipeline cannot process.
    #[error("unsupported sample rate: {0}")]
    UnsupportedRate(String),

    /// An inference engine returned recurrent state with an unexpected shape.
    #[error("recurrent state shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Nothing has been captured yet.
    #[error("the capture buffer is empty")]
    EmptyBuffer,

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        Self::Other(Box::new(err))
    }
}
