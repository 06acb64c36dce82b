use bridge_traits::BridgeError;
use thiserror::Error;

/// Run-level failures. Anything here aborts the run it occurred in.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Media library permission denied")]
    PermissionDenied,

    #[error("Failed to query media library: {0}")]
    ProviderQuery(String),

    #[error("Failed to persist watermark: {0}")]
    WatermarkPersist(String),

    #[error("Watermark would move backwards from {current} to {attempted}")]
    WatermarkRegression { current: i64, attempted: i64 },

    #[error("Run interrupted before all uploads reported")]
    Interrupted,

    #[error("A backup run is already active for {task_name}")]
    RunInProgress { task_name: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid sync configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl SyncError {
    /// Whether the next trigger can be expected to get further.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SyncError::Config(_)
                | SyncError::WatermarkRegression { .. }
                | SyncError::InvalidStateTransition { .. }
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failures while preparing an item's payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Could not read media payload: {0}")]
    Unreadable(String),

    #[error("Could not decode image: {0}")]
    Decode(String),

    #[error("Could not encode image: {0}")]
    Encode(String),

    #[error("Scratch file error: {0}")]
    Scratch(String),
}

/// Failures while delivering a prepared payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Upload timed out")]
    Timeout,

    #[error("Upload rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Upload not acknowledged by endpoint")]
    NotAcknowledged,
}

impl From<BridgeError> for TransportError {
    fn from(err: BridgeError) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}
