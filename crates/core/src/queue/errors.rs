use thiserror::Error;

use raidsync_common::error::{CommonError, ErrorClassification, ErrorSeverity};
use raidsync_domain::WorkStatus;

/// Queue operation errors
///
/// All public queue methods that can fail return `QueueResult<T>` instead of
/// panicking. Invalid operator transitions are failure signals, not
/// exceptions: a caller asking to retry an item that is not `Failed` gets
/// `InvalidTransition` back and decides what to do with it.
#[derive(Debug, Error)]
pub enum QueueError {
    // Common errors handled by CommonError (serialization, I/O, locks)
    #[error(transparent)]
    Common(#[from] CommonError),

    // Queue-specific errors
    #[error("Queue is at maximum capacity ({0})")]
    CapacityExceeded(usize),

    #[error("Work item not found: {0}")]
    ItemNotFound(String),

    #[error("An active item already exists for target '{0}'")]
    AlreadyQueued(String),

    #[error("Cannot {action} item in state {from}")]
    InvalidTransition { from: WorkStatus, action: &'static str },

    #[error("Queue is shutting down")]
    ShuttingDown,

    #[error("Invalid queue state: {0}")]
    InvalidState(String),
}

impl ErrorClassification for QueueError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Common(e) => e.is_retryable(),
            // Might have space later
            Self::CapacityExceeded(_) => true,
            Self::ItemNotFound(_)
            | Self::AlreadyQueued(_)
            | Self::InvalidTransition { .. }
            | Self::ShuttingDown
            | Self::InvalidState(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Common(e) => e.severity(),
            Self::ItemNotFound(_) | Self::ShuttingDown => ErrorSeverity::Info,
            Self::CapacityExceeded(_)
            | Self::AlreadyQueued(_)
            | Self::InvalidTransition { .. } => ErrorSeverity::Warning,
            Self::InvalidState(_) => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        match self {
            Self::Common(e) => e.is_critical(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::Common(e) => e.retry_after(),
            Self::CapacityExceeded(_) => Some(std::time::Duration::from_millis(100)),
            _ => None,
        }
    }
}

// Auto-convert std/ecosystem types via CommonError so `?` works throughout
impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(err.into())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Common(err.into())
    }
}

/// Queue operation result type
pub type QueueResult<T> = Result<T, QueueError>;
