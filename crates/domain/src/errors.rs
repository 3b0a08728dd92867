//! Error taxonomy for upstream fetch operations
//!
//! The fetch collaborator classifies every upstream failure into a closed
//! set of variants; downstream code branches on `ErrorKind` and never
//! matches on message strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad classification of a fetch failure, recorded on the work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Likely to succeed on a later attempt (network, rate limit, 5xx)
    Transient,
    /// Will not succeed without operator intervention (not found, validation)
    Permanent,
    /// Failure whose cause could not be classified
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "Transient"),
            Self::Permanent => write!(f, "Permanent"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Classified error returned by the fetch collaborator
///
/// Produced at the upstream integration boundary; the work queue uses
/// `kind()` to decide between retry-with-backoff and terminal failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Target not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl FetchError {
    /// Get the retry classification for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited(_) | Self::Server { .. } => {
                ErrorKind::Transient
            }
            Self::NotFound(_) | Self::Validation(_) => ErrorKind::Permanent,
        }
    }

    /// Check if this failure should be retried with backoff
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
