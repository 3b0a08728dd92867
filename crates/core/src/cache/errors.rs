use thiserror::Error;

use raidsync_common::error::CommonError;

/// Cache operation errors
///
/// A failed background refresh is never surfaced through `get`; the prior
/// entry stays authoritative and the failure is logged. These variants cover
/// the explicit operations (registration, manual refresh, invalidation).
#[derive(Debug, Error)]
pub enum CacheError {
    // Common errors handled by CommonError (serialization, I/O, locks)
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("No warmer registered for key '{0}'")]
    NoWarmer(String),

    #[error("Refresh failed for key '{key}': {message}")]
    RefreshFailed { key: String, message: String },

    #[error("Invalid key pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Cache operation result type
pub type CacheResult<T> = Result<T, CacheError>;
