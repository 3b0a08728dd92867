//! Shared foundation utilities for the RaidSync crates.
//!
//! Two concerns live here:
//! - `error`: the common error taxonomy (`CommonError`), severity levels, and
//!   the `ErrorClassification` trait implemented by module-specific errors.
//! - `time`: the `Clock` abstraction (`SystemClock` in production,
//!   `MockClock` in tests) used by every time-dependent component so that
//!   expiry and backoff behavior can be tested deterministically.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod error;
pub mod time;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
pub use time::{Clock, MockClock, SystemClock};
