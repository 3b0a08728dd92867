//! Time abstractions for deterministic testing
//!
//! Production code takes a `Clock` type parameter (defaulting to
//! `SystemClock`) instead of calling `Instant::now()` / `SystemTime::now()`
//! directly, so tests can drive expiry and backoff behavior with `MockClock`
//! instead of sleeping.

mod clock;

pub use clock::{Clock, MockClock, SystemClock};
