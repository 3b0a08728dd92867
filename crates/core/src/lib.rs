//! Rate-budgeted synchronization pipeline core.
//!
//! Three components coordinate all background work against a strict hourly
//! upstream quota:
//!
//! - [`budget`]: tracks consumption of the rolling quota shared by live and
//!   background consumers, with admission checks and pause/resume
//!   notifications on threshold edges
//! - [`queue`]: durable FIFO-within-priority work queue with budget-gated
//!   claims, transient/permanent failure classification, and operator
//!   controls
//! - [`cache`]: two-tier stale-while-revalidate cache serving precomputed
//!   views while single-flight background refreshes keep them bounded in
//!   staleness
//!
//! The upstream integration and view computation are injected through the
//! [`ports`] traits; [`worker`] drives the queue with a bounded pool, and
//! [`pipeline`] provides the thin wiring between the three components.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod budget;
pub mod cache;
pub mod pipeline;
pub mod ports;
pub mod queue;
pub mod worker;

// Re-export commonly used types for composition roots
// ------------------------
pub use budget::{BudgetConfig, BudgetEvent, BudgetSnapshot, BudgetTracker};
pub use cache::{
    CacheError, CacheMetadata, CacheStats, CacheStore, CachedView, FileStore, MemoryStore,
    SwrCache, SwrCacheConfig, ViewWarmer,
};
pub use ports::{CompletionHook, FetchHandler};
pub use queue::{QueueConfig, QueueError, QueueStatsSnapshot, WorkQueue};
pub use worker::{SyncWorkerPool, WorkerPoolConfig};
