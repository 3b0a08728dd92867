//! Durable priority work queue
//!
//! Sequences synchronization jobs under the budget tracker's admission
//! control: FIFO within priority, bounded capacity, transient/permanent
//! failure classification with capped exponential backoff, operator controls
//! per item and globally, and snapshot persistence for crash recovery.

mod config;
mod core;
mod errors;
mod metrics;
mod persistence;

pub use config::QueueConfig;
pub use core::{QueueStatsSnapshot, WorkQueue};
pub use errors::{QueueError, QueueResult};
pub use metrics::{QueueMetrics, QueueMetricsSnapshot};
pub use persistence::{PersistedQueue, PersistenceMetadata, PersistenceService};
