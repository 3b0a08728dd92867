//! Two-tier stale-while-revalidate cache
//!
//! Decouples request latency from upstream/compute latency: `get` always
//! answers from the fastest available tier, staleness is bounded by two
//! expiry horizons, and a stale hit schedules exactly one background refresh
//! per key (the in-flight set is the single-flight mechanism).
//!
//! # Tiers
//!
//! - **L1**: bounded in-memory map holding hot-path keys, with
//!   least-recently-accessed eviction biased toward non-hot entries
//! - **L2**: durable store behind the [`CacheStore`] port (`MemoryStore` and
//!   a write-through `FileStore` are provided)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use raidsync_core::cache::{CacheStore, MemoryStore, SwrCache, SwrCacheConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn CacheStore<serde_json::Value>> = Arc::new(MemoryStore::new());
//! let cache = SwrCache::new(SwrCacheConfig::default(), store)?;
//!
//! cache.set("guild:123:progress", serde_json::json!({"bosses": 8}), Duration::from_secs(300))
//!     .await?;
//! let view = cache.get("guild:123:progress").await;
//! # let _ = view;
//! # Ok(())
//! # }
//! ```

mod config;
mod errors;
mod stats;
mod store;
mod swr;

pub use config::{SwrCacheConfig, SwrCacheConfigBuilder};
pub use errors::{CacheError, CacheResult};
pub use stats::CacheStats;
pub use store::{CacheStore, FileStore, Freshness, MemoryStore, StoredEntry};
pub use swr::{CacheMetadata, CachedView, SwrCache, ViewWarmer};
