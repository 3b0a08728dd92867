//! Cache statistics and metrics tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Current number of entries in the in-memory tier
    pub l1_size: usize,

    /// Maximum entries allowed in the in-memory tier
    pub l1_max_entries: usize,

    /// Hits served inside the fresh window
    pub fresh_hits: u64,

    /// Hits served from the stale window (refresh scheduled)
    pub stale_hits: u64,

    /// Lookups that found no servable entry in either tier
    pub misses: u64,

    /// Total number of `set` operations
    pub inserts: u64,

    /// Entries promoted from the durable tier into memory
    pub promotions: u64,

    /// Entries evicted from the in-memory tier for capacity
    pub evictions: u64,

    /// Entries dropped after passing their hard-expiry horizon
    pub expirations: u64,

    /// Background or explicit refreshes that completed
    pub refreshes: u64,

    /// Refresh attempts that failed (prior data kept)
    pub refresh_failures: u64,
}

impl CacheStats {
    /// Hit rate over all lookups (fresh and stale hits both count)
    pub fn hit_rate(&self) -> f64 {
        let total = self.fresh_hits + self.stale_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.fresh_hits + self.stale_hits) as f64 / total as f64
        }
    }

    /// Share of hits that were served stale
    pub fn stale_ratio(&self) -> f64 {
        let hits = self.fresh_hits + self.stale_hits;
        if hits == 0 {
            0.0
        } else {
            self.stale_hits as f64 / hits as f64
        }
    }
}

/// Thread-safe metrics collector for cache operations
///
/// Uses atomic operations so hot-path lookups never take a lock just to
/// record a counter.
#[derive(Debug)]
pub(crate) struct MetricsCollector {
    fresh_hits: Arc<AtomicU64>,
    stale_hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    inserts: Arc<AtomicU64>,
    promotions: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
    refreshes: Arc<AtomicU64>,
    refresh_failures: Arc<AtomicU64>,
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            fresh_hits: Arc::clone(&self.fresh_hits),
            stale_hits: Arc::clone(&self.stale_hits),
            misses: Arc::clone(&self.misses),
            inserts: Arc::clone(&self.inserts),
            promotions: Arc::clone(&self.promotions),
            evictions: Arc::clone(&self.evictions),
            expirations: Arc::clone(&self.expirations),
            refreshes: Arc::clone(&self.refreshes),
            refresh_failures: Arc::clone(&self.refresh_failures),
        }
    }
}

impl MetricsCollector {
    pub(crate) fn new() -> Self {
        Self {
            fresh_hits: Arc::new(AtomicU64::new(0)),
            stale_hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            inserts: Arc::new(AtomicU64::new(0)),
            promotions: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
            expirations: Arc::new(AtomicU64::new(0)),
            refreshes: Arc::new(AtomicU64::new(0)),
            refresh_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn record_fresh_hit(&self) {
        self.fresh_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub(crate) fn snapshot(&self, l1_size: usize, l1_max_entries: usize) -> CacheStats {
        CacheStats {
            l1_size,
            l1_max_entries,
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
        }
    }
}
