use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use dashmap::DashSet;
use regex::Regex;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use raidsync_common::time::{Clock, SystemClock};

use super::config::SwrCacheConfig;
use super::errors::{CacheError, CacheResult};
use super::stats::{CacheStats, MetricsCollector};
use super::store::{CacheStore, Freshness, StoredEntry};

/// Warmer collaborator computing a view for a key
///
/// Must be idempotent and safe to run concurrently with stale reads of the
/// same key; the cache guarantees at most one warm per key is in flight.
#[async_trait::async_trait]
pub trait ViewWarmer<V>: Send + Sync {
    /// Recompute the view identified by `key`
    async fn warm(&self, key: &str) -> CacheResult<V>;
}

/// Expiry metadata exposed so a boundary layer can synthesize
/// `Cache-Control` / ETag headers
#[derive(Debug, Clone, Serialize)]
pub struct CacheMetadata {
    pub cached_at_ms: u64,
    pub expires_at_ms: u64,
    pub stale_expires_at_ms: u64,
    pub ttl_ms: u64,
}

impl CacheMetadata {
    /// Milliseconds of freshness remaining at `now_ms` (zero when stale)
    pub fn remaining_fresh_ms(&self, now_ms: u64) -> u64 {
        self.expires_at_ms.saturating_sub(now_ms)
    }

    /// Whether the entry is inside the stale window at `now_ms`
    pub fn is_stale(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms && now_ms < self.stale_expires_at_ms
    }

    /// Width of the stale window in milliseconds
    pub fn stale_window_ms(&self) -> u64 {
        self.stale_expires_at_ms.saturating_sub(self.expires_at_ms)
    }
}

impl<V> From<&StoredEntry<V>> for CacheMetadata {
    fn from(entry: &StoredEntry<V>) -> Self {
        Self {
            cached_at_ms: entry.cached_at_ms,
            expires_at_ms: entry.expires_at_ms,
            stale_expires_at_ms: entry.stale_expires_at_ms,
            ttl_ms: entry.ttl_ms,
        }
    }
}

/// A served value together with its expiry metadata
#[derive(Debug, Clone)]
pub struct CachedView<V> {
    pub data: V,
    pub metadata: CacheMetadata,
}

struct L1Entry<V> {
    entry: StoredEntry<V>,
    last_accessed: u64,
}

struct L1Storage<V> {
    entries: HashMap<String, L1Entry<V>>,
    access_counter: u64,
}

impl<V> L1Storage<V> {
    fn new() -> Self {
        Self { entries: HashMap::new(), access_counter: 0 }
    }

    fn touch(&mut self, key: &str) {
        self.access_counter += 1;
        let counter = self.access_counter;
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_accessed = counter;
        }
    }
}

/// Removes the key from the in-flight set when the refresh attempt ends,
/// whether it completed, failed, or panicked.
struct InFlightGuard {
    set: Arc<DashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

type WarmerRegistry<V> = StdRwLock<Vec<(Regex, Arc<dyn ViewWarmer<V>>)>>;

/// Two-tier stale-while-revalidate cache
///
/// Serves precomputed views with two expiration horizons: entries inside the
/// fresh window are returned directly; entries inside the stale window are
/// returned while exactly one background refresh per key recomputes them;
/// entries past the hard-expiry horizon are treated as misses and the caller
/// computes synchronously.
///
/// Reads never block on a refresh. A refresh that starts after a read
/// observes the pre-refresh value for that read; replacement is atomic from
/// the reader's perspective. A failed refresh is logged and the prior entry
/// stays authoritative.
pub struct SwrCache<V, C = SystemClock>
where
    V: Clone + Send + Sync + 'static,
    C: Clock + Clone,
{
    l1: Arc<RwLock<L1Storage<V>>>,
    store: Arc<dyn CacheStore<V>>,
    warmers: Arc<WarmerRegistry<V>>,
    hot_paths: Arc<StdRwLock<Vec<Regex>>>,
    in_flight: Arc<DashSet<String>>,
    config: SwrCacheConfig,
    metrics: MetricsCollector,
    clock: C,
}

impl<V> SwrCache<V, SystemClock>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new cache with the system clock
    pub fn new(config: SwrCacheConfig, store: Arc<dyn CacheStore<V>>) -> CacheResult<Self> {
        Self::with_clock(config, store, SystemClock)
    }
}

impl<V, C> SwrCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock + Clone,
{
    /// Create a new cache with a custom clock (useful for testing)
    pub fn with_clock(
        config: SwrCacheConfig,
        store: Arc<dyn CacheStore<V>>,
        clock: C,
    ) -> CacheResult<Self> {
        config.validate().map_err(CacheError::Common)?;
        let hot_paths = compile_patterns(&config.hot_paths)?;

        Ok(Self {
            l1: Arc::new(RwLock::new(L1Storage::new())),
            store,
            warmers: Arc::new(StdRwLock::new(Vec::new())),
            hot_paths: Arc::new(StdRwLock::new(hot_paths)),
            in_flight: Arc::new(DashSet::new()),
            config,
            metrics: MetricsCollector::new(),
            clock,
        })
    }

    /// Register a warmer for a family of keys
    ///
    /// The first registered pattern matching a key wins.
    pub fn register_warmer(
        &self,
        pattern: &str,
        warmer: Arc<dyn ViewWarmer<V>>,
    ) -> CacheResult<()> {
        let regex = compile_pattern(pattern)?;
        self.write_warmers().push((regex, warmer));
        debug!(pattern, "Warmer registered");
        Ok(())
    }

    /// Replace the hot-path patterns promoted into the in-memory tier
    pub fn set_hot_paths(&self, patterns: &[String]) -> CacheResult<()> {
        let compiled = compile_patterns(patterns)?;
        match self.hot_paths.write() {
            Ok(mut hot) => *hot = compiled,
            Err(poisoned) => *poisoned.into_inner() = compiled,
        }
        Ok(())
    }

    /// Store a computed view
    ///
    /// The fresh horizon is `now + ttl`; the stale horizon extends it by
    /// `ttl * stale_multiplier`. Writes go to the durable tier always and to
    /// the in-memory tier when the key is hot.
    pub async fn set(&self, key: &str, data: V, ttl: Duration) -> CacheResult<()> {
        let now = self.clock.millis_since_epoch();
        let ttl_ms = ttl.as_millis() as u64;
        let stale_window_ms = (ttl_ms as f64 * self.config.stale_multiplier) as u64;

        let entry = StoredEntry {
            data,
            cached_at_ms: now,
            expires_at_ms: now.saturating_add(ttl_ms),
            stale_expires_at_ms: now.saturating_add(ttl_ms).saturating_add(stale_window_ms),
            ttl_ms,
        };

        self.store.put(key, entry.clone()).await.map_err(CacheError::Common)?;

        if self.is_hot(key) {
            let mut l1 = self.l1.write().await;
            self.insert_l1(&mut l1, key, entry);
        }

        if self.config.track_metrics {
            self.metrics.record_insert();
        }

        debug!(key, ttl_ms, "View cached");
        Ok(())
    }

    /// Serve a view from the fastest available tier
    ///
    /// Fresh entries return immediately; stale entries return the prior
    /// value and schedule one background refresh; a miss obligates the
    /// caller to compute synchronously.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.lookup(key).await.map(|entry| entry.data)
    }

    /// `get` plus the expiry metadata needed for HTTP header synthesis
    pub async fn get_with_metadata(&self, key: &str) -> Option<CachedView<V>> {
        self.lookup(key).await.map(|entry| CachedView {
            metadata: CacheMetadata::from(&entry),
            data: entry.data,
        })
    }

    async fn lookup(&self, key: &str) -> Option<StoredEntry<V>> {
        let now = self.clock.millis_since_epoch();

        // L1: bounded in-memory tier
        {
            let mut l1 = self.l1.write().await;
            if let Some(l1_entry) = l1.entries.get(key) {
                match l1_entry.entry.freshness(now) {
                    Freshness::Fresh => {
                        let entry = l1_entry.entry.clone();
                        l1.touch(key);
                        if self.config.track_metrics {
                            self.metrics.record_fresh_hit();
                        }
                        return Some(entry);
                    }
                    Freshness::Stale => {
                        let entry = l1_entry.entry.clone();
                        l1.touch(key);
                        drop(l1);
                        if self.config.track_metrics {
                            self.metrics.record_stale_hit();
                        }
                        self.trigger_background_refresh(key);
                        return Some(entry);
                    }
                    Freshness::Expired => {
                        l1.entries.remove(key);
                        if self.config.track_metrics {
                            self.metrics.record_expiration();
                        }
                        // Fall through to the durable tier
                    }
                }
            }
        }

        // L2: durable tier
        let entry = match self.store.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "Durable tier read failed; treating as miss");
                None
            }
        };

        let Some(entry) = entry else {
            if self.config.track_metrics {
                self.metrics.record_miss();
            }
            return None;
        };

        match entry.freshness(now) {
            Freshness::Fresh => {
                self.promote(key, entry.clone()).await;
                if self.config.track_metrics {
                    self.metrics.record_fresh_hit();
                }
                Some(entry)
            }
            Freshness::Stale => {
                self.promote(key, entry.clone()).await;
                if self.config.track_metrics {
                    self.metrics.record_stale_hit();
                }
                self.trigger_background_refresh(key);
                Some(entry)
            }
            Freshness::Expired => {
                if let Err(e) = self.store.remove(key).await {
                    warn!(key, error = %e, "Failed to drop expired entry");
                }
                if self.config.track_metrics {
                    self.metrics.record_expiration();
                    self.metrics.record_miss();
                }
                None
            }
        }
    }

    /// Schedule one background refresh for a key
    ///
    /// No-op when the key has no registered warmer or a refresh is already
    /// in flight; membership in the in-flight set is claimed atomically so
    /// concurrent stale readers cannot stampede the warmer. The refresh runs
    /// detached and never blocks the caller.
    pub fn trigger_background_refresh(&self, key: &str) {
        let Some(warmer) = self.find_warmer(key) else {
            debug!(key, "No warmer registered; skipping refresh");
            return;
        };

        let Some(guard) = self.begin_refresh(key) else {
            debug!(key, "Refresh already in flight");
            return;
        };

        let cache = self.clone();
        let key = key.to_string();

        tokio::spawn(async move {
            let _guard = guard;
            let ttl = cache.current_ttl(&key).await.unwrap_or(cache.config.default_ttl);

            match warmer.warm(&key).await {
                Ok(data) => match cache.set(&key, data, ttl).await {
                    Ok(()) => {
                        if cache.config.track_metrics {
                            cache.metrics.record_refresh();
                        }
                        debug!(key = %key, "Background refresh completed");
                    }
                    Err(e) => {
                        if cache.config.track_metrics {
                            cache.metrics.record_refresh_failure();
                        }
                        warn!(key = %key, error = %e, "Failed to store refreshed view");
                    }
                },
                Err(e) => {
                    if cache.config.track_metrics {
                        cache.metrics.record_refresh_failure();
                    }
                    warn!(
                        key = %key,
                        error = %e,
                        "Background refresh failed; prior data remains authoritative"
                    );
                }
            }
        });
    }

    /// Recompute a view and swap it in place
    ///
    /// Preferred over invalidation: no caller ever observes a miss window.
    /// Returns `false` when skipped because a refresh for the key is already
    /// in flight.
    #[instrument(skip(self))]
    pub async fn refresh(&self, key: &str) -> CacheResult<bool> {
        let warmer =
            self.find_warmer(key).ok_or_else(|| CacheError::NoWarmer(key.to_string()))?;

        let Some(_guard) = self.begin_refresh(key) else {
            debug!(key, "Refresh already in flight; skipping explicit refresh");
            return Ok(false);
        };

        let ttl = self.current_ttl(key).await.unwrap_or(self.config.default_ttl);

        let data = match warmer.warm(key).await {
            Ok(data) => data,
            Err(e) => {
                if self.config.track_metrics {
                    self.metrics.record_refresh_failure();
                }
                return Err(CacheError::RefreshFailed {
                    key: key.to_string(),
                    message: e.to_string(),
                });
            }
        };

        self.set(key, data, ttl).await?;
        if self.config.track_metrics {
            self.metrics.record_refresh();
        }

        info!(key, "View refreshed in place");
        Ok(true)
    }

    /// Delete a key from both tiers
    ///
    /// Use only where an immediate miss is acceptable; prefer `refresh`.
    pub async fn invalidate(&self, key: &str) -> CacheResult<bool> {
        let in_l1 = self.l1.write().await.entries.remove(key).is_some();
        let in_l2 = self.store.remove(key).await.map_err(CacheError::Common)?;

        debug!(key, "View invalidated");
        Ok(in_l1 || in_l2)
    }

    /// Delete all keys matching a pattern from both tiers
    pub async fn invalidate_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let regex = compile_pattern(pattern)?;

        {
            let mut l1 = self.l1.write().await;
            l1.entries.retain(|key, _| !regex.is_match(key));
        }

        let removed = self.store.remove_matching(&regex).await.map_err(CacheError::Common)?;
        info!(pattern, removed, "Views invalidated by pattern");
        Ok(removed)
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let l1_size = self.l1.read().await.entries.len();
        self.metrics.snapshot(l1_size, self.config.l1_max_entries)
    }

    /// Current number of entries in the in-memory tier
    pub async fn l1_len(&self) -> usize {
        self.l1.read().await.entries.len()
    }

    /// Promote a durable-tier hit into the in-memory tier when hot
    async fn promote(&self, key: &str, entry: StoredEntry<V>) {
        if !self.is_hot(key) {
            return;
        }

        let mut l1 = self.l1.write().await;
        if l1.entries.contains_key(key) {
            return;
        }
        self.insert_l1(&mut l1, key, entry);

        if self.config.track_metrics {
            self.metrics.record_promotion();
        }
        debug!(key, "Entry promoted to memory tier");
    }

    /// Insert into the in-memory tier, evicting when at capacity
    fn insert_l1(&self, l1: &mut L1Storage<V>, key: &str, entry: StoredEntry<V>) {
        if !l1.entries.contains_key(key) && l1.entries.len() >= self.config.l1_max_entries {
            self.evict_one(l1);
        }

        l1.access_counter += 1;
        let last_accessed = l1.access_counter;
        l1.entries.insert(key.to_string(), L1Entry { entry, last_accessed });
    }

    /// Evict the least-recently-accessed entry, preferring non-hot keys
    ///
    /// Hot entries are only reclaimed when no non-hot entry exists (hot-path
    /// patterns can change at runtime, leaving formerly-hot entries behind).
    fn evict_one(&self, l1: &mut L1Storage<V>) {
        let victim = l1
            .entries
            .iter()
            .filter(|(key, _)| !self.is_hot(key))
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone())
            .or_else(|| {
                l1.entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_accessed)
                    .map(|(key, _)| key.clone())
            });

        if let Some(key) = victim {
            l1.entries.remove(&key);
            if self.config.track_metrics {
                self.metrics.record_eviction();
            }
            debug!(key, "Entry evicted from memory tier");
        }
    }

    /// Claim the in-flight marker for a key; `None` when already claimed
    fn begin_refresh(&self, key: &str) -> Option<InFlightGuard> {
        if self.in_flight.insert(key.to_string()) {
            Some(InFlightGuard { set: Arc::clone(&self.in_flight), key: key.to_string() })
        } else {
            None
        }
    }

    /// TTL of the current entry for a key, if one exists in either tier
    async fn current_ttl(&self, key: &str) -> Option<Duration> {
        {
            let l1 = self.l1.read().await;
            if let Some(entry) = l1.entries.get(key) {
                return Some(Duration::from_millis(entry.entry.ttl_ms));
            }
        }

        match self.store.get(key).await {
            Ok(Some(entry)) => Some(Duration::from_millis(entry.ttl_ms)),
            _ => None,
        }
    }

    fn find_warmer(&self, key: &str) -> Option<Arc<dyn ViewWarmer<V>>> {
        let warmers = match self.warmers.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Warmer registry lock poisoned");
                poisoned.into_inner()
            }
        };
        warmers.iter().find(|(regex, _)| regex.is_match(key)).map(|(_, warmer)| warmer.clone())
    }

    fn is_hot(&self, key: &str) -> bool {
        let hot_paths = match self.hot_paths.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Hot path registry lock poisoned");
                poisoned.into_inner()
            }
        };
        hot_paths.iter().any(|regex| regex.is_match(key))
    }

    fn write_warmers(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(Regex, Arc<dyn ViewWarmer<V>>)>> {
        match self.warmers.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Warmer registry lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}

impl<V, C> Clone for SwrCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock + Clone,
{
    fn clone(&self) -> Self {
        Self {
            l1: Arc::clone(&self.l1),
            store: Arc::clone(&self.store),
            warmers: Arc::clone(&self.warmers),
            hot_paths: Arc::clone(&self.hot_paths),
            in_flight: Arc::clone(&self.in_flight),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
        }
    }
}

fn compile_pattern(pattern: &str) -> CacheResult<Regex> {
    Regex::new(pattern).map_err(|e| CacheError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn compile_patterns(patterns: &[String]) -> CacheResult<Vec<Regex>> {
    patterns.iter().map(|pattern| compile_pattern(pattern)).collect()
}
