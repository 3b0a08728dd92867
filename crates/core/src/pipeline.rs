//! Wiring between the cache, the work queue, and the budget tracker
//!
//! None of this is core logic; it is the integration detail that closes the
//! loop: cache warmers may enqueue synchronization jobs, completed jobs
//! refresh the views they back, and budget resume events wake parked
//! claimers so nothing polls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use raidsync_common::time::Clock;
use raidsync_domain::WorkItem;

use crate::budget::{BudgetEvent, BudgetTracker, ListenerId};
use crate::cache::{CacheResult, SwrCache, ViewWarmer};
use crate::ports::CompletionHook;
use crate::queue::{QueueError, WorkQueue};

/// Maps a completed work item to the cache key of the view it backs
pub type KeyMapper = dyn Fn(&WorkItem) -> String + Send + Sync;

/// Maps a cache key to the synchronization target that produces it
pub type TargetMapper = dyn Fn(&str) -> String + Send + Sync;

/// Default cooldown between warmer-triggered syncs of one target
const DEFAULT_MIN_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Completion hook that refreshes the backing view in place
///
/// The fetched payload itself is not written to the cache; the registered
/// warmer recomputes the view from the freshly synchronized data, so the
/// cache swap is atomic and no reader observes a miss window.
pub struct RefreshOnComplete<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock + Clone,
{
    cache: SwrCache<V, C>,
    key_for: Box<KeyMapper>,
}

impl<V, C> RefreshOnComplete<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock + Clone,
{
    /// Create a hook mapping completed items to cache keys
    pub fn new<F>(cache: SwrCache<V, C>, key_for: F) -> Self
    where
        F: Fn(&WorkItem) -> String + Send + Sync + 'static,
    {
        Self { cache, key_for: Box::new(key_for) }
    }
}

#[async_trait]
impl<V, C> CompletionHook for RefreshOnComplete<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock + Clone,
{
    async fn on_completed(&self, item: &WorkItem, _payload: &serde_json::Value) {
        let key = (self.key_for)(item);

        match self.cache.refresh(&key).await {
            Ok(true) => debug!(key = %key, item_id = %item.id, "View refreshed after sync"),
            Ok(false) => debug!(key = %key, "Refresh already in flight; skipped"),
            Err(e) => warn!(key = %key, error = %e, "Post-sync refresh failed"),
        }
    }
}

/// Warmer decorator that enqueues a synchronization job before delegating
///
/// A stale view triggers this warmer, which queues a fresh upstream sync for
/// the target and then recomputes the view from whatever data is currently
/// available. A per-target cooldown keeps post-sync refreshes (which run
/// through the same warmer registry) from re-queueing the target they just
/// synchronized; a duplicate enqueue inside the cooldown is expected and
/// skipped.
pub struct SyncOnWarm<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock + Clone,
{
    queue: Arc<WorkQueue<C>>,
    inner: Arc<dyn ViewWarmer<V>>,
    target_for: Box<TargetMapper>,
    priority: u8,
    min_sync_interval: Duration,
    last_enqueued_ms: StdMutex<HashMap<String, u64>>,
    clock: C,
}

impl<V, C> SyncOnWarm<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock + Clone,
{
    /// Create the decorator with the default per-target cooldown
    pub fn new<F>(
        queue: Arc<WorkQueue<C>>,
        inner: Arc<dyn ViewWarmer<V>>,
        target_for: F,
        priority: u8,
        clock: C,
    ) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            queue,
            inner,
            target_for: Box::new(target_for),
            priority,
            min_sync_interval: DEFAULT_MIN_SYNC_INTERVAL,
            last_enqueued_ms: StdMutex::new(HashMap::new()),
            clock,
        }
    }

    /// Override the per-target sync cooldown
    pub fn with_min_sync_interval(mut self, interval: Duration) -> Self {
        self.min_sync_interval = interval;
        self
    }

    /// Whether the cooldown allows another sync for this target; claims the
    /// slot when it does
    fn try_claim_sync_slot(&self, target: &str) -> bool {
        let now = self.clock.millis_since_epoch();
        let interval_ms = self.min_sync_interval.as_millis() as u64;

        let mut last_enqueued = match self.last_enqueued_ms.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Sync cooldown map lock poisoned");
                poisoned.into_inner()
            }
        };

        if let Some(last) = last_enqueued.get(target) {
            if now.saturating_sub(*last) < interval_ms {
                return false;
            }
        }

        last_enqueued.insert(target.to_string(), now);
        true
    }
}

#[async_trait]
impl<V, C> ViewWarmer<V> for SyncOnWarm<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock + Clone,
{
    async fn warm(&self, key: &str) -> CacheResult<V> {
        let target = (self.target_for)(key);

        if self.try_claim_sync_slot(&target) {
            match self.queue.enqueue(&target, self.priority).await {
                Ok(item) => {
                    debug!(key, target = %target, item_id = %item.id, "Sync enqueued by warmer");
                }
                Err(QueueError::AlreadyQueued(_)) => {
                    debug!(key, target = %target, "Sync already queued");
                }
                Err(e) => warn!(key, target = %target, error = %e, "Warmer enqueue failed"),
            }
        } else {
            debug!(key, target = %target, "Sync cooldown active; not enqueueing");
        }

        self.inner.warm(key).await
    }
}

/// Subscribe the queue to budget resume events
///
/// A `Resumed` edge wakes parked claimers immediately instead of letting
/// them wait out their poll backoff. Returns the listener id so the
/// composition root can unsubscribe on teardown.
pub fn wire_budget_events<C: Clock + Clone>(
    budget: &BudgetTracker<C>,
    queue: &WorkQueue<C>,
) -> ListenerId {
    let queue = queue.clone();
    budget.subscribe(move |event| {
        if event == BudgetEvent::Resumed {
            queue.notify_waiters();
        }
    })
}
