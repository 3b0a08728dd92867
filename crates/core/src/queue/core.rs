use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use raidsync_common::error::CommonError;
use raidsync_common::time::{Clock, SystemClock};
use raidsync_domain::{ErrorKind, FetchError, WorkItem, WorkStatus};

use super::config::QueueConfig;
use super::errors::{QueueError, QueueResult};
use super::metrics::{QueueMetrics, QueueMetricsSnapshot};
use super::persistence::PersistenceService;
use crate::budget::BudgetTracker;

/// Priority queue item wrapper
///
/// Heap entries are snapshots; the item map is authoritative. A heap entry
/// whose mapped item is no longer `Pending` is stale and dropped on pop.
#[derive(Clone)]
struct PriorityItem {
    item: Arc<WorkItem>,
    sequence: u64,
}

impl PartialEq for PriorityItem {
    fn eq(&self, other: &Self) -> bool {
        self.item.id == other.item.id
    }
}

impl Eq for PriorityItem {}

impl PartialOrd for PriorityItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then FIFO within a level
        self.item
            .priority
            .cmp(&other.item.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Mutable queue state guarded by a single short-held lock
struct QueueState {
    heap: BinaryHeap<PriorityItem>,
    items: HashMap<String, Arc<WorkItem>>,
    /// target -> item id, for items whose status counts as active
    active_targets: HashMap<String, String>,
    in_progress: HashSet<String>,
    sequence: u64,
}

impl QueueState {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            items: HashMap::new(),
            active_targets: HashMap::new(),
            in_progress: HashSet::new(),
            sequence: 0,
        }
    }

    fn push_pending(&mut self, item: Arc<WorkItem>) {
        let sequence = self.sequence;
        self.sequence += 1;
        self.heap.push(PriorityItem { item, sequence });
    }

    fn clear_active_target(&mut self, target: &str, item_id: &str) {
        if self.active_targets.get(target).is_some_and(|id| id == item_id) {
            self.active_targets.remove(target);
        }
    }
}

/// Counts by status plus error-type breakdown for the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatsSnapshot {
    pub pending: usize,
    pub in_progress: usize,
    pub paused: usize,
    pub failed: usize,
    pub failed_transient: usize,
    pub failed_permanent: usize,
    pub failed_unknown: usize,
    pub globally_paused: bool,
    pub metrics: QueueMetricsSnapshot,
}

/// Durable priority work queue with budget-gated claims
///
/// ## Error Handling
///
/// All public methods that can fail return `QueueResult<T>` instead of
/// panicking. Lock poisoning is propagated as `CommonError::Lock` rather
/// than crashing the worker loop, and invalid operator transitions come back
/// as `QueueError::InvalidTransition`.
///
/// ## Thread Safety
///
/// Shared state sits behind one `Arc<RwLock<_>>` that is held only for the
/// duration of a single state transition; claims are serialized by that
/// lock, which is what guarantees exactly one worker owns an `InProgress`
/// item. The queue is `Clone` and clones share state.
pub struct WorkQueue<C: Clock = SystemClock> {
    state: Arc<RwLock<QueueState>>,
    config: Arc<QueueConfig>,
    metrics: Arc<QueueMetrics>,
    budget: Arc<BudgetTracker<C>>,
    paused: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    persistence: Option<Arc<PersistenceService>>,
    persistence_handle: Option<tokio::task::JoinHandle<()>>,
    clock: C,
}

impl WorkQueue<SystemClock> {
    /// Create a new queue with the system clock
    pub async fn with_config(
        config: QueueConfig,
        budget: Arc<BudgetTracker<SystemClock>>,
    ) -> QueueResult<Self> {
        Self::with_clock(config, budget, SystemClock).await
    }
}

impl<C: Clock + Clone> WorkQueue<C> {
    /// Create a new queue with a custom clock (useful for testing)
    ///
    /// Loads any persisted snapshot and starts the background persistence
    /// task when a persistence path is configured.
    pub async fn with_clock(
        config: QueueConfig,
        budget: Arc<BudgetTracker<C>>,
        clock: C,
    ) -> QueueResult<Self> {
        config.validate().map_err(QueueError::Common)?;

        let metrics = Arc::new(QueueMetrics::new());

        let persistence = config
            .persistence_path
            .as_ref()
            .map(|path| Arc::new(PersistenceService::new(path.clone()).with_metrics(metrics.clone())));

        let mut queue = Self {
            state: Arc::new(RwLock::new(QueueState::new())),
            config: Arc::new(config),
            metrics,
            budget,
            paused: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            persistence,
            persistence_handle: None,
            clock,
        };

        queue.load_persisted().await;
        queue.start_persistence_task();

        Ok(queue)
    }

    /// Load the persisted snapshot on startup
    ///
    /// In-flight items from a previous process are reset to `Pending`; their
    /// worker is gone, so the claim never completed.
    async fn load_persisted(&self) {
        let Some(service) = self.persistence.clone() else {
            return;
        };

        match service.load().await {
            Ok(items) => {
                let mut state = match self.state.write() {
                    Ok(state) => state,
                    Err(e) => {
                        error!("Queue state lock poisoned during startup: {}", e);
                        return;
                    }
                };

                for mut item in items {
                    match item.status {
                        WorkStatus::Completed => continue,
                        WorkStatus::InProgress => {
                            item.status = WorkStatus::Pending;
                            item.started_at_ms = None;
                            warn!(item_id = %item.id, "Reset in-flight item after restart");
                        }
                        _ => {}
                    }

                    let item_arc = Arc::new(item);
                    if item_arc.status.is_active() {
                        state
                            .active_targets
                            .insert(item_arc.target.clone(), item_arc.id.clone());
                    }
                    if item_arc.status == WorkStatus::Pending {
                        state.push_pending(item_arc.clone());
                    }
                    state.items.insert(item_arc.id.clone(), item_arc);
                }

                self.metrics.update_size(state.items.len());
                info!("Restored {} persisted items", state.items.len());
            }
            Err(e) => {
                warn!("Failed to load persisted queue: {}", e);
            }
        }
    }

    /// Start the background snapshot task
    fn start_persistence_task(&mut self) {
        let Some(service) = self.persistence.clone() else {
            return;
        };

        let state = self.state.clone();
        let interval = self.config.persistence_interval;
        let shutdown = self.shutdown.clone();
        let metrics = self.metrics.clone();
        let clock = self.clock.clone();

        match Handle::try_current() {
            Ok(runtime) => {
                let handle = runtime.spawn(async move {
                    let mut interval = tokio::time::interval(interval);
                    interval.tick().await;

                    loop {
                        interval.tick().await;

                        if shutdown.load(AtomicOrdering::Relaxed) {
                            break;
                        }

                        let items = match state.read() {
                            Ok(state) => {
                                state.items.values().map(|item| (**item).clone()).collect()
                            }
                            Err(e) => {
                                error!("Queue state lock poisoned during persistence: {}", e);
                                Vec::new()
                            }
                        };

                        if let Err(e) = service.save(items, clock.millis_since_epoch()).await {
                            error!("Failed to persist queue: {}", e);
                            metrics.record_persistence(false);
                        }
                    }
                });

                self.persistence_handle = Some(handle);
            }
            Err(_) => {
                warn!(
                    "Skipping persistence background task start: no active Tokio runtime detected"
                );
            }
        }
    }

    /// Enqueue a synchronization job for a target
    ///
    /// Rejected with `AlreadyQueued` while an active (pending, in-progress,
    /// or paused) item exists for the same target; a completed or failed
    /// item does not block re-enqueueing.
    #[instrument(skip(self, target), fields(target = %target.as_ref()))]
    pub async fn enqueue(
        &self,
        target: impl AsRef<str>,
        priority: u8,
    ) -> QueueResult<WorkItem> {
        if self.shutdown.load(AtomicOrdering::Relaxed) {
            return Err(QueueError::ShuttingDown);
        }

        let target = target.as_ref();
        let mut state = self.write_state()?;

        if state.items.len() >= self.config.max_capacity {
            self.metrics.record_capacity_rejection();
            return Err(QueueError::CapacityExceeded(self.config.max_capacity));
        }

        if state.active_targets.contains_key(target) {
            self.metrics.record_duplicate_rejection();
            return Err(QueueError::AlreadyQueued(target.to_string()));
        }

        let item = WorkItem::new(target, priority, self.clock.millis_since_epoch());
        let item_arc = Arc::new(item.clone());

        state.active_targets.insert(item.target.clone(), item.id.clone());
        state.items.insert(item.id.clone(), item_arc.clone());
        state.push_pending(item_arc);

        self.metrics.record_enqueue();
        self.metrics.update_size(state.items.len());

        // Wake a parked claimer
        self.notify.notify_one();

        debug!(item_id = %item.id, "Item enqueued");
        Ok(item)
    }

    /// Claim the next eligible item (non-blocking)
    ///
    /// Returns `None` when the queue is globally paused, budget admission
    /// denies background work, the queue is empty, or every pending item is
    /// still inside its retry backoff window.
    pub async fn claim_next(&self) -> QueueResult<Option<WorkItem>> {
        if self.shutdown.load(AtomicOrdering::Relaxed) {
            return Err(QueueError::ShuttingDown);
        }

        if self.paused.load(AtomicOrdering::Relaxed) {
            return Ok(None);
        }

        if !self.budget.can_proceed_background() {
            self.metrics.record_budget_denial();
            debug!("Claim denied by budget admission");
            return Ok(None);
        }

        let mut state = self.write_state()?;
        let now = self.clock.millis_since_epoch();

        // Items whose backoff window has not elapsed yet; restored after the
        // scan so they keep their heap position
        let mut deferred: Vec<PriorityItem> = Vec::new();
        let mut claimed: Option<WorkItem> = None;

        while let Some(priority_item) = state.heap.pop() {
            let item_id = priority_item.item.id.clone();

            // Stale heap entry: superseded by claim/pause/fail/remove
            let Some(current) = state.items.get(&item_id) else {
                continue;
            };
            if current.status != WorkStatus::Pending || state.in_progress.contains(&item_id) {
                continue;
            }

            if !current.is_claimable_at(now) {
                deferred.push(priority_item);
                continue;
            }

            let mut updated = (**current).clone();
            updated.mark_in_progress(now);

            state.items.insert(item_id.clone(), Arc::new(updated.clone()));
            state.in_progress.insert(item_id);
            claimed = Some(updated);
            break;
        }

        for priority_item in deferred {
            state.heap.push(priority_item);
        }

        if let Some(ref item) = claimed {
            self.metrics.record_claim();
            debug!(item_id = %item.id, target = %item.target, "Item claimed");
        }

        Ok(claimed)
    }

    /// Claim with wait (parks until an item is available or timeout)
    ///
    /// Wakes on enqueue/resume notifications and otherwise polls with the
    /// configured backoff, so a budget denial is re-evaluated without
    /// busy-spinning.
    pub async fn claim_next_wait(&self, timeout: Duration) -> QueueResult<Option<WorkItem>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(item) = self.claim_next().await? {
                return Ok(Some(item));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let wait = remaining.min(self.config.claim_backoff);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Mark a claimed item as successfully synchronized
    ///
    /// Removes the item from the live set; this is the trigger point for
    /// downstream cache refresh.
    pub async fn complete(&self, item_id: &str) -> QueueResult<WorkItem> {
        let mut state = self.write_state()?;

        let Some(item_arc) = state.items.get(item_id) else {
            return Err(QueueError::ItemNotFound(item_id.to_string()));
        };
        if item_arc.status != WorkStatus::InProgress {
            return Err(QueueError::InvalidTransition {
                from: item_arc.status,
                action: "complete",
            });
        }

        let mut item = (**item_arc).clone();
        item.mark_completed(self.clock.millis_since_epoch());

        state.in_progress.remove(item_id);
        state.items.remove(item_id);
        state.clear_active_target(&item.target, item_id);

        let duration_ms = match (item.started_at_ms, item.completed_at_ms) {
            (Some(started), Some(completed)) => Some(completed.saturating_sub(started)),
            _ => None,
        };
        self.metrics.record_completion(duration_ms);
        self.metrics.update_size(state.items.len());

        debug!(item_id = %item.id, target = %item.target, "Item completed");
        Ok(item)
    }

    /// Record a fetch failure for a claimed item
    ///
    /// Transient failures re-queue with exponential backoff until
    /// `max_attempts`, then escalate to terminal `Failed` (escalation is
    /// monotonic). Permanent failures terminate immediately. Returns whether
    /// a retry was scheduled.
    pub async fn fail(&self, item_id: &str, error: &FetchError) -> QueueResult<bool> {
        let mut state = self.write_state()?;

        let Some(item_arc) = state.items.get(item_id) else {
            return Err(QueueError::ItemNotFound(item_id.to_string()));
        };
        if item_arc.status != WorkStatus::InProgress {
            return Err(QueueError::InvalidTransition { from: item_arc.status, action: "fail" });
        }

        let mut item = (**item_arc).clone();
        state.in_progress.remove(item_id);

        let now = self.clock.millis_since_epoch();
        let will_retry = error.is_transient() && item.error_count + 1 < self.config.max_attempts;

        if will_retry {
            let delay = self.config.retry_delay(item.error_count);
            item.record_transient_failure(
                error.to_string(),
                now.saturating_add(delay.as_millis() as u64),
            );

            let attempt = item.error_count;
            let item_arc = Arc::new(item);
            state.items.insert(item_id.to_string(), item_arc.clone());
            state.push_pending(item_arc);

            self.metrics.record_retry();
            info!(
                item_id = %item_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, retry scheduled"
            );
        } else {
            let kind = error.kind();
            item.record_terminal_failure(error.to_string(), kind);
            state.clear_active_target(&item.target, item_id);
            state.items.insert(item_id.to_string(), Arc::new(item));

            self.metrics.record_failure();
            warn!(item_id = %item_id, %kind, "Item failed terminally");
        }

        self.metrics.update_size(state.items.len());
        Ok(will_retry)
    }

    /// Pause one item (operator control)
    ///
    /// Valid from `Pending` or `InProgress`. A paused in-flight item's
    /// eventual `complete`/`fail` call is rejected as an invalid transition
    /// and the worker moves on.
    pub fn pause_item(&self, item_id: &str) -> QueueResult<()> {
        let mut state = self.write_state()?;

        let Some(item_arc) = state.items.get(item_id) else {
            return Err(QueueError::ItemNotFound(item_id.to_string()));
        };
        if !matches!(item_arc.status, WorkStatus::Pending | WorkStatus::InProgress) {
            return Err(QueueError::InvalidTransition { from: item_arc.status, action: "pause" });
        }

        let mut item = (**item_arc).clone();
        item.status = WorkStatus::Paused;
        item.started_at_ms = None;

        state.in_progress.remove(item_id);
        state.items.insert(item_id.to_string(), Arc::new(item));

        info!(item_id = %item_id, "Item paused");
        Ok(())
    }

    /// Resume a paused item (operator control)
    pub fn resume_item(&self, item_id: &str) -> QueueResult<()> {
        let mut state = self.write_state()?;

        let Some(item_arc) = state.items.get(item_id) else {
            return Err(QueueError::ItemNotFound(item_id.to_string()));
        };
        if item_arc.status != WorkStatus::Paused {
            return Err(QueueError::InvalidTransition { from: item_arc.status, action: "resume" });
        }

        let mut item = (**item_arc).clone();
        item.status = WorkStatus::Pending;

        let item_arc = Arc::new(item);
        state.items.insert(item_id.to_string(), item_arc.clone());
        state.push_pending(item_arc);

        self.notify.notify_one();
        info!(item_id = %item_id, "Item resumed");
        Ok(())
    }

    /// Re-queue a failed item (operator control)
    ///
    /// Valid only from `Failed`; clears all error state. Rejected when a new
    /// active item for the same target was enqueued in the meantime.
    pub fn retry_item(&self, item_id: &str) -> QueueResult<()> {
        let mut state = self.write_state()?;

        let Some(item_arc) = state.items.get(item_id) else {
            return Err(QueueError::ItemNotFound(item_id.to_string()));
        };
        if item_arc.status != WorkStatus::Failed {
            return Err(QueueError::InvalidTransition { from: item_arc.status, action: "retry" });
        }

        let target = item_arc.target.clone();
        if state.active_targets.get(&target).is_some_and(|id| id != item_id) {
            return Err(QueueError::AlreadyQueued(target));
        }

        let mut item = (**item_arc).clone();
        item.reset_for_retry();

        let item_arc = Arc::new(item);
        state.active_targets.insert(target, item_id.to_string());
        state.items.insert(item_id.to_string(), item_arc.clone());
        state.push_pending(item_arc);

        self.metrics.record_retry();
        self.notify.notify_one();
        info!(item_id = %item_id, "Item re-queued by operator");
        Ok(())
    }

    /// Remove an item from the queue entirely (operator control)
    pub fn remove_item(&self, item_id: &str) -> QueueResult<WorkItem> {
        let mut state = self.write_state()?;

        let Some(item_arc) = state.items.remove(item_id) else {
            return Err(QueueError::ItemNotFound(item_id.to_string()));
        };

        state.in_progress.remove(item_id);
        state.clear_active_target(&item_arc.target, item_id);

        self.metrics.record_removal();
        self.metrics.update_size(state.items.len());

        info!(item_id = %item_id, "Item removed from queue");
        Ok((*item_arc).clone())
    }

    /// Gate all claims (operator control); per-item pause is independent
    pub fn pause_all(&self) {
        self.paused.store(true, AtomicOrdering::Relaxed);
        info!("Queue paused");
    }

    /// Re-open the global claim gate and wake parked claimers
    pub fn resume_all(&self) {
        self.paused.store(false, AtomicOrdering::Relaxed);
        self.notify.notify_waiters();
        info!("Queue resumed");
    }

    /// Whether the global claim gate is closed
    pub fn is_paused(&self) -> bool {
        self.paused.load(AtomicOrdering::Relaxed)
    }

    /// Wake parked claimers without changing any state
    ///
    /// Used by the pipeline wiring when the budget resumes.
    pub fn notify_waiters(&self) {
        self.notify.notify_waiters();
    }

    /// Get an item by id
    pub fn get_item(&self, item_id: &str) -> Option<WorkItem> {
        let state = self.state.read().ok()?;
        state.items.get(item_id).map(|item| (**item).clone())
    }

    /// Get all items with the given status
    pub fn items_by_status(&self, status: WorkStatus) -> Vec<WorkItem> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        state
            .items
            .values()
            .filter(|item| item.status == status)
            .map(|item| (**item).clone())
            .collect()
    }

    /// Number of live items (pending, in-progress, paused, failed)
    pub fn size(&self) -> usize {
        self.state.read().map(|state| state.items.len()).unwrap_or(0)
    }

    /// Check if the live set is empty
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Counts by status and error type for the admin surface
    pub fn stats(&self) -> QueueResult<QueueStatsSnapshot> {
        let state = self.read_state()?;

        let mut snapshot = QueueStatsSnapshot {
            pending: 0,
            in_progress: 0,
            paused: 0,
            failed: 0,
            failed_transient: 0,
            failed_permanent: 0,
            failed_unknown: 0,
            globally_paused: self.is_paused(),
            metrics: self.metrics.snapshot(),
        };

        for item in state.items.values() {
            match item.status {
                WorkStatus::Pending => snapshot.pending += 1,
                WorkStatus::InProgress => snapshot.in_progress += 1,
                WorkStatus::Paused => snapshot.paused += 1,
                WorkStatus::Failed => {
                    snapshot.failed += 1;
                    match item.error_kind {
                        Some(ErrorKind::Transient) => snapshot.failed_transient += 1,
                        Some(ErrorKind::Permanent) => snapshot.failed_permanent += 1,
                        Some(ErrorKind::Unknown) | None => snapshot.failed_unknown += 1,
                    }
                }
                WorkStatus::Completed => {}
            }
        }

        Ok(snapshot)
    }

    /// Get queue metrics
    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Force a snapshot write
    pub async fn persist(&self) -> QueueResult<()> {
        if let Some(ref service) = self.persistence {
            let items = {
                let state = self.read_state()?;
                state.items.values().map(|item| (**item).clone()).collect::<Vec<WorkItem>>()
            };

            service.save(items, self.clock.millis_since_epoch()).await?;
        }
        Ok(())
    }

    /// Shut down the queue gracefully, persisting the final state
    pub async fn shutdown(&self) -> QueueResult<()> {
        info!("Shutting down work queue...");

        self.shutdown.store(true, AtomicOrdering::Relaxed);
        self.notify.notify_waiters();

        if let Err(e) = self.persist().await {
            error!("Failed to persist queue during shutdown: {}", e);
        }

        info!("Work queue shutdown complete");
        Ok(())
    }

    fn read_state(&self) -> QueueResult<std::sync::RwLockReadGuard<'_, QueueState>> {
        self.state
            .read()
            .map_err(|e| QueueError::Common(CommonError::lock_resource("queue_state", e.to_string())))
    }

    fn write_state(&self) -> QueueResult<std::sync::RwLockWriteGuard<'_, QueueState>> {
        self.state
            .write()
            .map_err(|e| QueueError::Common(CommonError::lock_resource("queue_state", e.to_string())))
    }
}

impl<C: Clock + Clone> Clone for WorkQueue<C> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            budget: self.budget.clone(),
            paused: self.paused.clone(),
            shutdown: self.shutdown.clone(),
            notify: self.notify.clone(),
            persistence: self.persistence.clone(),
            persistence_handle: None,
            clock: self.clock.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the work queue.
    use raidsync_common::time::MockClock;

    use crate::budget::BudgetConfig;

    use super::*;

    async fn queue(clock: MockClock) -> WorkQueue<MockClock> {
        queue_with_config(clock, QueueConfig::default()).await
    }

    async fn queue_with_config(clock: MockClock, config: QueueConfig) -> WorkQueue<MockClock> {
        let budget =
            Arc::new(BudgetTracker::with_clock(BudgetConfig::default(), clock.clone()).unwrap());
        WorkQueue::with_clock(config, budget, clock).await.unwrap()
    }

    fn transient() -> FetchError {
        FetchError::Network("connection reset".into())
    }

    fn permanent() -> FetchError {
        FetchError::NotFound("guild disbanded".into())
    }

    /// Validates `enqueue` duplicate rejection and post-completion
    /// re-enqueueing.
    ///
    /// Assertions:
    /// - Confirms a second enqueue for a pending target is rejected.
    /// - Confirms enqueueing after completion succeeds.
    #[tokio::test]
    async fn test_enqueue_deduplication() {
        let q = queue(MockClock::new()).await;

        let item = q.enqueue("guild-1", 5).await.unwrap();
        let err = q.enqueue("guild-1", 9).await.unwrap_err();
        assert!(matches!(err, QueueError::AlreadyQueued(t) if t == "guild-1"));

        let claimed = q.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, item.id);
        q.complete(&claimed.id).await.unwrap();

        assert!(q.enqueue("guild-1", 5).await.is_ok());
    }

    /// Validates claim ordering: priority first, FIFO within a level.
    ///
    /// Assertions:
    /// - Confirms the higher-priority item is claimed before earlier
    ///   lower-priority items.
    /// - Confirms equal priorities are claimed in enqueue order.
    #[tokio::test]
    async fn test_claim_ordering() {
        let q = queue(MockClock::new()).await;

        let low_a = q.enqueue("guild-a", 1).await.unwrap();
        let low_b = q.enqueue("guild-b", 1).await.unwrap();
        let high = q.enqueue("guild-c", 9).await.unwrap();

        assert_eq!(q.claim_next().await.unwrap().unwrap().id, high.id);
        assert_eq!(q.claim_next().await.unwrap().unwrap().id, low_a.id);
        assert_eq!(q.claim_next().await.unwrap().unwrap().id, low_b.id);
        assert!(q.claim_next().await.unwrap().is_none());
    }

    /// Validates that a claimed item cannot be claimed twice.
    ///
    /// Assertions:
    /// - Confirms the second claim returns `None` while the first is in
    ///   flight.
    #[tokio::test]
    async fn test_exclusive_claim_ownership() {
        let q = queue(MockClock::new()).await;
        q.enqueue("guild-1", 5).await.unwrap();

        assert!(q.claim_next().await.unwrap().is_some());
        assert!(q.claim_next().await.unwrap().is_none());
    }

    /// Validates budget-denied claims leave items pending.
    ///
    /// Assertions:
    /// - Confirms `claim_next` returns `None` while the budget is exhausted.
    /// - Confirms the claim succeeds after the window resets.
    #[tokio::test]
    async fn test_budget_denies_claims() {
        let clock = MockClock::new();
        let q = queue(clock.clone()).await;

        q.enqueue("guild-1", 5).await.unwrap();
        q.budget.update_from_upstream(85.0, 100.0, Duration::from_secs(300));

        assert!(q.claim_next().await.unwrap().is_none());
        assert_eq!(q.get_item(&q.items_by_status(WorkStatus::Pending)[0].id).unwrap().status,
            WorkStatus::Pending);

        clock.advance(Duration::from_secs(301));
        assert!(q.claim_next().await.unwrap().is_some());
    }

    /// Validates transient failure handling: re-queue, count, backoff.
    ///
    /// Assertions:
    /// - Confirms the item returns to `Pending` with `error_count` 1.
    /// - Confirms the item is not claimable until the backoff elapses.
    #[tokio::test]
    async fn test_transient_failure_requeues_with_backoff() {
        let clock = MockClock::new();
        let q = queue(clock.clone()).await;

        let item = q.enqueue("guild-1", 5).await.unwrap();
        let claimed = q.claim_next().await.unwrap().unwrap();

        let retried = q.fail(&claimed.id, &transient()).await.unwrap();
        assert!(retried);

        let stored = q.get_item(&item.id).unwrap();
        assert_eq!(stored.status, WorkStatus::Pending);
        assert_eq!(stored.error_count, 1);
        assert_eq!(stored.error_kind, Some(ErrorKind::Transient));

        // Still inside the 1s base backoff window
        assert!(q.claim_next().await.unwrap().is_none());

        clock.advance(Duration::from_secs(2));
        assert!(q.claim_next().await.unwrap().is_some());
    }

    /// Validates permanent failure handling.
    ///
    /// Assertions:
    /// - Confirms the item lands in `Failed` with `permanent_failure` set.
    /// - Confirms failed items are excluded from claims.
    /// - Confirms the target can be re-enqueued afterwards.
    #[tokio::test]
    async fn test_permanent_failure_terminates() {
        let q = queue(MockClock::new()).await;

        let item = q.enqueue("guild-1", 5).await.unwrap();
        let claimed = q.claim_next().await.unwrap().unwrap();

        let retried = q.fail(&claimed.id, &permanent()).await.unwrap();
        assert!(!retried);

        let stored = q.get_item(&item.id).unwrap();
        assert_eq!(stored.status, WorkStatus::Failed);
        assert!(stored.permanent_failure);
        assert_eq!(stored.error_kind, Some(ErrorKind::Permanent));

        assert!(q.claim_next().await.unwrap().is_none());
        assert!(q.enqueue("guild-1", 5).await.is_ok());
    }

    /// Validates monotonic escalation after repeated transient failures.
    ///
    /// Assertions:
    /// - Confirms the item escalates to terminal `Failed` at `max_attempts`
    ///   and keeps its `Transient` classification.
    #[tokio::test]
    async fn test_transient_escalation() {
        let clock = MockClock::new();
        let config = QueueConfig { max_attempts: 3, ..QueueConfig::default() };
        let q = queue_with_config(clock.clone(), config).await;

        let item = q.enqueue("guild-1", 5).await.unwrap();

        for attempt in 1..=3 {
            clock.advance(Duration::from_secs(3600));
            let claimed = q.claim_next().await.unwrap().unwrap();
            let retried = q.fail(&claimed.id, &transient()).await.unwrap();
            assert_eq!(retried, attempt < 3);
        }

        let stored = q.get_item(&item.id).unwrap();
        assert_eq!(stored.status, WorkStatus::Failed);
        assert_eq!(stored.error_count, 3);
        assert_eq!(stored.error_kind, Some(ErrorKind::Transient));
        assert!(stored.permanent_failure);
    }

    /// Validates operator retry of a failed item.
    ///
    /// Assertions:
    /// - Confirms retry clears error state and the item becomes claimable.
    /// - Confirms retry from a non-failed state is rejected.
    #[tokio::test]
    async fn test_operator_retry() {
        let q = queue(MockClock::new()).await;

        let item = q.enqueue("guild-1", 5).await.unwrap();
        let claimed = q.claim_next().await.unwrap().unwrap();
        q.fail(&claimed.id, &permanent()).await.unwrap();

        q.retry_item(&item.id).unwrap();

        let stored = q.get_item(&item.id).unwrap();
        assert_eq!(stored.status, WorkStatus::Pending);
        assert_eq!(stored.error_count, 0);
        assert!(!stored.permanent_failure);

        let err = q.retry_item(&item.id).unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));
    }

    /// Validates pause and resume per item.
    ///
    /// Assertions:
    /// - Confirms a paused item is skipped by claims.
    /// - Confirms resuming restores claimability.
    /// - Confirms pausing a completed item is rejected.
    #[tokio::test]
    async fn test_item_pause_resume() {
        let q = queue(MockClock::new()).await;

        let item = q.enqueue("guild-1", 5).await.unwrap();
        q.pause_item(&item.id).unwrap();

        assert!(q.claim_next().await.unwrap().is_none());

        q.resume_item(&item.id).unwrap();
        let claimed = q.claim_next().await.unwrap().unwrap();
        q.complete(&claimed.id).await.unwrap();

        let err = q.pause_item(&item.id).unwrap_err();
        assert!(matches!(err, QueueError::ItemNotFound(_)));
    }

    /// Validates the global pause gate.
    ///
    /// Assertions:
    /// - Confirms no claims while paused, regardless of pending items.
    #[tokio::test]
    async fn test_global_pause() {
        let q = queue(MockClock::new()).await;
        q.enqueue("guild-1", 5).await.unwrap();

        q.pause_all();
        assert!(q.is_paused());
        assert!(q.claim_next().await.unwrap().is_none());

        q.resume_all();
        assert!(q.claim_next().await.unwrap().is_some());
    }

    /// Validates queue statistics aggregation.
    ///
    /// Assertions:
    /// - Confirms counts by status and the failed-by-kind breakdown.
    #[tokio::test]
    async fn test_stats() {
        let q = queue(MockClock::new()).await;

        q.enqueue("guild-1", 5).await.unwrap();
        q.enqueue("guild-2", 5).await.unwrap();
        let claimed = q.claim_next().await.unwrap().unwrap();
        q.fail(&claimed.id, &permanent()).await.unwrap();

        let paused = q.enqueue("guild-3", 1).await.unwrap();
        q.pause_item(&paused.id).unwrap();

        let stats = q.stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.paused, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.failed_permanent, 1);
        assert_eq!(stats.failed_transient, 0);
        assert_eq!(stats.metrics.total_enqueued, 3);
    }

    /// Validates capacity enforcement.
    ///
    /// Assertions:
    /// - Confirms enqueue past `max_capacity` is rejected.
    #[tokio::test]
    async fn test_capacity() {
        let config = QueueConfig { max_capacity: 2, ..QueueConfig::default() };
        let q = queue_with_config(MockClock::new(), config).await;

        q.enqueue("guild-1", 1).await.unwrap();
        q.enqueue("guild-2", 1).await.unwrap();

        let err = q.enqueue("guild-3", 1).await.unwrap_err();
        assert!(matches!(err, QueueError::CapacityExceeded(2)));
    }

    /// Validates `remove_item` clears every trace of the item.
    ///
    /// Assertions:
    /// - Confirms the target can be enqueued again immediately.
    #[tokio::test]
    async fn test_remove_item() {
        let q = queue(MockClock::new()).await;

        let item = q.enqueue("guild-1", 5).await.unwrap();
        q.remove_item(&item.id).unwrap();

        assert!(q.get_item(&item.id).is_none());
        assert!(q.enqueue("guild-1", 5).await.is_ok());
    }

    /// Validates `claim_next_wait` wakes on enqueue.
    ///
    /// Assertions:
    /// - Confirms a parked claimer receives an item enqueued after it
    ///   started waiting.
    #[tokio::test]
    async fn test_claim_next_wait_wakes_on_enqueue() {
        let q = Arc::new(queue(MockClock::new()).await);

        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.claim_next_wait(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        q.enqueue("guild-1", 5).await.unwrap();

        let claimed = waiter.await.unwrap().unwrap();
        assert!(claimed.is_some());
    }

    /// Validates persistence restore across queue instances.
    ///
    /// Assertions:
    /// - Confirms pending and failed items survive a restart.
    /// - Confirms in-flight items are reset to `Pending` on restore.
    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let clock = MockClock::new();
        let config = QueueConfig {
            persistence_path: Some(dir.path().join("queue.json")),
            ..QueueConfig::default()
        };

        let pending_id;
        let inflight_id;
        {
            let q = queue_with_config(clock.clone(), config.clone()).await;
            pending_id = q.enqueue("guild-1", 5).await.unwrap().id;
            q.enqueue("guild-2", 9).await.unwrap();
            inflight_id = q.claim_next().await.unwrap().unwrap().id;
            q.shutdown().await.unwrap();
        }

        let q = queue_with_config(clock, config).await;
        assert_eq!(q.size(), 2);
        assert_eq!(q.get_item(&pending_id).unwrap().status, WorkStatus::Pending);
        // The in-flight claim never completed; it must be claimable again
        assert_eq!(q.get_item(&inflight_id).unwrap().status, WorkStatus::Pending);
        assert!(q.claim_next().await.unwrap().is_some());
    }
}
