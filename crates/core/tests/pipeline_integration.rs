//! End-to-end tests for the composed synchronization pipeline.
//!
//! These tests wire the budget tracker, work queue, worker pool, and cache
//! together the way a composition root would: the fetch collaborator writes
//! normalized data into a local table and reports quota usage, the warmer
//! computes views from that table, and completed jobs refresh the views
//! they back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex as TokioMutex;

use raidsync_common::time::MockClock;
use raidsync_core::budget::{BudgetConfig, BudgetTracker};
use raidsync_core::cache::{CacheResult, CacheStore, MemoryStore, SwrCache, SwrCacheConfig, ViewWarmer};
use raidsync_core::pipeline::{wire_budget_events, RefreshOnComplete, SyncOnWarm};
use raidsync_core::ports::{CompletionHook, FetchHandler};
use raidsync_core::queue::{QueueConfig, WorkQueue};
use raidsync_core::worker::{SyncWorkerPool, WorkerPoolConfig};
use raidsync_domain::{FetchError, WorkItem, WorkStatus};

/// Normalized raid data shared between the fetcher and the warmer,
/// standing in for the application's persistence layer.
type RaidTable = Arc<TokioMutex<HashMap<String, Value>>>;

/// Fetch collaborator: produces normalized payloads, stores them in the
/// raid table, and reports authoritative quota usage after every call.
struct TableFetcher {
    table: RaidTable,
    budget: Arc<BudgetTracker<MockClock>>,
    /// Points consumed per call, reported back to the tracker
    cost_per_call: f64,
    quota_max: f64,
    used: TokioMutex<f64>,
}

#[async_trait::async_trait]
impl FetchHandler for TableFetcher {
    async fn fetch(&self, item: &WorkItem) -> Result<Value, FetchError> {
        if item.target == "missing-guild" {
            return Err(FetchError::NotFound(item.target.clone()));
        }

        let payload = json!({"guild": item.target, "bosses_down": 7});
        self.table.lock().await.insert(item.target.clone(), payload.clone());

        let mut used = self.used.lock().await;
        *used += self.cost_per_call;
        self.budget.update_from_upstream(*used, self.quota_max, Duration::from_secs(3600));

        Ok(payload)
    }
}

/// Warmer collaborator: computes the public progress view from the table.
struct ProgressWarmer {
    table: RaidTable,
}

#[async_trait::async_trait]
impl ViewWarmer<Value> for ProgressWarmer {
    async fn warm(&self, key: &str) -> CacheResult<Value> {
        let guild = key.trim_start_matches("progress:");
        let table = self.table.lock().await;
        let raid = table.get(guild).cloned().unwrap_or_else(|| json!({"guild": guild}));
        Ok(json!({"view": raid, "computed": true}))
    }
}

struct Pipeline {
    clock: MockClock,
    budget: Arc<BudgetTracker<MockClock>>,
    queue: Arc<WorkQueue<MockClock>>,
    cache: SwrCache<Value, MockClock>,
    table: RaidTable,
}

/// `enqueue_on_warm` registers the `SyncOnWarm` decorator (stale reads
/// queue background syncs); otherwise the plain warmer is registered.
async fn build_pipeline(enqueue_on_warm: bool) -> Pipeline {
    let clock = MockClock::new();
    let budget =
        Arc::new(BudgetTracker::with_clock(BudgetConfig::default(), clock.clone()).unwrap());

    let queue_config =
        QueueConfig { claim_backoff: Duration::from_millis(10), ..QueueConfig::default() };
    let queue = Arc::new(
        WorkQueue::with_clock(queue_config, Arc::clone(&budget), clock.clone()).await.unwrap(),
    );

    let store: Arc<dyn CacheStore<Value>> = Arc::new(MemoryStore::new());
    let cache_config = SwrCacheConfig::builder().hot_path("^progress:").build().unwrap();
    let cache = SwrCache::with_clock(cache_config, store, clock.clone()).unwrap();

    let table: RaidTable = Arc::new(TokioMutex::new(HashMap::new()));
    let progress_warmer = Arc::new(ProgressWarmer { table: Arc::clone(&table) });
    let warmer: Arc<dyn ViewWarmer<Value>> = if enqueue_on_warm {
        Arc::new(SyncOnWarm::new(
            Arc::clone(&queue),
            progress_warmer,
            |key: &str| key.trim_start_matches("progress:").to_string(),
            5,
            clock.clone(),
        ))
    } else {
        progress_warmer
    };
    cache.register_warmer("^progress:", warmer).unwrap();

    wire_budget_events(&budget, &queue);

    Pipeline { clock, budget, queue, cache, table }
}

fn start_pool(
    pipeline: &Pipeline,
    workers: usize,
    cost_per_call: f64,
    quota_max: f64,
) -> SyncWorkerPool<MockClock> {
    let fetcher: Arc<dyn FetchHandler> = Arc::new(TableFetcher {
        table: Arc::clone(&pipeline.table),
        budget: Arc::clone(&pipeline.budget),
        cost_per_call,
        quota_max,
        used: TokioMutex::new(0.0),
    });

    let hook: Arc<dyn CompletionHook> = Arc::new(RefreshOnComplete::new(
        pipeline.cache.clone(),
        |item: &WorkItem| format!("progress:{}", item.target),
    ));

    let mut pool = SyncWorkerPool::new(
        Arc::clone(&pipeline.queue),
        fetcher,
        WorkerPoolConfig {
            workers,
            idle_backoff: Duration::from_millis(10),
            join_timeout: Duration::from_secs(1),
        },
    )
    .with_completion_hook(hook);

    pool.start().unwrap();
    pool
}

async fn drain(queue: &WorkQueue<MockClock>) {
    for _ in 0..500 {
        if queue.items_by_status(WorkStatus::Pending).is_empty()
            && queue.items_by_status(WorkStatus::InProgress).is_empty()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue did not drain");
}

#[tokio::test(start_paused = true)]
async fn sync_flow_refreshes_cached_views() {
    let pipeline = build_pipeline(false).await;
    let mut pool = start_pool(&pipeline, 2, 1.0, 100.0);

    pipeline.queue.enqueue("alliance-of-dawn", 5).await.unwrap();
    pipeline.queue.enqueue("night-watch", 9).await.unwrap();

    drain(&pipeline.queue).await;
    // Allow the post-completion refreshes to settle
    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.stop().await.unwrap();

    let view = pipeline.cache.get("progress:night-watch").await.unwrap();
    assert_eq!(view["computed"], json!(true));
    assert_eq!(view["view"]["bosses_down"], json!(7));

    assert_eq!(pipeline.queue.metrics().total_completed, 2);
    assert_eq!(pipeline.table.lock().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn budget_exhaustion_parks_work_until_reset() {
    let pipeline = build_pipeline(false).await;
    // One worker, 45 points per call against a 100-point quota: the second
    // call crosses the 80% pause threshold, so the third target must wait
    // for the window reset
    let mut pool = start_pool(&pipeline, 1, 45.0, 100.0);

    pipeline.queue.enqueue("guild-a", 5).await.unwrap();
    pipeline.queue.enqueue("guild-b", 5).await.unwrap();
    pipeline.queue.enqueue("guild-c", 5).await.unwrap();

    // Give the workers time to process what the budget allows
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if pipeline.queue.metrics().total_completed == 2 {
            break;
        }
    }

    // Let the worker attempt (and be denied) another claim
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(pipeline.queue.metrics().total_completed, 2);
    assert_eq!(pipeline.queue.items_by_status(WorkStatus::Pending).len(), 1);
    assert!(!pipeline.budget.can_proceed_background());
    assert!(pipeline.queue.metrics().budget_denials > 0);

    // The quota window elapses; parked work resumes without operator action
    pipeline.clock.advance(Duration::from_secs(3601));

    drain(&pipeline.queue).await;
    pool.stop().await.unwrap();

    assert_eq!(pipeline.queue.metrics().total_completed, 3);
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_surfaces_in_stats_and_cache_serves_stale() {
    let pipeline = build_pipeline(false).await;

    // Seed a view so the cache has something to serve while sync fails
    pipeline
        .cache
        .set("progress:missing-guild", json!({"view": "old"}), Duration::from_millis(1_000))
        .await
        .unwrap();

    let mut pool = start_pool(&pipeline, 2, 1.0, 100.0);
    pipeline.queue.enqueue("missing-guild", 5).await.unwrap();
    drain(&pipeline.queue).await;
    pool.stop().await.unwrap();

    let stats = pipeline.queue.stats().unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.failed_permanent, 1);

    // Stale window still serves the prior view; the scheduled background
    // refresh recomputes from the table without upstream data
    pipeline.clock.advance(Duration::from_millis(1_500));
    let served = pipeline.cache.get("progress:missing-guild").await.unwrap();
    assert_eq!(served, json!({"view": "old"}));
}

#[tokio::test(start_paused = true)]
async fn stale_read_enqueues_background_sync() {
    let pipeline = build_pipeline(true).await;

    pipeline
        .cache
        .set("progress:edgewalkers", json!({"view": "old"}), Duration::from_millis(1_000))
        .await
        .unwrap();

    pipeline.clock.advance(Duration::from_millis(1_500));

    // Stale hit: serves the old view and the warmer queues a sync job
    let served = pipeline.cache.get("progress:edgewalkers").await.unwrap();
    assert_eq!(served, json!({"view": "old"}));

    tokio::time::sleep(Duration::from_millis(20)).await;

    let pending = pipeline.queue.items_by_status(WorkStatus::Pending);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].target, "edgewalkers");
}
