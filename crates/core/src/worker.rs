//! Bounded worker pool driving the work queue
//!
//! A fixed number of workers repeatedly claim items and delegate the fetch
//! to the injected collaborator. Lifecycle management follows explicit
//! start/stop semantics: join handles are tracked, cancellation is explicit,
//! and dropping a running pool cancels its tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use raidsync_common::time::{Clock, SystemClock};
use raidsync_domain::WorkItem;

use crate::ports::{CompletionHook, FetchHandler};
use crate::queue::{QueueError, WorkQueue};

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// How long a worker parks when the queue is empty or budget-denied
    pub idle_backoff: Duration,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            idle_backoff: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Worker pool with explicit lifecycle management
pub struct SyncWorkerPool<C: Clock = SystemClock> {
    queue: Arc<WorkQueue<C>>,
    fetcher: Arc<dyn FetchHandler>,
    on_complete: Option<Arc<dyn CompletionHook>>,
    config: WorkerPoolConfig,
    cancellation: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl<C: Clock + Clone> SyncWorkerPool<C> {
    /// Create a new worker pool
    pub fn new(
        queue: Arc<WorkQueue<C>>,
        fetcher: Arc<dyn FetchHandler>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            fetcher,
            on_complete: None,
            config,
            cancellation: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Attach a hook invoked after each successful completion
    pub fn with_completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.on_complete = Some(hook);
        self
    }

    /// Start the pool, spawning the worker tasks
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<(), String> {
        if self.is_running() {
            return Err("Worker pool already running".to_string());
        }
        if self.config.workers == 0 {
            return Err("Worker pool requires at least one worker".to_string());
        }

        info!(workers = self.config.workers, "Starting worker pool");

        // Create fresh cancellation token
        self.cancellation = CancellationToken::new();

        for worker_id in 0..self.config.workers {
            let queue = Arc::clone(&self.queue);
            let fetcher = Arc::clone(&self.fetcher);
            let on_complete = self.on_complete.clone();
            let idle_backoff = self.config.idle_backoff;
            let cancel = self.cancellation.clone();

            let handle = tokio::spawn(async move {
                Self::worker_loop(worker_id, queue, fetcher, on_complete, idle_backoff, cancel)
                    .await;
            });

            self.handles.push(handle);
        }

        info!("Worker pool started");
        Ok(())
    }

    /// Stop the pool and wait for the worker tasks to finish
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<(), String> {
        if !self.is_running() {
            return Err("Worker pool not running".to_string());
        }

        info!("Stopping worker pool");
        self.cancellation.cancel();

        let join_timeout = self.config.join_timeout;
        for handle in self.handles.drain(..) {
            match tokio::time::timeout(join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Worker task panicked: {}", e);
                    return Err("Worker task panicked".to_string());
                }
                Err(_) => {
                    warn!("Worker task did not complete within timeout");
                    return Err("Worker task timeout".to_string());
                }
            }
        }

        self.cancellation = CancellationToken::new();
        info!("Worker pool stopped");
        Ok(())
    }

    /// Returns true when worker tasks are active
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// One worker's claim/fetch/settle loop
    ///
    /// A single item's failure never stops the loop; only cancellation or
    /// queue shutdown ends it.
    async fn worker_loop(
        worker_id: usize,
        queue: Arc<WorkQueue<C>>,
        fetcher: Arc<dyn FetchHandler>,
        on_complete: Option<Arc<dyn CompletionHook>>,
        idle_backoff: Duration,
        cancel: CancellationToken,
    ) {
        debug!(worker_id, "Worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(worker_id, "Worker cancelled");
                    break;
                }
                claimed = queue.claim_next_wait(idle_backoff) => {
                    match claimed {
                        Ok(Some(item)) => {
                            Self::process_item(worker_id, &queue, &fetcher, &on_complete, item)
                                .await;
                        }
                        Ok(None) => {
                            // Empty or budget-denied; claim_next_wait already
                            // parked for the backoff window
                        }
                        Err(QueueError::ShuttingDown) => {
                            debug!(worker_id, "Queue shutting down; worker exiting");
                            break;
                        }
                        Err(e) => {
                            error!(worker_id, error = %e, "Claim failed");
                            tokio::time::sleep(idle_backoff).await;
                        }
                    }
                }
            }
        }

        debug!(worker_id, "Worker stopped");
    }

    /// Fetch one claimed item and settle its outcome
    async fn process_item(
        worker_id: usize,
        queue: &Arc<WorkQueue<C>>,
        fetcher: &Arc<dyn FetchHandler>,
        on_complete: &Option<Arc<dyn CompletionHook>>,
        item: WorkItem,
    ) {
        debug!(worker_id, item_id = %item.id, target = %item.target, "Processing item");

        match fetcher.fetch(&item).await {
            Ok(payload) => match queue.complete(&item.id).await {
                Ok(completed) => {
                    if let Some(hook) = on_complete {
                        hook.on_completed(&completed, &payload).await;
                    }
                }
                Err(e) => {
                    // The item was paused or removed while in flight
                    warn!(item_id = %item.id, error = %e, "Completion rejected");
                }
            },
            Err(fetch_error) => match queue.fail(&item.id, &fetch_error).await {
                Ok(retry_scheduled) => {
                    debug!(
                        item_id = %item.id,
                        retry_scheduled,
                        "Item failed: {fetch_error}"
                    );
                }
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "Failure recording rejected");
                }
            },
        }
    }
}

impl<C: Clock> Drop for SyncWorkerPool<C> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            warn!("SyncWorkerPool dropped while running; cancelling tasks");
            self.cancellation.cancel();
        }
    }
}
