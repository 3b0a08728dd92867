use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

/// Queue metrics for monitoring
#[derive(Debug, Default)]
pub struct QueueMetrics {
    pub total_enqueued: AtomicU64,
    pub total_claimed: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_failed: AtomicU64,
    pub total_retried: AtomicU64,
    pub total_removed: AtomicU64,
    pub current_size: AtomicUsize,
    pub capacity_rejections: AtomicU64,
    pub duplicate_rejections: AtomicU64,
    pub budget_denials: AtomicU64,
    pub persistence_operations: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub processing_time_total_ms: AtomicU64,
    pub queue_depth_max: AtomicUsize,
}

impl QueueMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record enqueue operation
    pub fn record_enqueue(&self) {
        self.total_enqueued.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record a successful claim
    pub fn record_claim(&self) {
        self.total_claimed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record completion with its processing duration
    pub fn record_completion(&self, duration_ms: Option<u64>) {
        self.total_completed.fetch_add(1, AtomicOrdering::Relaxed);
        if let Some(ms) = duration_ms {
            self.processing_time_total_ms.fetch_add(ms, AtomicOrdering::Relaxed);
        }
    }

    /// Record terminal failure
    pub fn record_failure(&self) {
        self.total_failed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record retry scheduling (transient failure or operator retry)
    pub fn record_retry(&self) {
        self.total_retried.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record operator removal
    pub fn record_removal(&self) {
        self.total_removed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record capacity rejection
    pub fn record_capacity_rejection(&self) {
        self.capacity_rejections.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record duplicate-target rejection
    pub fn record_duplicate_rejection(&self) {
        self.duplicate_rejections.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record a claim denied by budget admission
    pub fn record_budget_denial(&self) {
        self.budget_denials.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record persistence operation
    pub fn record_persistence(&self, success: bool) {
        self.persistence_operations.fetch_add(1, AtomicOrdering::Relaxed);
        if !success {
            self.persistence_failures.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    /// Update current size
    pub fn update_size(&self, size: usize) {
        self.current_size.store(size, AtomicOrdering::Relaxed);
        self.update_max_depth();
    }

    /// Update maximum depth if current exceeds it
    fn update_max_depth(&self) {
        let current = self.current_size.load(AtomicOrdering::Relaxed);
        let mut max = self.queue_depth_max.load(AtomicOrdering::Relaxed);

        while current > max {
            match self.queue_depth_max.compare_exchange_weak(
                max,
                current,
                AtomicOrdering::Relaxed,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => max = actual,
            }
        }
    }

    /// Get a snapshot of metrics
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            total_enqueued: self.total_enqueued.load(AtomicOrdering::Relaxed),
            total_claimed: self.total_claimed.load(AtomicOrdering::Relaxed),
            total_completed: self.total_completed.load(AtomicOrdering::Relaxed),
            total_failed: self.total_failed.load(AtomicOrdering::Relaxed),
            total_retried: self.total_retried.load(AtomicOrdering::Relaxed),
            total_removed: self.total_removed.load(AtomicOrdering::Relaxed),
            current_size: self.current_size.load(AtomicOrdering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(AtomicOrdering::Relaxed),
            duplicate_rejections: self.duplicate_rejections.load(AtomicOrdering::Relaxed),
            budget_denials: self.budget_denials.load(AtomicOrdering::Relaxed),
            persistence_operations: self.persistence_operations.load(AtomicOrdering::Relaxed),
            persistence_failures: self.persistence_failures.load(AtomicOrdering::Relaxed),
            processing_time_total_ms: self.processing_time_total_ms.load(AtomicOrdering::Relaxed),
            queue_depth_max: self.queue_depth_max.load(AtomicOrdering::Relaxed),
            average_processing_time_ms: self.calculate_average_processing_time(),
            success_rate: self.calculate_success_rate(),
        }
    }

    /// Calculate average processing time
    fn calculate_average_processing_time(&self) -> f64 {
        let completed = self.total_completed.load(AtomicOrdering::Relaxed);
        if completed == 0 {
            return 0.0;
        }
        let total_ms = self.processing_time_total_ms.load(AtomicOrdering::Relaxed);
        total_ms as f64 / completed as f64
    }

    /// Calculate success rate
    fn calculate_success_rate(&self) -> f64 {
        let completed = self.total_completed.load(AtomicOrdering::Relaxed);
        let failed = self.total_failed.load(AtomicOrdering::Relaxed);
        let total = completed + failed;

        if total == 0 {
            return 100.0;
        }

        (completed as f64 / total as f64) * 100.0
    }
}

/// Immutable metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetricsSnapshot {
    pub total_enqueued: u64,
    pub total_claimed: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    pub total_removed: u64,
    pub current_size: usize,
    pub capacity_rejections: u64,
    pub duplicate_rejections: u64,
    pub budget_denials: u64,
    pub persistence_operations: u64,
    pub persistence_failures: u64,
    pub processing_time_total_ms: u64,
    pub queue_depth_max: usize,
    pub average_processing_time_ms: f64,
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    //! Unit tests for queue metrics.
    use super::*;

    /// Validates counter recording and the derived snapshot figures.
    ///
    /// Assertions:
    /// - Confirms counters accumulate per call.
    /// - Confirms the average processing time and success rate derivations.
    #[test]
    fn test_snapshot_derivations() {
        let metrics = QueueMetrics::new();

        metrics.record_enqueue();
        metrics.record_enqueue();
        metrics.record_claim();
        metrics.record_completion(Some(100));
        metrics.record_completion(Some(300));
        metrics.record_failure();

        let snap = metrics.snapshot();
        assert_eq!(snap.total_enqueued, 2);
        assert_eq!(snap.total_claimed, 1);
        assert_eq!(snap.total_completed, 2);
        assert_eq!(snap.total_failed, 1);
        assert_eq!(snap.average_processing_time_ms, 200.0);
        assert!((snap.success_rate - 66.666).abs() < 0.01);
    }

    /// Validates the high-water mark tracking in `update_size`.
    ///
    /// Assertions:
    /// - Confirms `queue_depth_max` retains the maximum observed size.
    #[test]
    fn test_max_depth_tracking() {
        let metrics = QueueMetrics::new();

        metrics.update_size(5);
        metrics.update_size(12);
        metrics.update_size(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.current_size, 3);
        assert_eq!(snap.queue_depth_max, 12);
    }

    /// Validates the success rate with no processed items.
    ///
    /// Assertions:
    /// - Confirms an idle queue reports a 100% success rate.
    #[test]
    fn test_success_rate_idle() {
        let metrics = QueueMetrics::new();
        assert_eq!(metrics.snapshot().success_rate, 100.0);
    }
}
