//! Work item model for the synchronization queue

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ErrorKind;

/// Status of a work item in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkStatus {
    /// Waiting to be claimed by a worker
    Pending,
    /// Claimed by exactly one worker
    InProgress,
    /// Parked by an operator; resumes to `Pending`
    Paused,
    /// Terminal until an operator retries it
    Failed,
    /// Successfully synchronized
    Completed,
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Paused => write!(f, "Paused"),
            Self::Failed => write!(f, "Failed"),
            Self::Completed => write!(f, "Completed"),
        }
    }
}

impl WorkStatus {
    /// Whether an item in this status blocks another enqueue for the same
    /// target. Paused items count: resuming one must not collide with a
    /// duplicate enqueued meanwhile.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Paused)
    }
}

/// One unit of background synchronization work (e.g. one guild)
///
/// Timestamps are epoch milliseconds supplied by the owning component's
/// clock; the item itself never reads the system clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    /// Opaque reference to the synchronization target
    pub target: String,
    /// Higher values are claimed sooner
    pub priority: u8,
    pub status: WorkStatus,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Set when the item reached a terminal failure requiring operator retry
    pub permanent_failure: bool,
    pub created_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    /// Retry backoff gate; the item is not claimable before this time
    pub next_attempt_at_ms: Option<u64>,
}

impl WorkItem {
    /// Create a new pending work item
    pub fn new(target: impl Into<String>, priority: u8, now_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target: target.into(),
            priority,
            status: WorkStatus::Pending,
            error_count: 0,
            last_error: None,
            error_kind: None,
            permanent_failure: false,
            created_at_ms: now_ms,
            started_at_ms: None,
            completed_at_ms: None,
            next_attempt_at_ms: None,
        }
    }

    /// Mark the item as claimed by a worker
    pub fn mark_in_progress(&mut self, now_ms: u64) {
        self.status = WorkStatus::InProgress;
        self.started_at_ms = Some(now_ms);
    }

    /// Mark the item as successfully synchronized
    pub fn mark_completed(&mut self, now_ms: u64) {
        self.status = WorkStatus::Completed;
        self.completed_at_ms = Some(now_ms);
    }

    /// Record a transient failure and schedule the next attempt
    pub fn record_transient_failure(
        &mut self,
        error: impl Into<String>,
        next_attempt_at_ms: u64,
    ) {
        self.status = WorkStatus::Pending;
        self.error_count += 1;
        self.last_error = Some(error.into());
        self.error_kind = Some(ErrorKind::Transient);
        self.started_at_ms = None;
        self.next_attempt_at_ms = Some(next_attempt_at_ms);
    }

    /// Record a terminal failure requiring operator intervention
    pub fn record_terminal_failure(&mut self, error: impl Into<String>, kind: ErrorKind) {
        self.status = WorkStatus::Failed;
        self.error_count += 1;
        self.last_error = Some(error.into());
        self.error_kind = Some(kind);
        self.permanent_failure = true;
        self.started_at_ms = None;
        self.next_attempt_at_ms = None;
    }

    /// Clear failure state and return the item to the pending pool
    ///
    /// Operator retry: valid only from `Failed`.
    pub fn reset_for_retry(&mut self) {
        self.status = WorkStatus::Pending;
        self.error_count = 0;
        self.last_error = None;
        self.error_kind = None;
        self.permanent_failure = false;
        self.started_at_ms = None;
        self.next_attempt_at_ms = None;
    }

    /// Whether the backoff gate allows claiming at `now_ms`
    pub fn is_claimable_at(&self, now_ms: u64) -> bool {
        self.status == WorkStatus::Pending
            && self.next_attempt_at_ms.map_or(true, |at| now_ms >= at)
    }
}
