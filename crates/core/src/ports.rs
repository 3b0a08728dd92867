//! Port interfaces for pipeline collaborators
//!
//! The core never talks to the upstream API or the view computation layer
//! directly; both capabilities are injected through these traits by the
//! composition root.

use async_trait::async_trait;

use raidsync_domain::{FetchError, WorkItem};

/// Upstream fetch capability supplied by the data-source integration
///
/// Implementations own request shaping and MUST report authoritative quota
/// usage to the budget tracker after every upstream call; the worker loop
/// never mutates the budget itself.
#[async_trait]
pub trait FetchHandler: Send + Sync {
    /// Fetch and normalize the data for one work item
    async fn fetch(&self, item: &WorkItem) -> Result<serde_json::Value, FetchError>;
}

/// Hook invoked after a work item completes successfully
///
/// This is the integration point where completed synchronization work flows
/// into the cache (see the pipeline module).
#[async_trait]
pub trait CompletionHook: Send + Sync {
    /// Called with the completed item and the fetched payload
    async fn on_completed(&self, item: &WorkItem, payload: &serde_json::Value);
}
