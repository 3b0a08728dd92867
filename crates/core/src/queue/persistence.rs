use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use raidsync_domain::WorkItem;

use super::errors::QueueResult;
use super::metrics::QueueMetrics;

/// Persistence format version
const PERSISTENCE_VERSION: u32 = 1;

/// Persistence metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceMetadata {
    pub version: u32,
    pub created_at_ms: u64,
    pub item_count: usize,
}

/// Persisted queue snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedQueue {
    pub metadata: PersistenceMetadata,
    pub items: Vec<WorkItem>,
}

/// Queue snapshot persistence
///
/// Writes go to a temporary file first and are renamed into place so a crash
/// mid-write never corrupts the snapshot. A sha256 sidecar file detects
/// torn or tampered snapshots on load.
pub struct PersistenceService {
    path: PathBuf,
    metrics: Option<Arc<QueueMetrics>>,
}

impl PersistenceService {
    /// Create new persistence service
    pub fn new(path: PathBuf) -> Self {
        Self { path, metrics: None }
    }

    /// Set metrics reference
    pub fn with_metrics(mut self, metrics: Arc<QueueMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Save a queue snapshot to disk
    #[instrument(skip(self, items), fields(item_count = items.len()))]
    pub async fn save(&self, items: Vec<WorkItem>, now_ms: u64) -> QueueResult<()> {
        let start = std::time::Instant::now();

        let metadata = PersistenceMetadata {
            version: PERSISTENCE_VERSION,
            created_at_ms: now_ms,
            item_count: items.len(),
        };

        let snapshot = PersistedQueue { metadata, items };
        let data = serde_json::to_vec(&snapshot)?;
        let checksum = calculate_checksum(&data);

        // Write to temporary file first for atomicity
        let temp_path = self.path.with_extension("tmp");

        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;

        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        // Atomic rename
        fs::rename(&temp_path, &self.path).await?;

        // Checksum sidecar is best-effort
        let checksum_path = self.path.with_extension("sha256");
        fs::write(&checksum_path, checksum).await.ok();

        if let Some(ref metrics) = self.metrics {
            metrics.record_persistence(true);
        }

        info!(
            "Persisted {} items in {:?} ({} bytes)",
            snapshot.items.len(),
            start.elapsed(),
            data.len()
        );

        Ok(())
    }

    /// Load the queue snapshot from disk
    ///
    /// Returns an empty list when no snapshot exists yet.
    #[instrument(skip(self))]
    pub async fn load(&self) -> QueueResult<Vec<WorkItem>> {
        if !self.path.exists() {
            debug!("Persistence file does not exist: {:?}", self.path);
            return Ok(Vec::new());
        }

        let data = fs::read(&self.path).await?;

        // Verify checksum if available
        let checksum_path = self.path.with_extension("sha256");
        if checksum_path.exists() {
            if let Ok(expected) = fs::read_to_string(&checksum_path).await {
                if calculate_checksum(&data) != expected {
                    warn!("Checksum mismatch, snapshot may be corrupted");
                }
            }
        }

        let snapshot: PersistedQueue = serde_json::from_slice(&data)?;

        if snapshot.metadata.version != PERSISTENCE_VERSION {
            warn!(
                "Persistence version mismatch: expected {}, got {}",
                PERSISTENCE_VERSION, snapshot.metadata.version
            );
        }

        if let Some(ref metrics) = self.metrics {
            metrics.record_persistence(true);
        }

        info!("Loaded {} persisted items", snapshot.items.len());
        Ok(snapshot.items)
    }

    /// Delete the snapshot and its checksum sidecar
    pub async fn delete(&self) -> QueueResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).await?;
            debug!("Deleted persistence file: {:?}", self.path);
        }

        let checksum_path = self.path.with_extension("sha256");
        if checksum_path.exists() {
            fs::remove_file(&checksum_path).await.ok();
        }

        Ok(())
    }
}

/// Calculate a sha256 checksum as lowercase hex
fn calculate_checksum(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    //! Unit tests for queue persistence.
    use super::*;

    /// Validates the save/load round trip for a queue snapshot.
    ///
    /// Assertions:
    /// - Confirms items survive with ids and statuses intact.
    /// - Confirms the checksum sidecar is written.
    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let service = PersistenceService::new(path.clone());

        let items =
            vec![WorkItem::new("guild-1", 5, 1_000), WorkItem::new("guild-2", 3, 2_000)];
        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();

        service.save(items, 10_000).await.unwrap();
        assert!(path.exists());
        assert!(path.with_extension("sha256").exists());

        let loaded = service.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, ids[0]);
        assert_eq!(loaded[1].target, "guild-2");
    }

    /// Validates loading when no snapshot exists yet.
    ///
    /// Assertions:
    /// - Confirms an empty list is returned without error.
    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = PersistenceService::new(dir.path().join("missing.json"));

        let loaded = service.load().await.unwrap();
        assert!(loaded.is_empty());
    }

    /// Validates `delete` removes both snapshot and sidecar.
    ///
    /// Assertions:
    /// - Confirms neither file remains after deletion.
    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let service = PersistenceService::new(path.clone());

        service.save(vec![WorkItem::new("guild-1", 1, 0)], 0).await.unwrap();
        service.delete().await.unwrap();

        assert!(!path.exists());
        assert!(!path.with_extension("sha256").exists());
    }

    /// Validates that corrupted snapshots surface a serialization error.
    ///
    /// Assertions:
    /// - Confirms `load` fails rather than returning garbage.
    #[tokio::test]
    async fn test_load_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        tokio::fs::write(&path, b"{not a snapshot").await.unwrap();

        let service = PersistenceService::new(path);
        assert!(service.load().await.is_err());
    }
}
