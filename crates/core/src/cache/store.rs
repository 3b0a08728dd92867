//! Durable tier storage for the stale-while-revalidate cache
//!
//! The cache owns the freshness logic; stores only hold entries. Two
//! implementations are provided: `MemoryStore` for tests and compositions
//! that do not need durability, and `FileStore`, a write-through JSON
//! snapshot with atomic rename and checksum sidecar.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use raidsync_common::error::{CommonError, CommonResult};

/// Freshness of an entry relative to its two expiry horizons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Before the fresh horizon; serve without any background action
    Fresh,
    /// Between the horizons; serve and schedule a refresh
    Stale,
    /// Past the hard-expiry horizon; treat as absent
    Expired,
}

/// A cache entry with its expiry horizons
///
/// Invariant: `cached_at_ms <= expires_at_ms <= stale_expires_at_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry<V> {
    pub data: V,
    pub cached_at_ms: u64,
    pub expires_at_ms: u64,
    pub stale_expires_at_ms: u64,
    pub ttl_ms: u64,
}

impl<V> StoredEntry<V> {
    /// Classify this entry relative to `now_ms`
    pub fn freshness(&self, now_ms: u64) -> Freshness {
        if now_ms < self.expires_at_ms {
            Freshness::Fresh
        } else if now_ms < self.stale_expires_at_ms {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

/// Port for the durable cache tier
#[async_trait]
pub trait CacheStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Load an entry by key
    async fn get(&self, key: &str) -> CommonResult<Option<StoredEntry<V>>>;

    /// Store an entry, replacing any previous one atomically
    async fn put(&self, key: &str, entry: StoredEntry<V>) -> CommonResult<()>;

    /// Remove an entry; returns whether one existed
    async fn remove(&self, key: &str) -> CommonResult<bool>;

    /// Remove all entries whose key matches the pattern; returns the count
    async fn remove_matching(&self, pattern: &Regex) -> CommonResult<usize>;
}

/// In-memory store for tests and non-durable compositions
pub struct MemoryStore<V> {
    entries: RwLock<HashMap<String, StoredEntry<V>>>,
}

impl<V> MemoryStore<V> {
    /// Create an empty store
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> CacheStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CommonResult<Option<StoredEntry<V>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: StoredEntry<V>) -> CommonResult<()> {
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> CommonResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn remove_matching(&self, pattern: &Regex) -> CommonResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern.is_match(key));
        Ok(before - entries.len())
    }
}

/// Snapshot format version
const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore<V> {
    version: u32,
    entries: HashMap<String, StoredEntry<V>>,
}

/// Write-through file-backed store
///
/// The whole map is held in memory and mirrored to a JSON snapshot on every
/// mutation: a temporary file is written, synced, and renamed into place so
/// a crash mid-write never corrupts the snapshot. A sha256 sidecar detects
/// torn snapshots on open.
pub struct FileStore<V> {
    path: PathBuf,
    entries: RwLock<HashMap<String, StoredEntry<V>>>,
}

impl<V> FileStore<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Open the store, loading an existing snapshot if present
    pub async fn open(path: PathBuf) -> CommonResult<Self> {
        let entries = if path.exists() {
            let data = fs::read(&path).await?;

            let checksum_path = path.with_extension("sha256");
            if checksum_path.exists() {
                if let Ok(expected) = fs::read_to_string(&checksum_path).await {
                    if calculate_checksum(&data) != expected {
                        warn!("Checksum mismatch, cache snapshot may be corrupted");
                    }
                }
            }

            let persisted: PersistedStore<V> = serde_json::from_slice(&data)?;
            if persisted.version != STORE_VERSION {
                warn!(
                    "Cache snapshot version mismatch: expected {}, got {}",
                    STORE_VERSION, persisted.version
                );
            }
            debug!("Loaded {} cached entries", persisted.entries.len());
            persisted.entries
        } else {
            HashMap::new()
        };

        Ok(Self { path, entries: RwLock::new(entries) })
    }

    /// Mirror the in-memory map to disk; callers hold the write lock
    async fn save(&self, entries: &HashMap<String, StoredEntry<V>>) -> CommonResult<()> {
        let persisted =
            PersistedStore { version: STORE_VERSION, entries: entries.clone() };
        let data = serde_json::to_vec(&persisted)?;
        let checksum = calculate_checksum(&data);

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

        fs::rename(&temp_path, &self.path).await?;
        fs::write(self.path.with_extension("sha256"), checksum).await.ok();

        Ok(())
    }
}

#[async_trait]
impl<V> CacheStore<V> for FileStore<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn get(&self, key: &str) -> CommonResult<Option<StoredEntry<V>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: StoredEntry<V>) -> CommonResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);
        self.save(&entries).await
    }

    async fn remove(&self, key: &str) -> CommonResult<bool> {
        let mut entries = self.entries.write().await;
        let existed = entries.remove(key).is_some();
        if existed {
            self.save(&entries).await?;
        }
        Ok(existed)
    }

    async fn remove_matching(&self, pattern: &Regex) -> CommonResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern.is_match(key));
        let removed = before - entries.len();
        if removed > 0 {
            self.save(&entries).await?;
        }
        Ok(removed)
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
    //! Unit tests for cache stores.
    use serde_json::json;

    use super::*;

    fn entry(v: serde_json::Value, cached: u64, ttl: u64) -> StoredEntry<serde_json::Value> {
        StoredEntry {
            data: v,
            cached_at_ms: cached,
            expires_at_ms: cached + ttl,
            stale_expires_at_ms: cached + ttl * 2,
            ttl_ms: ttl,
        }
    }

    /// Validates `Freshness` classification across both horizons.
    ///
    /// Assertions:
    /// - Confirms fresh before expiry, stale between horizons, expired after.
    #[test]
    fn test_freshness() {
        let e = entry(json!(1), 1_000, 1_000);
        assert_eq!(e.freshness(1_500), Freshness::Fresh);
        assert_eq!(e.freshness(2_000), Freshness::Stale);
        assert_eq!(e.freshness(2_999), Freshness::Stale);
        assert_eq!(e.freshness(3_000), Freshness::Expired);
    }

    /// Validates `MemoryStore` round trip and pattern removal.
    ///
    /// Assertions:
    /// - Confirms put/get/remove behave as a map.
    /// - Confirms `remove_matching` only removes matching keys.
    #[tokio::test]
    async fn test_memory_store() {
        let store: MemoryStore<serde_json::Value> = MemoryStore::new();

        store.put("guild:1", entry(json!({"p": 1}), 0, 100)).await.unwrap();
        store.put("guild:2", entry(json!({"p": 2}), 0, 100)).await.unwrap();
        store.put("roster:1", entry(json!([]), 0, 100)).await.unwrap();

        assert!(store.get("guild:1").await.unwrap().is_some());
        assert!(store.get("guild:9").await.unwrap().is_none());

        let pattern = Regex::new("^guild:").unwrap();
        assert_eq!(store.remove_matching(&pattern).await.unwrap(), 2);
        assert!(store.get("guild:1").await.unwrap().is_none());
        assert!(store.get("roster:1").await.unwrap().is_some());

        assert!(store.remove("roster:1").await.unwrap());
        assert!(!store.remove("roster:1").await.unwrap());
    }

    /// Validates `FileStore` durability across instances.
    ///
    /// Assertions:
    /// - Confirms entries written by one instance are visible after reopen.
    /// - Confirms removals persist.
    #[tokio::test]
    async fn test_file_store_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("views.json");

        {
            let store: FileStore<serde_json::Value> =
                FileStore::open(path.clone()).await.unwrap();
            store.put("guild:1", entry(json!({"boss": 8}), 0, 100)).await.unwrap();
            store.put("guild:2", entry(json!({"boss": 3}), 0, 100)).await.unwrap();
            store.remove("guild:2").await.unwrap();
        }

        let store: FileStore<serde_json::Value> = FileStore::open(path).await.unwrap();
        let loaded = store.get("guild:1").await.unwrap().unwrap();
        assert_eq!(loaded.data, json!({"boss": 8}));
        assert!(store.get("guild:2").await.unwrap().is_none());
    }

    /// Validates `FileStore` pattern removal persists.
    ///
    /// Assertions:
    /// - Confirms the count and the surviving keys after reopen.
    #[tokio::test]
    async fn test_file_store_remove_matching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("views.json");

        let store: FileStore<serde_json::Value> = FileStore::open(path.clone()).await.unwrap();
        store.put("guild:1", entry(json!(1), 0, 100)).await.unwrap();
        store.put("guild:2", entry(json!(2), 0, 100)).await.unwrap();
        store.put("realm:1", entry(json!(3), 0, 100)).await.unwrap();

        let pattern = Regex::new("^guild:").unwrap();
        assert_eq!(store.remove_matching(&pattern).await.unwrap(), 2);

        let store: FileStore<serde_json::Value> = FileStore::open(path).await.unwrap();
        assert!(store.get("realm:1").await.unwrap().is_some());
        assert!(store.get("guild:1").await.unwrap().is_none());
    }
}
