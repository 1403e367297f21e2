//! Cache store backends
//!
//! The resolver only needs two operations from a store: `lookup` by key and
//! `put` under a key. A put replaces the whole entry under that key in a
//! single step, so readers either see the previous entry or the new one.
//!
//! Two backends are provided:
//! - [`MemoryStore`]: in-process map, entries expire after the configured TTL
//! - [`DiskStore`]: one file per key, survives restarts

use crate::config::{EdgeCacheConfig, StoreBackend};
use crate::error::{EdgeCacheError, Result};
use crate::models::CachedPayload;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, warn};

/// Writes between full sweeps of expired memory entries
const SWEEP_INTERVAL: u64 = 256;

/// Key-value store for cached payloads
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up the entry stored under `key`
    async fn lookup(&self, key: &str) -> Result<Option<CachedPayload>>;

    /// Store `payload` under `key`, replacing any previous entry
    async fn put(&self, key: &str, payload: CachedPayload) -> Result<()>;
}

/// Build the store selected by the configuration
pub async fn from_config(config: &EdgeCacheConfig) -> Result<Arc<dyn CacheStore>> {
    let ttl = config.store_ttl();
    let store: Arc<dyn CacheStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new(ttl)),
        StoreBackend::Disk => Arc::new(DiskStore::new(&config.store.disk_path, ttl).await?),
    };
    Ok(store)
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
}

#[derive(Clone)]
struct MemoryEntry {
    payload: CachedPayload,
    expires_at: SystemTime,
}

/// In-memory cache store with TTL expiry
pub struct MemoryStore {
    storage: RwLock<HashMap<String, MemoryEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
}

impl MemoryStore {
    /// Create a new MemoryStore
    ///
    /// # Arguments
    /// * `ttl` - Time-to-live for stored entries
    pub fn new(ttl: Duration) -> Self {
        MemoryStore {
            storage: RwLock::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
        }
    }

    /// Get cache statistics
    pub fn get_stats(&self) -> StoreStats {
        let storage = self.storage.read().unwrap_or_else(|p| p.into_inner());
        StoreStats {
            total_entries: storage.len(),
            total_bytes: storage.values().map(|e| e.payload.body.len()).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        let storage = self.storage.read().unwrap_or_else(|p| p.into_inner());
        storage
            .get(key)
            .map(|e| e.expires_at > SystemTime::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn lookup(&self, key: &str) -> Result<Option<CachedPayload>> {
        let now = SystemTime::now();
        let (found, expired) = {
            let storage = self.storage.read().unwrap_or_else(|p| p.into_inner());
            match storage.get(key) {
                Some(entry) if entry.expires_at > now => (Some(entry.payload.clone()), false),
                Some(_) => (None, true),
                None => (None, false),
            }
        };

        if expired {
            debug!("Memory store entry expired: key={}", key);
            let mut storage = self.storage.write().unwrap_or_else(|p| p.into_inner());
            // A concurrent put may have refreshed it
            if storage.get(key).map(|e| e.expires_at <= now).unwrap_or(false) {
                storage.remove(key);
            }
        }

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    async fn put(&self, key: &str, payload: CachedPayload) -> Result<()> {
        let size = payload.body.len();
        let entry = MemoryEntry {
            payload,
            expires_at: SystemTime::now() + self.ttl,
        };
        let mut storage = self.storage.write().unwrap_or_else(|p| p.into_inner());
        storage.insert(key.to_string(), entry);
        let puts = self.puts.fetch_add(1, Ordering::Relaxed) + 1;
        // Expired entries are dropped on lookup; the sweep catches keys nobody
        // asks for again. There is no size-based eviction.
        if puts % SWEEP_INTERVAL == 0 {
            let now = SystemTime::now();
            storage.retain(|_, e| e.expires_at > now);
        }
        debug!("Stored in memory: key={} ({} bytes)", key, size);
        Ok(())
    }
}

/// On-disk record: header fields plus body and integrity data
#[derive(Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    expires_at_secs: u64,
    status: u16,
    content_type: String,
    cache_control: String,
    content_disposition: String,
    content_range: Option<String>,
    body_crc32: u32,
    body: Vec<u8>,
}

/// File-per-entry cache store
///
/// Files live under `base/XX/YY/<xxh3 hex>`. Each file is a bincode-encoded
/// record carrying its full key (hash collisions read as misses), an expiry
/// time and a crc32 of the body. Writes go to a temp file in the target
/// directory that is renamed into place, so a reader never observes a
/// half-written entry. A failed write leaves no temp file behind.
pub struct DiskStore {
    base_path: PathBuf,
    ttl: Duration,
}

impl DiskStore {
    /// Create a DiskStore rooted at `base_path`, creating the directory if needed
    pub async fn new<P: AsRef<Path>>(base_path: P, ttl: Duration) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            EdgeCacheError::CacheError(format!(
                "Failed to create cache directory {}: {}",
                base_path.display(),
                e
            ))
        })?;
        Ok(DiskStore { base_path, ttl })
    }

    fn file_path(&self, key: &str) -> PathBuf {
        let hash = xxhash_rust::xxh3::xxh3_64(key.as_bytes());
        let dir1 = format!("{:02x}", (hash >> 8) & 0xFF);
        let dir2 = format!("{:02x}", hash & 0xFF);
        self.base_path
            .join(dir1)
            .join(dir2)
            .join(format!("{:016x}", hash))
    }

    async fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove cache file {}: {}", path.display(), e);
            }
        }
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn lookup(&self, key: &str) -> Result<Option<CachedPayload>> {
        let path = self.file_path(key);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EdgeCacheError::CacheError(format!(
                    "Failed to read cache file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let record: DiskRecord = match bincode::deserialize(&data) {
            Ok(record) => record,
            Err(e) => {
                warn!("Corrupt cache file {}: {}", path.display(), e);
                self.discard(&path).await;
                return Ok(None);
            }
        };

        if record.key != key {
            debug!("Cache file {} belongs to another key", path.display());
            return Ok(None);
        }

        if record.expires_at_secs <= unix_secs(SystemTime::now()) {
            debug!("Disk store entry expired: key={}", key);
            self.discard(&path).await;
            return Ok(None);
        }

        if crc32fast::hash(&record.body) != record.body_crc32 {
            warn!("Checksum mismatch in cache file {}", path.display());
            self.discard(&path).await;
            return Ok(None);
        }

        Ok(Some(CachedPayload {
            status: record.status,
            body: Bytes::from(record.body),
            content_type: record.content_type,
            cache_control: record.cache_control,
            content_disposition: record.content_disposition,
            content_range: record.content_range,
        }))
    }

    async fn put(&self, key: &str, payload: CachedPayload) -> Result<()> {
        let path = self.file_path(key);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_path.clone());
        fs::create_dir_all(&dir).await.map_err(|e| {
            EdgeCacheError::CacheError(format!("Failed to create cache directory: {}", e))
        })?;

        let body_len = payload.body.len();
        let record = DiskRecord {
            key: key.to_string(),
            expires_at_secs: unix_secs(SystemTime::now() + self.ttl),
            status: payload.status,
            content_type: payload.content_type,
            cache_control: payload.cache_control,
            content_disposition: payload.content_disposition,
            content_range: payload.content_range,
            body_crc32: crc32fast::hash(&payload.body),
            body: payload.body.to_vec(),
        };
        let encoded = bincode::serialize(&record)
            .map_err(|e| EdgeCacheError::CacheError(format!("Failed to encode entry: {}", e)))?;

        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, &encoded))
            .await
            .map_err(|e| EdgeCacheError::InternalError(format!("Disk write task failed: {}", e)))??;

        debug!("Wrote to disk: key={} ({} bytes)", key, body_len);
        Ok(())
    }
}

/// Write `data` to a fresh temp file in `dir` and rename it over `path`
///
/// The temp file is deleted when it is dropped, so every failure before the
/// rename cleans up after itself.
fn write_atomically(dir: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| {
        EdgeCacheError::CacheError(format!("Failed to create cache file: {}", e))
    })?;
    tmp.write_all(data)
        .map_err(|e| EdgeCacheError::CacheError(format!("Failed to write entry: {}", e)))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| EdgeCacheError::CacheError(format!("Failed to sync file: {}", e)))?;
    tmp.persist(path).map_err(|e| {
        EdgeCacheError::CacheError(format!("Failed to move cache file into place: {}", e.error))
    })?;
    Ok(())
}
