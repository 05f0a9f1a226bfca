//! Bounded on-disk media store
//!
//! Layout under the cache root:
//!
//! ```text
//! retained/   completed downloads, never evicted
//! ephemeral/  streaming reads, evicted by policy
//! staging/    in-flight transfers, cleared at open
//! ```
//!
//! File names are the hex encoding of the content id, so any id maps to a
//! safe path and the index can be rebuilt from a directory listing.
//!
//! All accounting happens under the index lock, which is held across the
//! file write, rename or delete it accounts for. Retained plus ephemeral
//! bytes never exceed `max_cache_size_bytes` once a call returns.

use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{CacheConfig, CacheStats};
use crate::error::{OfflineError, Result};
use crate::types::ContentId;

const STAGING_SUFFIX: &str = ".part";
const HASH_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub content_id: ContentId,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_accessed_at: DateTime<Utc>,
    pub retained: bool,
    /// Hex SHA-256, computed when a staged payload is committed.
    pub checksum: Option<String>,
}

struct CacheIndex {
    retained: HashMap<ContentId, CacheEntry>,
    /// Least recently used at the back; insertion order breaks ties.
    ephemeral: LruCache<ContentId, CacheEntry>,
    retained_bytes: u64,
    ephemeral_bytes: u64,
}

impl CacheIndex {
    fn new() -> Self {
        Self {
            retained: HashMap::new(),
            ephemeral: LruCache::unbounded(),
            retained_bytes: 0,
            ephemeral_bytes: 0,
        }
    }

    fn total_bytes(&self) -> u64 {
        self.retained_bytes + self.ephemeral_bytes
    }
}

pub struct CacheStore {
    fs: Arc<dyn FileSystemAccess>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
    index: Mutex<CacheIndex>,
}

fn file_name(content_id: &ContentId) -> String {
    hex::encode(content_id.as_str().as_bytes())
}

fn content_id_from_path(path: &Path) -> Option<ContentId> {
    let name = path.file_name()?.to_str()?;
    let bytes = hex::decode(name).ok()?;
    String::from_utf8(bytes).ok().map(ContentId::new)
}

impl CacheStore {
    /// Open the cache, rebuilding its index from disk.
    ///
    /// Leftover staging files belong to transfers of a previous process and
    /// are deleted.
    pub async fn open(
        config: CacheConfig,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(OfflineError::Config)?;

        for dir in [
            config.retained_dir(),
            config.ephemeral_dir(),
            config.staging_dir(),
        ] {
            fs.create_dir_all(&dir).await?;
        }

        let store = Self {
            fs,
            config,
            clock,
            events: None,
            index: Mutex::new(CacheIndex::new()),
        };

        let cleared = store.clear_staging().await?;
        let mut guard = store.index.lock().await;
        let index = &mut *guard;
        let now = store.clock.now();

        for path in store.fs.list_directory(&store.config.retained_dir()).await? {
            let metadata = store.fs.metadata(&path).await?;
            if metadata.is_directory {
                continue;
            }
            let Some(content_id) = content_id_from_path(&path) else {
                warn!(path = ?path, "Removing unrecognised file from retained cache");
                store.fs.delete_file(&path).await?;
                continue;
            };

            index.retained_bytes += metadata.size;
            index.retained.insert(
                content_id.clone(),
                CacheEntry {
                    content_id,
                    path,
                    size_bytes: metadata.size,
                    last_accessed_at: now,
                    retained: true,
                    checksum: None,
                },
            );
        }

        let mut ephemeral = Vec::new();
        for path in store.fs.list_directory(&store.config.ephemeral_dir()).await? {
            let metadata = store.fs.metadata(&path).await?;
            if metadata.is_directory {
                continue;
            }
            match content_id_from_path(&path) {
                Some(content_id) => {
                    ephemeral.push((metadata.modified_at.unwrap_or(0), content_id, path, metadata.size))
                }
                None => store.fs.delete_file(&path).await?,
            }
        }
        // Oldest first, so the least recently written entry is evicted first.
        ephemeral.sort_by_key(|(modified_at, _, _, _)| *modified_at);
        for (_, content_id, path, size_bytes) in ephemeral {
            index.ephemeral_bytes += size_bytes;
            index.ephemeral.put(
                content_id.clone(),
                CacheEntry {
                    content_id,
                    path,
                    size_bytes,
                    last_accessed_at: now,
                    retained: false,
                    checksum: None,
                },
            );
        }

        let mut freed = 0;
        while index.ephemeral_bytes > store.config.max_ephemeral_bytes
            || index.total_bytes() > store.config.max_cache_size_bytes
        {
            match store.evict_one(index).await {
                Some(bytes) => freed += bytes,
                None => break,
            }
        }
        if index.retained_bytes > store.config.max_cache_size_bytes {
            warn!(
                retained_bytes = index.retained_bytes,
                max_cache_size_bytes = store.config.max_cache_size_bytes,
                "Retained downloads exceed the configured cache size"
            );
        }

        info!(
            retained = index.retained.len(),
            ephemeral = index.ephemeral.len(),
            total_bytes = index.total_bytes(),
            staging_cleared = cleared,
            evicted_bytes = freed,
            "Opened media cache"
        );
        drop(guard);

        Ok(store)
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ========================================================================
    // Paths
    // ========================================================================

    pub fn retained_path(&self, content_id: &ContentId) -> PathBuf {
        self.config.retained_dir().join(file_name(content_id))
    }

    pub fn ephemeral_path(&self, content_id: &ContentId) -> PathBuf {
        self.config.ephemeral_dir().join(file_name(content_id))
    }

    /// Where a transfer writes bytes before they are committed.
    pub fn staging_path(&self, content_id: &ContentId) -> PathBuf {
        self.config
            .staging_dir()
            .join(format!("{}{}", file_name(content_id), STAGING_SUFFIX))
    }

    // ========================================================================
    // Ephemeral Partition
    // ========================================================================

    /// Store streaming bytes in the ephemeral partition, evicting as needed.
    ///
    /// Fails with [`OfflineError::CacheFull`] when the payload cannot fit even
    /// after every ephemeral entry is gone. A retained copy of the same id is
    /// left untouched and its path returned.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn write(&self, content_id: &ContentId, data: Bytes) -> Result<PathBuf> {
        let size = data.len() as u64;
        let mut guard = self.index.lock().await;
        let index = &mut *guard;

        if let Some(entry) = index.retained.get(content_id) {
            return Ok(entry.path.clone());
        }

        let path = self.ephemeral_path(content_id);
        if let Some(previous) = index.ephemeral.pop(content_id) {
            index.ephemeral_bytes -= previous.size_bytes;
        }

        let room = self
            .config
            .max_ephemeral_bytes
            .min(self.config.max_cache_size_bytes.saturating_sub(index.retained_bytes));
        if size > room {
            self.delete_if_exists(&path).await?;
            return Err(OfflineError::CacheFull {
                required: size,
                capacity: room,
            });
        }

        while index.ephemeral_bytes + size > self.config.max_ephemeral_bytes
            || index.total_bytes() + size > self.config.max_cache_size_bytes
        {
            if self.evict_one(index).await.is_none() {
                break;
            }
        }

        if let Err(e) = self.fs.write_file(&path, data).await {
            let _ = self.delete_if_exists(&path).await;
            return Err(e.into());
        }

        index.ephemeral_bytes += size;
        index.ephemeral.put(
            content_id.clone(),
            CacheEntry {
                content_id: content_id.clone(),
                path: path.clone(),
                size_bytes: size,
                last_accessed_at: self.clock.now(),
                retained: false,
                checksum: None,
            },
        );

        debug!(content_id = %content_id, "Cached ephemeral entry");
        Ok(path)
    }

    /// Read cached bytes, retained or ephemeral.
    pub async fn read(&self, content_id: &ContentId) -> Result<Bytes> {
        let mut guard = self.index.lock().await;
        let index = &mut *guard;
        let now = self.clock.now();

        let (path, retained) = match index.retained.get_mut(content_id) {
            Some(entry) => {
                entry.last_accessed_at = now;
                (entry.path.clone(), true)
            }
            None => {
                let entry = if self.config.eviction_policy.promotes_on_read() {
                    index.ephemeral.get_mut(content_id)
                } else {
                    index.ephemeral.peek_mut(content_id)
                };
                match entry {
                    Some(entry) => {
                        entry.last_accessed_at = now;
                        (entry.path.clone(), false)
                    }
                    None => return Err(OfflineError::NotFound(content_id.to_string())),
                }
            }
        };

        match self.fs.read_file(&path).await {
            Ok(data) => Ok(data),
            Err(e) => {
                if self.fs.exists(&path).await.unwrap_or(false) {
                    return Err(e.into());
                }

                warn!(content_id = %content_id, retained, "Cached file vanished, dropping entry");
                if retained {
                    if let Some(entry) = index.retained.remove(content_id) {
                        index.retained_bytes -= entry.size_bytes;
                    }
                } else if let Some(entry) = index.ephemeral.pop(content_id) {
                    index.ephemeral_bytes -= entry.size_bytes;
                }
                Err(OfflineError::NotFound(content_id.to_string()))
            }
        }
    }

    /// Move an ephemeral entry into the retained partition.
    #[instrument(skip(self))]
    pub async fn promote(&self, content_id: &ContentId) -> Result<CacheEntry> {
        let mut guard = self.index.lock().await;
        let index = &mut *guard;

        if let Some(entry) = index.retained.get(content_id) {
            return Ok(entry.clone());
        }

        let mut entry = index
            .ephemeral
            .pop(content_id)
            .ok_or_else(|| OfflineError::NotFound(content_id.to_string()))?;
        index.ephemeral_bytes -= entry.size_bytes;

        let target = self.retained_path(content_id);
        if let Err(e) = self.fs.rename(&entry.path, &target).await {
            index.ephemeral_bytes += entry.size_bytes;
            index.ephemeral.put(content_id.clone(), entry);
            return Err(e.into());
        }

        entry.path = target;
        entry.retained = true;
        index.retained_bytes += entry.size_bytes;
        index.retained.insert(content_id.clone(), entry.clone());

        info!(size_bytes = entry.size_bytes, "Promoted cache entry to retained");
        Ok(entry)
    }

    // ========================================================================
    // Retained Partition
    // ========================================================================

    /// Atomically move a finished transfer from staging into retained storage.
    ///
    /// Ephemeral entries are evicted to make room. On
    /// [`OfflineError::CacheFull`] the staged file is left for the caller.
    #[instrument(skip(self))]
    pub async fn commit_staged(&self, content_id: &ContentId) -> Result<CacheEntry> {
        let staging = self.staging_path(content_id);
        if !self.fs.exists(&staging).await? {
            return Err(OfflineError::NotFound(format!(
                "no staged bytes for {}",
                content_id
            )));
        }
        let size = self.fs.metadata(&staging).await?.size;
        let checksum = self.checksum(&staging).await?;

        let mut guard = self.index.lock().await;
        let index = &mut *guard;

        if let Some(stale) = index.ephemeral.pop(content_id) {
            index.ephemeral_bytes -= stale.size_bytes;
            self.delete_if_exists(&stale.path).await?;
        }

        let replaced = index
            .retained
            .get(content_id)
            .map(|e| e.size_bytes)
            .unwrap_or(0);
        let max = self.config.max_cache_size_bytes;
        if index.retained_bytes - replaced + size > max {
            return Err(OfflineError::CacheFull {
                required: size,
                capacity: max.saturating_sub(index.retained_bytes - replaced),
            });
        }

        while index.total_bytes() - replaced + size > max {
            if self.evict_one(index).await.is_none() {
                break;
            }
        }

        let target = self.retained_path(content_id);
        self.fs.rename(&staging, &target).await?;

        index.retained_bytes = index.retained_bytes - replaced + size;
        let entry = CacheEntry {
            content_id: content_id.clone(),
            path: target,
            size_bytes: size,
            last_accessed_at: self.clock.now(),
            retained: true,
            checksum: Some(checksum),
        };
        index.retained.insert(content_id.clone(), entry.clone());

        info!(size_bytes = size, "Committed download to retained cache");
        Ok(entry)
    }

    pub async fn retained_entry(&self, content_id: &ContentId) -> Option<CacheEntry> {
        self.index.lock().await.retained.get(content_id).cloned()
    }

    pub async fn retained_entries(&self) -> Vec<CacheEntry> {
        self.index.lock().await.retained.values().cloned().collect()
    }

    pub async fn retained_size(&self) -> u64 {
        self.index.lock().await.retained_bytes
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Bytes already staged for `content_id` (zero when nothing is staged).
    pub async fn staged_size(&self, content_id: &ContentId) -> Result<u64> {
        let staging = self.staging_path(content_id);
        if self.fs.exists(&staging).await? {
            Ok(self.fs.metadata(&staging).await?.size)
        } else {
            Ok(0)
        }
    }

    pub async fn discard_staged(&self, content_id: &ContentId) -> Result<()> {
        self.delete_if_exists(&self.staging_path(content_id)).await
    }

    async fn clear_staging(&self) -> Result<usize> {
        let leftovers = self.fs.list_directory(&self.config.staging_dir()).await?;
        for path in &leftovers {
            debug!(path = ?path, "Removing stale staging file");
            self.fs.delete_file(path).await?;
        }
        Ok(leftovers.len())
    }

    // ========================================================================
    // Eviction & Removal
    // ========================================================================

    /// Evict ephemeral entries until total usage is at most `target_bytes`
    /// or nothing evictable is left. Returns the bytes freed.
    #[instrument(skip(self))]
    pub async fn evict_until(&self, target_bytes: u64) -> Result<u64> {
        let mut guard = self.index.lock().await;
        let index = &mut *guard;
        let mut freed = 0;

        while index.total_bytes() > target_bytes {
            match self.evict_one(index).await {
                Some(bytes) => freed += bytes,
                None => break,
            }
        }

        Ok(freed)
    }

    /// Remove an entry from either partition. Returns `false` if absent.
    pub async fn remove(&self, content_id: &ContentId) -> Result<bool> {
        let mut guard = self.index.lock().await;
        let index = &mut *guard;

        let entry = if let Some(entry) = index.retained.remove(content_id) {
            index.retained_bytes -= entry.size_bytes;
            entry
        } else if let Some(entry) = index.ephemeral.pop(content_id) {
            index.ephemeral_bytes -= entry.size_bytes;
            entry
        } else {
            return Ok(false);
        };

        self.delete_if_exists(&entry.path).await?;
        debug!(content_id = %content_id, retained = entry.retained, "Removed cache entry");
        Ok(true)
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.lock().await;
        CacheStats {
            retained_entries: index.retained.len(),
            ephemeral_entries: index.ephemeral.len(),
            retained_bytes: index.retained_bytes,
            ephemeral_bytes: index.ephemeral_bytes,
            max_cache_size_bytes: self.config.max_cache_size_bytes,
            max_ephemeral_bytes: self.config.max_ephemeral_bytes,
        }
    }

    /// Pop the next eviction candidate. Caller holds the index lock.
    async fn evict_one(&self, index: &mut CacheIndex) -> Option<u64> {
        let (content_id, entry) = index.ephemeral.pop_lru()?;
        index.ephemeral_bytes -= entry.size_bytes;

        if let Err(e) = self.delete_if_exists(&entry.path).await {
            warn!(content_id = %content_id, error = %e, "Failed to delete evicted file");
        }

        debug!(
            content_id = %content_id,
            bytes_freed = entry.size_bytes,
            policy = self.config.eviction_policy.description(),
            "Evicted cache entry"
        );
        if let Some(events) = &self.events {
            let _ = events.emit(CoreEvent::Cache(CacheEvent::Evicted {
                key: content_id.to_string(),
                bytes_freed: entry.size_bytes,
            }));
        }
        Some(entry.size_bytes)
    }

    async fn delete_if_exists(&self, path: &Path) -> Result<()> {
        if self.fs.exists(path).await? {
            self.fs.delete_file(path).await?;
        }
        Ok(())
    }

    async fn checksum(&self, path: &Path) -> Result<String> {
        let mut reader = self.fs.open_read_stream(path).await?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }
}
