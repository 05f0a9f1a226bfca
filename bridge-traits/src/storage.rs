//! File, preference and capacity bridges.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    /// Unix seconds, when the platform reports it.
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File I/O for the media cache.
///
/// Paths handed in are absolute and live under the directories the engine
/// was configured with; mobile adapters map them into the app sandbox.
/// Payloads can be gigabytes, so transfers go through
/// [`open_append_stream`](Self::open_append_stream) and
/// [`open_read_stream`](Self::open_read_stream) rather than whole-file
/// reads.
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Root the host reserves for cached files. Created on first use.
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Create or truncate `path`, creating parent directories as needed.
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Move `from` to `to`, replacing `to`. Must be atomic when both live
    /// on the same volume.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Direct children of `path`.
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>>;

    /// Writer positioned after any bytes already in `path`.
    async fn open_append_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>;

    /// Sum of file sizes below `path`, recursing into subdirectories.
    async fn directory_size(&self, path: &Path) -> Result<u64> {
        let mut pending = vec![path.to_path_buf()];
        let mut total = 0;
        while let Some(dir) = pending.pop() {
            for entry in self.list_directory(&dir).await? {
                let metadata = self.metadata(&entry).await?;
                if metadata.is_directory {
                    pending.push(entry);
                } else {
                    total += metadata.size;
                }
            }
        }
        Ok(total)
    }
}

/// Small persistent key-value store for user preferences.
///
/// UserDefaults / DataStore on mobile, a SQLite table on desktop.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn has_key(&self, key: &str) -> Result<bool>;

    async fn list_keys(&self) -> Result<Vec<String>>;

    async fn clear_all(&self) -> Result<()>;
}

/// Capacity of the volume backing a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageSpace {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Free-space probe (`statvfs`, `StatFs`,
/// `volumeAvailableCapacityForImportantUsage`).
///
/// Every call must hit the device; the storage guard relies on fresh
/// numbers before each transfer starts.
#[async_trait]
pub trait StorageInfo: Send + Sync {
    async fn storage_space(&self, path: &Path) -> Result<StorageSpace>;

    async fn available_space(&self, path: &Path) -> Result<u64> {
        Ok(self.storage_space(path).await?.available_bytes)
    }
}
