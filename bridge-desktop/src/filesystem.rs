//! `FileSystemAccess` over `tokio::fs`.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::debug;

const APP_DIR_NAME: &str = "offline-media-core";

/// Desktop file access rooted at a cache directory.
///
/// Media payloads are streamed through `tokio::fs::File` handles, so a
/// multi-gigabyte download never has to fit in memory.
#[derive(Debug, Clone)]
pub struct TokioFileSystem {
    cache_dir: PathBuf,
}

impl TokioFileSystem {
    /// Use the platform cache directory (`~/.cache`, `%LOCALAPPDATA%`...).
    pub fn new() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self::at(base.join(APP_DIR_NAME))
    }

    pub fn at(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).await.map_err(BridgeError::Io)
            }
            _ => Ok(()),
        }
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_seconds(time: std::io::Result<SystemTime>) -> Option<i64> {
    let elapsed = time.ok()?.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(elapsed.as_secs()).ok()
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(BridgeError::Io)?;
        Ok(self.cache_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(BridgeError::Io)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(BridgeError::Io)?;
        Ok(FileMetadata {
            size: metadata.len(),
            modified_at: unix_seconds(metadata.modified()),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(BridgeError::Io)
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        fs::read(path).await.map(Bytes::from).map_err(BridgeError::Io)
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        Self::ensure_parent(path).await?;
        fs::write(path, &data).await.map_err(BridgeError::Io)?;
        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        Self::ensure_parent(to).await?;
        fs::rename(from, to).await.map_err(BridgeError::Io)?;
        debug!(from = ?from, to = ?to, "Moved file");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(BridgeError::Io)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut read_dir = fs::read_dir(path).await.map_err(BridgeError::Io)?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(BridgeError::Io)? {
            entries.push(entry.path());
        }
        Ok(entries)
    }

    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
        let file = fs::File::open(path).await.map_err(BridgeError::Io)?;
        Ok(Box::new(file))
    }

    async fn open_append_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Unpin>> {
        Self::ensure_parent(path).await?;
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(BridgeError::Io)?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_cache_directory_is_created_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::at(dir.path().join("cache"));

        let cache_dir = fs.get_cache_directory().await.unwrap();
        assert_eq!(cache_dir, dir.path().join("cache"));
        assert!(fs.exists(&cache_dir).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::at(dir.path());
        let path = dir.path().join("ephemeral").join("m1");

        fs.write_file(&path, Bytes::from_static(b"segment"))
            .await
            .unwrap();
        assert_eq!(fs.read_file(&path).await.unwrap(), Bytes::from_static(b"segment"));

        let metadata = fs.metadata(&path).await.unwrap();
        assert_eq!(metadata.size, 7);
        assert!(!metadata.is_directory);
        assert!(metadata.modified_at.is_some());

        fs.delete_file(&path).await.unwrap();
        assert!(!fs.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_stream_resumes_after_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::at(dir.path());
        let staged = dir.path().join("staging").join("m1.part");

        fs.write_file(&staged, Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let mut writer = fs.open_append_stream(&staged).await.unwrap();
        writer.write_all(b"def").await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        assert_eq!(
            fs.read_file(&staged).await.unwrap(),
            Bytes::from_static(b"abcdef")
        );
    }

    #[tokio::test]
    async fn test_rename_and_nested_directory_size() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::at(dir.path());
        let staged = dir.path().join("staging").join("m1.part");
        let retained = dir.path().join("media").join("retained").join("m1");

        fs.write_file(&staged, Bytes::from(vec![0u8; 512]))
            .await
            .unwrap();
        fs.write_file(&dir.path().join("media").join("index"), Bytes::from(vec![0u8; 8]))
            .await
            .unwrap();
        fs.rename(&staged, &retained).await.unwrap();

        assert!(!fs.exists(&staged).await.unwrap());
        assert_eq!(
            fs.directory_size(&dir.path().join("media")).await.unwrap(),
            520
        );
    }
}
