//! Device capacity queries via `fs2`

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{StorageInfo, StorageSpace},
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reports free space for the volume holding a path.
///
/// `statvfs`/`GetDiskFreeSpaceEx` are blocking calls, so each query runs
/// on the blocking pool. The path does not need to exist yet: the nearest
/// existing ancestor is measured instead.
#[derive(Debug, Clone, Default)]
pub struct DesktopStorageInfo;

impl DesktopStorageInfo {
    pub fn new() -> Self {
        Self
    }
}

fn nearest_existing(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[async_trait]
impl StorageInfo for DesktopStorageInfo {
    async fn storage_space(&self, path: &Path) -> Result<StorageSpace> {
        let target = nearest_existing(path);

        let space = tokio::task::spawn_blocking(move || -> std::io::Result<StorageSpace> {
            Ok(StorageSpace {
                total_bytes: fs2::total_space(&target)?,
                available_bytes: fs2::available_space(&target)?,
            })
        })
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("Storage query panicked: {}", e)))?
        .map_err(BridgeError::Io)?;

        debug!(
            path = ?path,
            available = space.available_bytes,
            total = space.total_bytes,
            "Queried storage space"
        );
        Ok(space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_space_for_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let info = DesktopStorageInfo::new();

        let space = info
            .storage_space(&dir.path().join("not").join("yet").join("created"))
            .await
            .unwrap();

        assert!(space.total_bytes > 0);
        assert!(space.available_bytes <= space.total_bytes);
        assert_eq!(
            info.available_space(dir.path()).await.unwrap() > 0,
            space.available_bytes > 0
        );
    }
}
