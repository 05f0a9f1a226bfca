//! Free-space admission check

use bridge_traits::storage::StorageInfo;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{DEFAULT_SPACE_MARGIN, DEFAULT_UNKNOWN_SIZE_ESTIMATE};
use crate::error::{OfflineError, Result};

/// Answers "is there room for this download" against the volume that holds
/// the cache. Every call queries the device; nothing is cached.
pub struct StorageGuard {
    storage: Arc<dyn StorageInfo>,
    path: PathBuf,
    margin: f64,
    unknown_size_estimate: u64,
}

impl StorageGuard {
    pub fn new(storage: Arc<dyn StorageInfo>, path: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            path: path.into(),
            margin: DEFAULT_SPACE_MARGIN,
            unknown_size_estimate: DEFAULT_UNKNOWN_SIZE_ESTIMATE,
        }
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_unknown_size_estimate(mut self, bytes: u64) -> Self {
        self.unknown_size_estimate = bytes;
        self
    }

    /// Bytes that must be strictly exceeded by free space.
    pub fn required_bytes(&self, estimated: Option<u64>) -> u64 {
        let estimate = estimated.unwrap_or(self.unknown_size_estimate);
        (estimate as f64 * self.margin).ceil() as u64
    }

    /// `true` when free space exceeds the estimate times the margin.
    ///
    /// A failed device query counts as "no space".
    pub async fn has_space_for(&self, estimated: Option<u64>) -> bool {
        match self.check(estimated).await {
            Ok(()) => true,
            Err(OfflineError::InsufficientStorage {
                required,
                available,
            }) => {
                debug!(required, available, "Not enough free space");
                false
            }
            Err(e) => {
                warn!(error = %e, path = ?self.path, "Storage query failed");
                false
            }
        }
    }

    /// Like [`has_space_for`](Self::has_space_for), with the shortfall as an error.
    pub async fn check(&self, estimated: Option<u64>) -> Result<()> {
        let available = self.storage.available_space(&self.path).await?;
        let estimate = estimated.unwrap_or(self.unknown_size_estimate);

        if available as f64 > estimate as f64 * self.margin {
            Ok(())
        } else {
            Err(OfflineError::InsufficientStorage {
                required: self.required_bytes(estimated),
                available,
            })
        }
    }
}
