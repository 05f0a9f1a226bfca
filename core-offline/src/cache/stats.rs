//! Cache statistics and monitoring

use serde::{Deserialize, Serialize};

/// Point-in-time statistics about the media cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of retained (downloaded) entries
    pub retained_entries: usize,

    /// Number of ephemeral (streaming) entries
    pub ephemeral_entries: usize,

    /// Bytes held by retained entries
    pub retained_bytes: u64,

    /// Bytes held by ephemeral entries
    pub ephemeral_bytes: u64,

    /// Configured bound on retained plus ephemeral bytes
    pub max_cache_size_bytes: u64,

    /// Configured bound on ephemeral bytes
    pub max_ephemeral_bytes: u64,
}

impl CacheStats {
    /// Total bytes used by the cache.
    pub fn total_bytes(&self) -> u64 {
        self.retained_bytes + self.ephemeral_bytes
    }

    pub fn total_entries(&self) -> usize {
        self.retained_entries + self.ephemeral_entries
    }

    /// Calculate cache usage as a percentage of max size.
    pub fn usage_percentage(&self) -> f64 {
        if self.max_cache_size_bytes == 0 {
            return 0.0;
        }

        (self.total_bytes() as f64 / self.max_cache_size_bytes as f64) * 100.0
    }

    /// Returns true if the cache is near capacity (>90%).
    pub fn is_near_capacity(&self) -> bool {
        self.usage_percentage() > 90.0
    }

    /// Returns true if the cache is full (>=100%).
    pub fn is_full(&self) -> bool {
        self.total_bytes() >= self.max_cache_size_bytes
    }

    /// Bytes still free under the overall bound.
    pub fn available_bytes(&self) -> u64 {
        self.max_cache_size_bytes.saturating_sub(self.total_bytes())
    }

    /// Bytes that must be freed before `incoming` more bytes fit.
    pub fn space_needed(&self, incoming: u64) -> u64 {
        (self.total_bytes() + incoming).saturating_sub(self.max_cache_size_bytes)
    }
}
