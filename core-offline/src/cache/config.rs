//! Cache configuration and policies

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the on-disk media cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory holding `retained/`, `ephemeral/` and `staging/`
    pub cache_directory: PathBuf,

    /// Bound on retained plus ephemeral bytes (default: 5GB)
    pub max_cache_size_bytes: u64,

    /// Bound on ephemeral streaming bytes (default: 1GB)
    pub max_ephemeral_bytes: u64,

    /// Order in which ephemeral entries are evicted
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_directory: PathBuf::from("offline_cache"),
            max_cache_size_bytes: 5 * 1024 * 1024 * 1024, // 5GB
            max_ephemeral_bytes: 1024 * 1024 * 1024,      // 1GB
            eviction_policy: EvictionPolicy::LeastRecentlyUsed,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache root directory.
    pub fn with_cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_directory = dir.into();
        self
    }

    /// Set maximum cache size.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = bytes;
        self
    }

    /// Set maximum size of the ephemeral partition.
    pub fn with_max_ephemeral_size(mut self, bytes: u64) -> Self {
        self.max_ephemeral_bytes = bytes;
        self
    }

    /// Set eviction policy.
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn retained_dir(&self) -> PathBuf {
        self.cache_directory.join("retained")
    }

    pub fn ephemeral_dir(&self) -> PathBuf {
        self.cache_directory.join("ephemeral")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.cache_directory.join("staging")
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cache_size_bytes == 0 {
            return Err("max_cache_size_bytes must be greater than 0".to_string());
        }

        if self.max_ephemeral_bytes > self.max_cache_size_bytes {
            return Err("max_ephemeral_bytes cannot exceed max_cache_size_bytes".to_string());
        }

        if self.cache_directory.as_os_str().is_empty() {
            return Err("cache_directory cannot be empty".to_string());
        }

        Ok(())
    }
}

/// Policy for evicting ephemeral entries when the cache is full.
///
/// Retained entries are never evicted, whatever the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Remove entries that haven't been read recently
    LeastRecentlyUsed,

    /// Remove oldest written entries first
    FirstInFirstOut,
}

impl EvictionPolicy {
    /// Returns a human-readable description of the policy.
    pub fn description(&self) -> &'static str {
        match self {
            EvictionPolicy::LeastRecentlyUsed => "Remove entries that haven't been read recently",
            EvictionPolicy::FirstInFirstOut => "Remove oldest written entries first",
        }
    }

    /// Whether a read moves the entry to the back of the eviction order.
    pub fn promotes_on_read(&self) -> bool {
        matches!(self, EvictionPolicy::LeastRecentlyUsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_cache_size_bytes, 5 * 1024 * 1024 * 1024);
        assert_eq!(config.max_ephemeral_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.eviction_policy, EvictionPolicy::LeastRecentlyUsed);
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new()
            .with_cache_directory("/tmp/media")
            .with_max_size(1024 * 1024 * 1024)
            .with_max_ephemeral_size(1024)
            .with_eviction_policy(EvictionPolicy::FirstInFirstOut);

        assert_eq!(config.max_cache_size_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.max_ephemeral_bytes, 1024);
        assert_eq!(config.eviction_policy, EvictionPolicy::FirstInFirstOut);
        assert_eq!(config.staging_dir(), PathBuf::from("/tmp/media/staging"));
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::default().validate().is_ok());

        let invalid_size = CacheConfig::default().with_max_size(0);
        assert!(invalid_size.validate().is_err());

        let invalid_ephemeral = CacheConfig::default()
            .with_max_size(10)
            .with_max_ephemeral_size(11);
        assert!(invalid_ephemeral.validate().is_err());

        let invalid_dir = CacheConfig::default().with_cache_directory("");
        assert!(invalid_dir.validate().is_err());
    }

    #[test]
    fn test_eviction_policy_descriptions() {
        assert!(!EvictionPolicy::LeastRecentlyUsed.description().is_empty());
        assert!(!EvictionPolicy::FirstInFirstOut.description().is_empty());
        assert!(EvictionPolicy::LeastRecentlyUsed.promotes_on_read());
        assert!(!EvictionPolicy::FirstInFirstOut.promotes_on_read());
    }
}
