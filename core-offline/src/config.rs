//! Download engine configuration

use std::time::Duration;

use crate::cache::CacheConfig;

/// Default number of transfers running at once.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Required free space is the estimated size times this margin.
pub const DEFAULT_SPACE_MARGIN: f64 = 1.1;

/// Size assumed for admission when the server has not disclosed one.
pub const DEFAULT_UNKNOWN_SIZE_ESTIMATE: u64 = 100 * 1024 * 1024;

/// Configuration for the download orchestrator and its transfer workers.
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// Transfers allowed in `Downloading` at once (default: 3)
    pub max_concurrent_downloads: usize,

    /// Automatic retries after a transient failure (default: 3)
    pub max_retry_attempts: u32,

    /// Delay before each retry; the last value repeats (default: 1s, 3s, 9s)
    pub retry_backoff: Vec<Duration>,

    /// Longest wait for a response or the next body chunk (default: 300s)
    pub download_timeout: Duration,

    /// Free space multiplier used by admission (default: 1.1)
    pub space_margin: f64,

    /// Admission estimate for downloads of unknown size (default: 100MB)
    pub unknown_size_estimate: u64,

    /// How often a task held back only by free space is re-checked (default: 30s)
    pub space_recheck_interval: Duration,

    pub cache: CacheConfig,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            max_retry_attempts: 3,
            retry_backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(9),
            ],
            download_timeout: Duration::from_secs(300),
            space_margin: DEFAULT_SPACE_MARGIN,
            unknown_size_estimate: DEFAULT_UNKNOWN_SIZE_ESTIMATE,
            space_recheck_interval: Duration::from_secs(30),
            cache: CacheConfig::default(),
        }
    }
}

impl OfflineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = count;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_space_margin(mut self, margin: f64) -> Self {
        self.space_margin = margin;
        self
    }

    pub fn with_unknown_size_estimate(mut self, bytes: u64) -> Self {
        self.unknown_size_estimate = bytes;
        self
    }

    pub fn with_space_recheck_interval(mut self, interval: Duration) -> Self {
        self.space_recheck_interval = interval;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.retry_backoff
            .get(retry as usize)
            .or_else(|| self.retry_backoff.last())
            .copied()
            .unwrap_or_default()
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_downloads == 0 {
            return Err("max_concurrent_downloads must be at least 1".to_string());
        }

        if self.max_retry_attempts > 0 && self.retry_backoff.is_empty() {
            return Err("retry_backoff cannot be empty when retries are enabled".to_string());
        }

        if self.download_timeout.is_zero() {
            return Err("download_timeout must be greater than 0".to_string());
        }

        if self.space_recheck_interval.is_zero() {
            return Err("space_recheck_interval must be greater than 0".to_string());
        }

        if !self.space_margin.is_finite() || self.space_margin < 1.0 {
            return Err("space_margin must be a finite value of at least 1.0".to_string());
        }

        self.cache.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OfflineConfig::default();
        assert_eq!(config.max_concurrent_downloads, 3);
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.space_margin, 1.1);
        assert_eq!(config.unknown_size_estimate, 100 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_schedule() {
        let config = OfflineConfig::default();
        assert_eq!(config.backoff_for(0), Duration::from_secs(1));
        assert_eq!(config.backoff_for(1), Duration::from_secs(3));
        assert_eq!(config.backoff_for(2), Duration::from_secs(9));
        assert_eq!(config.backoff_for(7), Duration::from_secs(9));

        let none = OfflineConfig::default().with_retry_backoff(Vec::new());
        assert_eq!(none.backoff_for(0), Duration::ZERO);
    }

    #[test]
    fn test_config_validation() {
        assert!(OfflineConfig::default()
            .with_max_concurrent_downloads(0)
            .validate()
            .is_err());
        assert!(OfflineConfig::default()
            .with_space_margin(0.5)
            .validate()
            .is_err());
        assert!(OfflineConfig::default()
            .with_space_recheck_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(OfflineConfig::default()
            .with_retry_backoff(Vec::new())
            .validate()
            .is_err());
        assert!(OfflineConfig::default()
            .with_max_retry_attempts(0)
            .with_retry_backoff(Vec::new())
            .validate()
            .is_ok());
        assert!(OfflineConfig::default()
            .with_cache(CacheConfig::default().with_max_size(0))
            .validate()
            .is_err());
    }
}
