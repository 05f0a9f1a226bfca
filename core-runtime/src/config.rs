//! # Core Configuration
//!
//! [`CoreConfig`] gathers the host bridges and the storage locations the
//! offline engine needs. It is assembled with [`CoreConfigBuilder`], which
//! fails at build time when a required bridge is absent, so a host learns
//! about a missing capability before the first download rather than during
//! it.
//!
//! | Bridge             | Used for                                   |
//! |--------------------|--------------------------------------------|
//! | `HttpClient`       | ranged media transfers, streaming          |
//! | `FileSystemAccess` | staging, retained and ephemeral files      |
//! | `SettingsStore`    | download preferences, watch history        |
//! | `NetworkMonitor`   | offline / metered / unmetered detection    |
//! | `StorageInfo`      | free space checks before each transfer     |
//! | `Clock`            | timestamps (optional, system clock)        |
//!
//! With the `desktop-shims` feature every bridge the host leaves out is
//! filled from `bridge-desktop`.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/offline/registry.db")
//!     .cache_dir("/data/offline/cache")
//!     .cache_size_mb(8 * 1024)
//!     .http_client(Arc::new(UrlSessionClient::new()))
//!     .file_system(Arc::new(SandboxFiles::new()))
//!     .settings_store(Arc::new(UserDefaultsStore::new()))
//!     .network_monitor(Arc::new(PathMonitor::new()))
//!     .storage_info(Arc::new(VolumeCapacity::new()))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    Clock, FileSystemAccess, HttpClient, NetworkMonitor, SettingsStore, StorageInfo, SystemClock,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Whole media cache (retained and ephemeral), in MiB.
pub const DEFAULT_CACHE_SIZE_MB: usize = 5 * 1024;

/// Streaming/preview share of the cache, in MiB.
pub const DEFAULT_EPHEMERAL_CACHE_MB: usize = 1024;

const MAX_CACHE_SIZE_MB: usize = 100_000;

const MIB: u64 = 1024 * 1024;

#[derive(Clone)]
pub struct CoreConfig {
    /// SQLite file holding the download registry.
    pub database_path: PathBuf,
    /// Parent of the media cache directories.
    pub cache_dir: PathBuf,
    pub cache_size_mb: usize,
    pub ephemeral_cache_mb: usize,

    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub network_monitor: Arc<dyn NetworkMonitor>,
    pub storage_info: Arc<dyn StorageInfo>,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("cache_dir", &self.cache_dir)
            .field("cache_size_mb", &self.cache_size_mb)
            .field("ephemeral_cache_mb", &self.ephemeral_cache_mb)
            .finish_non_exhaustive()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn cache_size_bytes(&self) -> u64 {
        self.cache_size_mb as u64 * MIB
    }

    pub fn ephemeral_cache_bytes(&self) -> u64 {
        self.ephemeral_cache_mb as u64 * MIB
    }

    /// Reject empty paths, a zero or absurd cache budget, and an
    /// ephemeral share larger than the whole cache.
    pub fn validate(&self) -> Result<()> {
        let problem = if self.database_path.as_os_str().is_empty() {
            "database path is empty".to_string()
        } else if self.cache_dir.as_os_str().is_empty() {
            "cache directory is empty".to_string()
        } else if self.cache_size_mb == 0 {
            "cache size must be at least 1 MB".to_string()
        } else if self.cache_size_mb > MAX_CACHE_SIZE_MB {
            format!(
                "cache size {} MB exceeds the {} MB limit",
                self.cache_size_mb, MAX_CACHE_SIZE_MB
            )
        } else if self.ephemeral_cache_mb > self.cache_size_mb {
            format!(
                "ephemeral cache ({} MB) is larger than the whole cache ({} MB)",
                self.ephemeral_cache_mb, self.cache_size_mb
            )
        } else {
            return Ok(());
        };
        Err(Error::Config(problem))
    }
}

// ============================================================================
// Bridge defaults
// ============================================================================

#[cfg(not(feature = "desktop-shims"))]
mod defaults {
    use super::*;

    fn missing<T: ?Sized>(capability: &str, mobile_hint: &str) -> Result<Arc<T>> {
        Err(Error::CapabilityMissing {
            capability: capability.to_string(),
            message: format!(
                "no {} was provided; enable `desktop-shims` on desktop or inject {} on mobile",
                capability, mobile_hint
            ),
        })
    }

    pub(super) fn http_client() -> Result<Arc<dyn HttpClient>> {
        missing("HttpClient", "a URLSession/OkHttp adapter")
    }

    pub(super) fn file_system() -> Result<Arc<dyn FileSystemAccess>> {
        missing("FileSystemAccess", "sandboxed app directory access")
    }

    pub(super) fn network_monitor() -> Result<Arc<dyn NetworkMonitor>> {
        missing("NetworkMonitor", "NWPathMonitor/ConnectivityManager callbacks")
    }

    pub(super) fn storage_info() -> Result<Arc<dyn StorageInfo>> {
        missing("StorageInfo", "a StatFs/NSFileManager free space probe")
    }

    pub(super) fn settings_store(_beside: &Path) -> Result<Arc<dyn SettingsStore>> {
        missing("SettingsStore", "UserDefaults/DataStore preferences")
    }
}

#[cfg(feature = "desktop-shims")]
mod defaults {
    use super::*;
    use bridge_desktop::{
        DesktopNetworkMonitor, DesktopStorageInfo, ReqwestHttpClient, SqliteSettingsStore,
        TokioFileSystem,
    };

    pub(super) fn http_client() -> Result<Arc<dyn HttpClient>> {
        Ok(Arc::new(ReqwestHttpClient::new()))
    }

    pub(super) fn file_system() -> Result<Arc<dyn FileSystemAccess>> {
        Ok(Arc::new(TokioFileSystem::new()))
    }

    pub(super) fn network_monitor() -> Result<Arc<dyn NetworkMonitor>> {
        Ok(Arc::new(DesktopNetworkMonitor::new()))
    }

    pub(super) fn storage_info() -> Result<Arc<dyn StorageInfo>> {
        Ok(Arc::new(DesktopStorageInfo::new()))
    }

    /// `settings.db` next to the registry database.
    pub(super) fn settings_store(beside: &Path) -> Result<Arc<dyn SettingsStore>> {
        let path = beside
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("settings.db");
        let store = SqliteSettingsStore::open(&path)
            .map_err(|e| Error::Internal(format!("cannot open {}: {}", path.display(), e)))?;
        Ok(Arc::new(store))
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    cache_size_mb: Option<usize>,
    ephemeral_cache_mb: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    storage_info: Option<Arc<dyn StorageInfo>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Required. Location of the download registry database.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().database_path("/data/offline/registry.db");
    /// ```
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Required.
    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Defaults to [`DEFAULT_CACHE_SIZE_MB`].
    pub fn cache_size_mb(mut self, size_mb: usize) -> Self {
        self.cache_size_mb = Some(size_mb);
        self
    }

    /// Defaults to [`DEFAULT_EPHEMERAL_CACHE_MB`], or the whole cache when
    /// that is smaller.
    pub fn ephemeral_cache_mb(mut self, size_mb: usize) -> Self {
        self.ephemeral_cache_mb = Some(size_mb);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn storage_info(mut self, info: Arc<dyn StorageInfo>) -> Self {
        self.storage_info = Some(info);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fill in defaults and validate.
    ///
    /// Fails with `Error::Config` for a missing path or bad size, and with
    /// `Error::CapabilityMissing` for a bridge that has no default.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self
            .database_path
            .ok_or_else(|| Error::Config("database_path is required".to_string()))?;
        let cache_dir = self
            .cache_dir
            .ok_or_else(|| Error::Config("cache_dir is required".to_string()))?;

        let http_client = self.http_client.map_or_else(defaults::http_client, Ok)?;
        let file_system = self.file_system.map_or_else(defaults::file_system, Ok)?;
        let network_monitor = self
            .network_monitor
            .map_or_else(defaults::network_monitor, Ok)?;
        let storage_info = self.storage_info.map_or_else(defaults::storage_info, Ok)?;
        let settings_store = self
            .settings_store
            .map_or_else(|| defaults::settings_store(&database_path), Ok)?;

        let cache_size_mb = self.cache_size_mb.unwrap_or(DEFAULT_CACHE_SIZE_MB);
        let ephemeral_cache_mb = self
            .ephemeral_cache_mb
            .unwrap_or(DEFAULT_EPHEMERAL_CACHE_MB.min(cache_size_mb));

        let config = CoreConfig {
            database_path,
            cache_dir,
            cache_size_mb,
            ephemeral_cache_mb,
            http_client,
            file_system,
            settings_store,
            network_monitor,
            storage_info,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::{
        DesktopNetworkMonitor, DesktopStorageInfo, ReqwestHttpClient, SqliteSettingsStore,
        TokioFileSystem,
    };

    fn bridged(dir: &tempfile::TempDir) -> CoreConfigBuilder {
        CoreConfig::builder()
            .http_client(Arc::new(ReqwestHttpClient::new()))
            .file_system(Arc::new(TokioFileSystem::at(dir.path())))
            .settings_store(Arc::new(
                SqliteSettingsStore::open(dir.path().join("prefs.db")).unwrap(),
            ))
            .network_monitor(Arc::new(DesktopNetworkMonitor::new()))
            .storage_info(Arc::new(DesktopStorageInfo::new()))
    }

    #[tokio::test]
    async fn test_paths_are_required() {
        let dir = tempfile::tempdir().unwrap();

        let err = bridged(&dir).cache_dir("/cache").build().unwrap_err();
        assert!(err.to_string().contains("database_path"));

        let err = bridged(&dir)
            .database_path("/data/registry.db")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("cache_dir"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_bridge_is_named() {
        let result = CoreConfig::builder()
            .database_path("/data/registry.db")
            .cache_dir("/cache")
            .http_client(Arc::new(ReqwestHttpClient::new()))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, message }) => {
                assert_eq!(capability, "FileSystemAccess");
                assert!(message.contains("desktop-shims"));
            }
            other => panic!("expected CapabilityMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_size_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = bridged(&dir)
            .database_path("/data/registry.db")
            .cache_dir("/cache")
            .build()
            .unwrap();

        assert_eq!(config.cache_size_mb, DEFAULT_CACHE_SIZE_MB);
        assert_eq!(config.ephemeral_cache_mb, DEFAULT_EPHEMERAL_CACHE_MB);
        assert_eq!(config.cache_size_bytes(), 5 * 1024 * MIB);

        let small = bridged(&dir)
            .database_path("/data/registry.db")
            .cache_dir("/cache")
            .cache_size_mb(256)
            .build()
            .unwrap();
        assert_eq!(small.ephemeral_cache_mb, 256);
    }

    #[tokio::test]
    async fn test_bad_sizes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let build = |cache: usize, ephemeral: Option<usize>| {
            let builder = bridged(&dir)
                .database_path("/data/registry.db")
                .cache_dir("/cache")
                .cache_size_mb(cache);
            match ephemeral {
                Some(mb) => builder.ephemeral_cache_mb(mb).build(),
                None => builder.build(),
            }
        };

        assert!(build(0, None).unwrap_err().to_string().contains("at least 1 MB"));
        assert!(build(200_000, None).unwrap_err().to_string().contains("limit"));
        assert!(build(100, Some(200))
            .unwrap_err()
            .to_string()
            .contains("ephemeral"));
    }

    #[tokio::test]
    async fn test_debug_omits_bridges() {
        let dir = tempfile::tempdir().unwrap();
        let config = bridged(&dir)
            .database_path("/data/registry.db")
            .cache_dir("/cache")
            .build()
            .unwrap();

        let debug = format!("{:?}", config);
        assert!(debug.contains("registry.db"));
        assert!(!debug.contains("http_client"));
    }

    #[cfg(feature = "desktop-shims")]
    #[tokio::test]
    async fn test_desktop_settings_live_beside_registry() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::builder()
            .database_path(dir.path().join("registry.db"))
            .cache_dir(dir.path().join("cache"))
            .build()
            .unwrap();

        config
            .settings_store
            .set_bool("downloads.wifi_only", false)
            .await
            .unwrap();
        assert_eq!(
            config.settings_store.get_bool("downloads.wifi_only").await.unwrap(),
            Some(false)
        );
        assert!(dir.path().join("settings.db").exists());
    }
}
