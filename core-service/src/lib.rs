//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! settings, network and storage probes) into the offline media engine.
//! Desktop apps typically enable the `desktop-shims` feature, which lets
//! [`CoreConfig`] fall back to the adapters from `bridge-desktop` for any
//! bridge the host does not inject.

pub mod error;

pub use error::{CoreError, Result};

pub use core_offline::{
    CacheStats, CancelOutcome, CatalogItem, ConnectivityState, ContentId, DownloadState,
    DownloadTask, OfflineConfig, PauseReason, Progress, ProgressSnapshot, RejectReason,
    RequestOutcome,
};
pub use core_runtime::config::CoreConfig;
pub use core_runtime::events::{CoreEvent, EventBus, EventStream};
pub use core_runtime::logging::{init_logging, LoggingConfig};

use bytes::Bytes;
use core_offline::{
    CacheStore, ConnectivityMonitor, ConnectivityStream, DownloadOrchestrator,
    DownloadPreferences, DownloadRegistry, OrchestratorParts, StreamingCache, WatchHistory,
};
use core_runtime::events::Receiver;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Buffered events per subscriber.
const EVENT_BUS_CAPACITY: usize = 1024;

/// Point-in-time overview for settings screens.
#[derive(Debug, Clone, Serialize)]
pub struct OfflineSummary {
    pub connectivity: String,
    pub wifi_only: bool,
    pub auto_delete_watched: bool,
    pub completed_downloads: usize,
    pub active_downloads: usize,
    pub total_downloaded_bytes: u64,
    pub cache: CacheStats,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct OfflineService {
    orchestrator: Arc<DownloadOrchestrator>,
    streaming: Arc<StreamingCache>,
    registry: Arc<DownloadRegistry>,
    events: EventBus,
}

impl OfflineService {
    /// Start the engine with default tuning.
    pub async fn start(config: CoreConfig) -> Result<Self> {
        Self::start_with(config, OfflineConfig::new()).await
    }

    /// Start the engine. Cache location and bounds always come from
    /// `config`; everything else from `offline`.
    pub async fn start_with(config: CoreConfig, offline: OfflineConfig) -> Result<Self> {
        let cache_config = offline
            .cache
            .clone()
            .with_cache_directory(config.cache_dir.join("media"))
            .with_max_size(config.cache_size_bytes())
            .with_max_ephemeral_size(config.ephemeral_cache_bytes());
        let offline = offline.with_cache(cache_config);
        offline
            .validate()
            .map_err(CoreError::InitializationFailed)?;

        let events = EventBus::new(EVENT_BUS_CAPACITY);

        let registry = Arc::new(
            DownloadRegistry::open(&config.database_path, Arc::clone(&config.clock)).await?,
        );
        let cache = Arc::new(
            CacheStore::open(
                offline.cache.clone(),
                Arc::clone(&config.file_system),
                Arc::clone(&config.clock),
            )
            .await?
            .with_event_bus(events.clone()),
        );
        let connectivity =
            ConnectivityMonitor::from_bridge(Arc::clone(&config.network_monitor), events.clone())
                .await?;
        let preferences =
            Arc::new(DownloadPreferences::load(Arc::clone(&config.settings_store)).await?);
        let history = Arc::new(WatchHistory::load(Arc::clone(&config.settings_store)).await?);

        let streaming = StreamingCache::new(
            Arc::clone(&config.http_client),
            Arc::clone(&cache),
            Arc::clone(&connectivity),
        );

        let orchestrator = DownloadOrchestrator::start(
            offline,
            OrchestratorParts {
                http: Arc::clone(&config.http_client),
                fs: Arc::clone(&config.file_system),
                storage: Arc::clone(&config.storage_info),
                connectivity,
                registry: Arc::clone(&registry),
                cache,
                preferences,
                history,
                events: events.clone(),
                clock: Arc::clone(&config.clock),
            },
        )
        .await?;

        info!(
            database = %config.database_path.display(),
            cache_dir = %config.cache_dir.display(),
            cache_size_mb = config.cache_size_mb,
            "Offline service started"
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            streaming: Arc::new(streaming),
            registry,
            events,
        })
    }

    /// Start with desktop defaults for every bridge.
    #[cfg(feature = "desktop-shims")]
    pub async fn desktop(
        database_path: impl Into<std::path::PathBuf>,
        cache_dir: impl Into<std::path::PathBuf>,
    ) -> Result<Self> {
        let config = CoreConfig::builder()
            .database_path(database_path)
            .cache_dir(cache_dir)
            .build()?;
        Self::start(config).await
    }

    // ========================================================================
    // Downloads
    // ========================================================================

    pub async fn download(&self, item: &CatalogItem) -> Result<RequestOutcome> {
        self.request_download(&item.content_id, &item.source_uri)
            .await
    }

    pub async fn request_download(
        &self,
        content_id: &ContentId,
        source_uri: &str,
    ) -> Result<RequestOutcome> {
        Ok(self
            .orchestrator
            .request_download(content_id, source_uri)
            .await?)
    }

    pub async fn cancel(&self, content_id: &ContentId) -> Result<CancelOutcome> {
        Ok(self.orchestrator.cancel(content_id).await?)
    }

    pub fn state(&self, content_id: &ContentId) -> DownloadState {
        self.orchestrator.get_state(content_id)
    }

    pub fn tasks(&self) -> Vec<DownloadTask> {
        self.orchestrator.tasks()
    }

    pub fn list_completed(&self) -> BTreeSet<ContentId> {
        self.orchestrator.list_completed()
    }

    pub fn total_downloaded_size(&self) -> u64 {
        self.orchestrator.total_downloaded_size()
    }

    pub async fn clear_all_downloads(&self) -> Result<usize> {
        Ok(self.orchestrator.clear_all_downloads().await?)
    }

    // ========================================================================
    // Watch History & Preferences
    // ========================================================================

    /// Record playback of a title; see [`DownloadOrchestrator::mark_watched`].
    pub async fn mark_watched(&self, content_id: &ContentId) -> Result<bool> {
        Ok(self.orchestrator.mark_watched(content_id).await?)
    }

    pub fn watch_history(&self) -> Vec<ContentId> {
        self.orchestrator.history().list()
    }

    pub fn wifi_only(&self) -> bool {
        self.orchestrator.preferences().wifi_only()
    }

    pub async fn set_wifi_only(&self, enabled: bool) -> Result<()> {
        Ok(self.orchestrator.set_wifi_only(enabled).await?)
    }

    pub fn auto_delete_watched(&self) -> bool {
        self.orchestrator.preferences().auto_delete_watched()
    }

    pub async fn set_auto_delete_watched(&self, enabled: bool) -> Result<()> {
        Ok(self.orchestrator.set_auto_delete_watched(enabled).await?)
    }

    // ========================================================================
    // Streaming
    // ========================================================================

    /// Bytes for playback, from the cache or the network.
    pub async fn stream(&self, item: &CatalogItem) -> Result<Bytes> {
        Ok(self
            .streaming
            .fetch(&item.content_id, &item.source_uri)
            .await?)
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        self.orchestrator.progress_snapshot()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.orchestrator.subscribe_progress()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.orchestrator.connectivity()
    }

    pub fn subscribe_connectivity(&self) -> ConnectivityStream {
        self.orchestrator.subscribe_connectivity()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.orchestrator.cache_stats().await
    }

    pub async fn summary(&self) -> OfflineSummary {
        let active_downloads = self
            .orchestrator
            .tasks()
            .iter()
            .filter(|task| task.state.is_active())
            .count();

        OfflineSummary {
            connectivity: self.connectivity().to_string(),
            wifi_only: self.wifi_only(),
            auto_delete_watched: self.auto_delete_watched(),
            completed_downloads: self.registry.len(),
            active_downloads,
            total_downloaded_bytes: self.registry.total_size(),
            cache: self.cache_stats().await,
        }
    }

    /// Stop all transfers and release the registry.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        self.registry.close().await;
        info!("Offline service stopped");
    }
}
