//! # Offline Media Module
//!
//! Downloads media for offline playback and keeps a bounded on-disk cache.
//!
//! ## Overview
//!
//! This module handles:
//! - Download scheduling with bounded concurrency, retries and resumption
//! - Connectivity-aware pausing, including the Wi-Fi only preference
//! - Free-space checks before and during transfers
//! - A durable registry of completed downloads
//! - A size-bounded cache shared by retained downloads and streamed reads
//! - Watch history and auto-deletion of watched downloads
//!
//! The [`DownloadOrchestrator`] ties these together and is the only writer
//! of download state.

pub mod cache;
pub mod config;
pub mod error;
pub mod history;
pub mod network;
pub mod orchestrator;
pub mod preferences;
pub mod progress;
pub mod registry;
pub mod storage_guard;
pub mod streaming;
mod transfer;
pub mod types;

pub use cache::{CacheConfig, CacheEntry, CacheStats, CacheStore, EvictionPolicy};
pub use config::OfflineConfig;
pub use error::{OfflineError, Result};
pub use history::WatchHistory;
pub use network::{ConnectivityMonitor, ConnectivityState, ConnectivityStream};
pub use orchestrator::{DownloadOrchestrator, OrchestratorParts};
pub use preferences::DownloadPreferences;
pub use progress::{Progress, ProgressEntry, ProgressSnapshot, ProgressTracker};
pub use registry::{DownloadRegistry, RegistryEntry};
pub use storage_guard::StorageGuard;
pub use streaming::StreamingCache;
pub use types::{
    CancelOutcome, CatalogItem, ContentId, DownloadState, DownloadTask, PauseReason,
    RejectReason, RequestOutcome,
};
