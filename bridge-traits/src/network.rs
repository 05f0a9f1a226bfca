//! Connectivity probing.
//!
//! Hosts report the link the device is on; the engine decides from that
//! whether transfers may run (see `core_offline::network`).

use async_trait::async_trait;

use crate::error::Result;

/// Physical link kind, when the platform can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    WiFi,
    Ethernet,
    Cellular,
    Other,
}

/// Reachability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    /// The platform could not decide; the engine treats this as offline.
    Indeterminate,
}

/// Snapshot of the current link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Data on this link is capped or billed (cellular, tethered hotspot,
    /// a Wi-Fi network the user flagged as metered).
    pub is_metered: bool,
}

impl NetworkInfo {
    pub fn connected(network_type: NetworkType, is_metered: bool) -> Self {
        Self {
            status: NetworkStatus::Connected,
            network_type: Some(network_type),
            is_metered,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
            is_metered: false,
        }
    }

    pub fn indeterminate() -> Self {
        Self {
            status: NetworkStatus::Indeterminate,
            network_type: None,
            is_metered: false,
        }
    }

    /// Whether traffic on this link may cost the user money.
    ///
    /// Cellular links count as metered even when the platform does not flag
    /// them.
    pub fn is_costly(&self) -> bool {
        self.is_metered || self.network_type == Some(NetworkType::Cellular)
    }
}

/// Platform connectivity source.
///
/// Desktop adapters usually probe a well-known host; mobile hosts wrap
/// `NWPathMonitor` or `ConnectivityManager` callbacks.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    async fn is_connected(&self) -> bool {
        self.get_network_info()
            .await
            .map(|info| info.status == NetworkStatus::Connected)
            .unwrap_or(false)
    }

    /// Updates whenever the link changes. The first item need not repeat
    /// the current state.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

/// Change feed returned by [`NetworkMonitor::subscribe_changes`].
#[async_trait]
pub trait NetworkChangeStream: Send {
    /// `None` once the platform stops reporting.
    async fn next(&mut self) -> Option<NetworkInfo>;
}
