//! User download preferences backed by the settings store

use bridge_traits::storage::SettingsStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::error::Result;

pub const WIFI_ONLY_KEY: &str = "downloads.wifi_only";
pub const AUTO_DELETE_WATCHED_KEY: &str = "downloads.auto_delete_watched";

/// Download preferences.
///
/// Values are read once at load and cached; setters write through to the
/// store before updating the cached value.
pub struct DownloadPreferences {
    store: Arc<dyn SettingsStore>,
    wifi_only: AtomicBool,
    auto_delete_watched: AtomicBool,
}

impl DownloadPreferences {
    /// Load preferences, falling back to Wi-Fi only on and auto-delete off.
    pub async fn load(store: Arc<dyn SettingsStore>) -> Result<Self> {
        let wifi_only = store.get_bool(WIFI_ONLY_KEY).await?.unwrap_or(true);
        let auto_delete_watched = store
            .get_bool(AUTO_DELETE_WATCHED_KEY)
            .await?
            .unwrap_or(false);

        Ok(Self {
            store,
            wifi_only: AtomicBool::new(wifi_only),
            auto_delete_watched: AtomicBool::new(auto_delete_watched),
        })
    }

    pub fn wifi_only(&self) -> bool {
        self.wifi_only.load(Ordering::SeqCst)
    }

    pub fn auto_delete_watched(&self) -> bool {
        self.auto_delete_watched.load(Ordering::SeqCst)
    }

    pub async fn set_wifi_only(&self, enabled: bool) -> Result<()> {
        self.store.set_bool(WIFI_ONLY_KEY, enabled).await?;
        self.wifi_only.store(enabled, Ordering::SeqCst);
        info!(enabled, "Wi-Fi only downloads updated");
        Ok(())
    }

    pub async fn set_auto_delete_watched(&self, enabled: bool) -> Result<()> {
        self.store.set_bool(AUTO_DELETE_WATCHED_KEY, enabled).await?;
        self.auto_delete_watched.store(enabled, Ordering::SeqCst);
        info!(enabled, "Auto-delete after watching updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::SqliteSettingsStore;

    #[tokio::test]
    async fn test_defaults() {
        let store = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        let prefs = DownloadPreferences::load(store).await.unwrap();

        assert!(prefs.wifi_only());
        assert!(!prefs.auto_delete_watched());
    }

    #[tokio::test]
    async fn test_setters_persist() {
        let store = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        let prefs = DownloadPreferences::load(store.clone()).await.unwrap();

        prefs.set_wifi_only(false).await.unwrap();
        prefs.set_auto_delete_watched(true).await.unwrap();

        let reloaded = DownloadPreferences::load(store).await.unwrap();
        assert!(!reloaded.wifi_only());
        assert!(reloaded.auto_delete_watched());
    }
}
