//! Watch history
//!
//! Ordered, most recent first, persisted as a JSON array in the settings
//! store. Callers that mutate concurrently must serialize themselves; the
//! orchestrator does so under its operation lock.

use bridge_traits::storage::SettingsStore;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::types::ContentId;

pub const WATCH_HISTORY_KEY: &str = "watch_history";

pub struct WatchHistory {
    store: Arc<dyn SettingsStore>,
    entries: RwLock<Vec<ContentId>>,
}

impl WatchHistory {
    pub async fn load(store: Arc<dyn SettingsStore>) -> Result<Self> {
        let entries = match store.get_string(WATCH_HISTORY_KEY).await? {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };

        Ok(Self {
            store,
            entries: RwLock::new(entries),
        })
    }

    /// Record `content_id` as watched, moving it to the front.
    pub async fn mark_watched(&self, content_id: &ContentId) -> Result<()> {
        let entries = {
            let mut entries = self.entries.write();
            entries.retain(|id| id != content_id);
            entries.insert(0, content_id.clone());
            entries.clone()
        };

        self.persist(&entries).await?;
        debug!(content_id = %content_id, "Marked as watched");
        Ok(())
    }

    pub fn is_watched(&self, content_id: &ContentId) -> bool {
        self.entries.read().contains(content_id)
    }

    pub fn list(&self) -> Vec<ContentId> {
        self.entries.read().clone()
    }

    pub async fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        self.store.delete(WATCH_HISTORY_KEY).await?;
        Ok(())
    }

    async fn persist(&self, entries: &[ContentId]) -> Result<()> {
        let json = serde_json::to_string(entries)?;
        self.store.set_string(WATCH_HISTORY_KEY, &json).await?;
        Ok(())
    }
}
