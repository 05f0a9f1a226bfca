//! `SettingsStore` backed by a single SQLite table.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SettingsStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS preferences (
        key TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        value TEXT NOT NULL
    )
"#;

/// Stored alongside each value so a flag is never silently read back as
/// text (or the reverse).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Text,
    Flag,
}

impl ValueKind {
    fn as_str(self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Flag => "flag",
        }
    }
}

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> BridgeError {
    move |e| BridgeError::DatabaseError(format!("{}: {}", context, e))
}

/// Preferences kept in SQLite; desktop counterpart of UserDefaults.
///
/// The table is created on first use, so [`open`](Self::open) can run
/// outside an async context.
pub struct SqliteSettingsStore {
    pool: SqlitePool,
    schema: OnceCell<()>,
}

impl SqliteSettingsStore {
    /// Open (creating if needed) a store without touching the database yet.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(BridgeError::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        // Without idle or lifetime reaping the pool spawns no background
        // task, so this works outside a runtime.
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_lazy_with(options);

        debug!(path = ?db_path, "Opened settings store");
        Ok(Self {
            pool,
            schema: OnceCell::new(),
        })
    }

    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let store = Self::open(db_path)?;
        store.pool().await?;
        Ok(store)
    }

    /// Non-persistent store for tests and previews.
    pub async fn in_memory() -> Result<Self> {
        // Each in-memory connection is its own database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(db_error("open in-memory settings"))?;
        let store = Self {
            pool,
            schema: OnceCell::new(),
        };
        store.pool().await?;
        Ok(store)
    }

    async fn pool(&self) -> Result<&SqlitePool> {
        self.schema
            .get_or_try_init(|| async {
                sqlx::query(SCHEMA)
                    .execute(&self.pool)
                    .await
                    .map(|_| ())
                    .map_err(db_error("create preferences table"))
            })
            .await?;
        Ok(&self.pool)
    }

    async fn put(&self, key: &str, kind: ValueKind, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO preferences (key, kind, value) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET kind = excluded.kind, value = excluded.value",
        )
        .bind(key)
        .bind(kind.as_str())
        .bind(value)
        .execute(self.pool().await?)
        .await
        .map_err(db_error("write preference"))?;
        Ok(())
    }

    async fn fetch(&self, key: &str, kind: ValueKind) -> Result<Option<String>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT kind, value FROM preferences WHERE key = ?")
                .bind(key)
                .fetch_optional(self.pool().await?)
                .await
                .map_err(db_error("read preference"))?;

        match row {
            None => Ok(None),
            Some((stored, value)) if stored == kind.as_str() => Ok(Some(value)),
            Some((stored, _)) => {
                warn!(key, stored = %stored, wanted = kind.as_str(), "Preference read with wrong type");
                Err(BridgeError::OperationFailed(format!(
                    "preference {} holds a {} value, not {}",
                    key,
                    stored,
                    kind.as_str()
                )))
            }
        }
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, ValueKind::Text, value).await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.fetch(key, ValueKind::Text).await
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.put(key, ValueKind::Flag, if value { "1" } else { "0" })
            .await
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self
            .fetch(key, ValueKind::Flag)
            .await?
            .map(|value| value == "1"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM preferences WHERE key = ?")
            .bind(key)
            .execute(self.pool().await?)
            .await
            .map_err(db_error("delete preference"))?;
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM preferences WHERE key = ?")
            .bind(key)
            .fetch_one(self.pool().await?)
            .await
            .map_err(db_error("look up preference"))?;
        Ok(count > 0)
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT key FROM preferences ORDER BY key")
            .fetch_all(self.pool().await?)
            .await
            .map_err(db_error("list preferences"))
    }

    async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM preferences")
            .execute(self.pool().await?)
            .await
            .map_err(db_error("clear preferences"))?;
        debug!("Cleared all preferences");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_values_round_trip_and_delete() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_string("downloads.watch_history", "[]").await.unwrap();
        store.set_string("downloads.watch_history", "[\"m1\"]").await.unwrap();
        assert_eq!(
            store.get_string("downloads.watch_history").await.unwrap().as_deref(),
            Some("[\"m1\"]")
        );

        store.delete("downloads.watch_history").await.unwrap();
        assert_eq!(store.get_string("downloads.watch_history").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_flags_refuse_text_reads() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_bool("downloads.wifi_only", false).await.unwrap();
        assert_eq!(store.get_bool("downloads.wifi_only").await.unwrap(), Some(false));
        assert!(store.get_string("downloads.wifi_only").await.is_err());
        assert_eq!(store.get_bool("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_and_clear_keys() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_bool("b", true).await.unwrap();
        store.set_string("a", "x").await.unwrap();

        assert_eq!(store.list_keys().await.unwrap(), vec!["a", "b"]);
        assert!(store.has_key("b").await.unwrap());

        store.clear_all().await.unwrap();
        assert!(store.list_keys().await.unwrap().is_empty());
        assert!(!store.has_key("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs").join("settings.db");

        {
            let store = SqliteSettingsStore::new(&path).await.unwrap();
            store
                .set_bool("downloads.auto_delete_watched", true)
                .await
                .unwrap();
        }

        let reopened = SqliteSettingsStore::new(&path).await.unwrap();
        assert_eq!(
            reopened
                .get_bool("downloads.auto_delete_watched")
                .await
                .unwrap(),
            Some(true)
        );
    }
}
