//! Durable record of completed downloads
//!
//! One row per fully downloaded title. Every write is committed with
//! `synchronous = FULL` before the call returns, and an in-memory mirror
//! serves the hot read path (`is_completed`) without touching SQLite.

use bridge_traits::time::Clock;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
    },
    Row,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{OfflineError, Result};
use crate::types::ContentId;

const CREATE_REGISTRY_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS download_registry (
        content_id TEXT PRIMARY KEY,
        completed_at INTEGER NOT NULL,
        size_bytes INTEGER NOT NULL,
        checksum TEXT
    )
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub content_id: ContentId,
    pub completed_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Hex SHA-256 of the retained payload.
    pub checksum: Option<String>,
}

pub struct DownloadRegistry {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    mirror: RwLock<BTreeMap<ContentId, RegistryEntry>>,
}

impl DownloadRegistry {
    /// Open (or create) the registry database at `path`.
    pub async fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path_str = path.to_string_lossy().replace('\\', "/");
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path_str))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let registry = Self::init(pool, clock).await?;
        info!(
            path = ?path,
            entries = registry.len(),
            "Opened download registry"
        );
        Ok(registry)
    }

    /// Create an in-memory registry (for testing)
    pub async fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .synchronous(SqliteSynchronous::Full);

        // A single connection: every new in-memory connection is a fresh database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::init(pool, clock).await
    }

    async fn init(pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self> {
        sqlx::query(CREATE_REGISTRY_TABLE).execute(&pool).await?;

        let rows = sqlx::query(
            "SELECT content_id, completed_at, size_bytes, checksum FROM download_registry",
        )
        .fetch_all(&pool)
        .await?;

        let mut mirror = BTreeMap::new();
        for row in rows {
            let entry = Self::entry_from_row(&row)?;
            mirror.insert(entry.content_id.clone(), entry);
        }

        Ok(Self {
            pool,
            clock,
            mirror: RwLock::new(mirror),
        })
    }

    fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RegistryEntry> {
        let content_id: String = row.try_get("content_id")?;
        let completed_at: i64 = row.try_get("completed_at")?;
        let size_bytes: i64 = row.try_get("size_bytes")?;

        let completed_at = Utc
            .timestamp_millis_opt(completed_at)
            .single()
            .ok_or_else(|| {
                OfflineError::RegistryCorruption(format!(
                    "invalid completion time {} for {}",
                    completed_at, content_id
                ))
            })?;
        let size_bytes = u64::try_from(size_bytes).map_err(|_| {
            OfflineError::RegistryCorruption(format!(
                "negative size {} for {}",
                size_bytes, content_id
            ))
        })?;

        Ok(RegistryEntry {
            content_id: ContentId::new(content_id),
            completed_at,
            size_bytes,
            checksum: row.try_get("checksum")?,
        })
    }

    /// Record a completed download. Durable once this returns.
    #[instrument(skip(self, checksum))]
    pub async fn mark_completed(
        &self,
        content_id: &ContentId,
        size_bytes: u64,
        checksum: Option<String>,
    ) -> Result<RegistryEntry> {
        let size = i64::try_from(size_bytes)
            .map_err(|_| OfflineError::Internal(format!("size {} out of range", size_bytes)))?;
        let entry = RegistryEntry {
            content_id: content_id.clone(),
            completed_at: self.clock.now(),
            size_bytes,
            checksum,
        };

        sqlx::query(
            r#"
            INSERT INTO download_registry (content_id, completed_at, size_bytes, checksum)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(content_id) DO UPDATE SET
                completed_at = excluded.completed_at,
                size_bytes = excluded.size_bytes,
                checksum = excluded.checksum
            "#,
        )
        .bind(content_id.as_str())
        .bind(entry.completed_at.timestamp_millis())
        .bind(size)
        .bind(entry.checksum.as_deref())
        .execute(&self.pool)
        .await?;

        self.mirror.write().insert(content_id.clone(), entry.clone());
        debug!(size_bytes, "Registered completed download");
        Ok(entry)
    }

    /// Remove an entry. Returns `false` when there was none.
    pub async fn remove(&self, content_id: &ContentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM download_registry WHERE content_id = ?")
            .bind(content_id.as_str())
            .execute(&self.pool)
            .await?;

        self.mirror.write().remove(content_id);
        Ok(result.rows_affected() > 0)
    }

    pub fn is_completed(&self, content_id: &ContentId) -> bool {
        self.mirror.read().contains_key(content_id)
    }

    pub fn get(&self, content_id: &ContentId) -> Option<RegistryEntry> {
        self.mirror.read().get(content_id).cloned()
    }

    pub fn list_completed(&self) -> BTreeSet<ContentId> {
        self.mirror.read().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.mirror.read().values().cloned().collect()
    }

    /// Sum of the sizes of all completed downloads.
    pub fn total_size(&self) -> u64 {
        self.mirror.read().values().map(|e| e.size_bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.mirror.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror.read().is_empty()
    }

    /// Drop every entry. Returns how many were removed.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_registry")
            .execute(&self.pool)
            .await?;

        self.mirror.write().clear();
        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::SystemClock;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }

    #[tokio::test]
    async fn test_mark_and_query() {
        let registry = DownloadRegistry::in_memory(clock()).await.unwrap();
        let m1 = ContentId::new("m1");

        assert!(!registry.is_completed(&m1));
        registry
            .mark_completed(&m1, 1_024, Some("abc".into()))
            .await
            .unwrap();

        assert!(registry.is_completed(&m1));
        assert_eq!(registry.get(&m1).unwrap().size_bytes, 1_024);
        assert_eq!(registry.list_completed().into_iter().collect::<Vec<_>>(), vec![m1.clone()]);
        assert_eq!(registry.total_size(), 1_024);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let registry = DownloadRegistry::in_memory(clock()).await.unwrap();
        let m1 = ContentId::new("m1");
        let m2 = ContentId::new("m2");

        registry.mark_completed(&m1, 10, None).await.unwrap();
        registry.mark_completed(&m2, 20, None).await.unwrap();

        assert!(registry.remove(&m1).await.unwrap());
        assert!(!registry.remove(&m1).await.unwrap());
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.clear().await.unwrap(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.total_size(), 0);
    }

    #[tokio::test]
    async fn test_mark_completed_overwrites() {
        let registry = DownloadRegistry::in_memory(clock()).await.unwrap();
        let m1 = ContentId::new("m1");

        registry.mark_completed(&m1, 10, None).await.unwrap();
        registry
            .mark_completed(&m1, 30, Some("beef".into()))
            .await
            .unwrap();

        let entry = registry.get(&m1).unwrap();
        assert_eq!(entry.size_bytes, 30);
        assert_eq!(entry.checksum.as_deref(), Some("beef"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("registry.db");

        {
            let registry = DownloadRegistry::open(&path, clock()).await.unwrap();
            registry
                .mark_completed(&ContentId::new("m1"), 2_048, None)
                .await
                .unwrap();
            registry.close().await;
        }

        let reopened = DownloadRegistry::open(&path, clock()).await.unwrap();
        assert!(reopened.is_completed(&ContentId::new("m1")));
        assert_eq!(reopened.total_size(), 2_048);
    }
}
