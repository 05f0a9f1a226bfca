//! Download domain types
//!
//! The lifecycle of a download is an explicit [`DownloadState`]; numeric
//! progress never stands in for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque, stable identifier of a downloadable title.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ContentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Why a download is waiting on connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    NoNetwork,
    RequiresUnmetered,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseReason::NoNetwork => "no_network",
            PauseReason::RequiresUnmetered => "requires_unmetered",
        }
    }
}

/// Lifecycle state of a single download.
///
/// ```text
/// NotDownloaded ──> Queued ──> Downloading ──> Completed
///                     │  ^         │  │
///                     v  │         │  └──> Failed(n) ──(backoff)──> Queued
///                   Paused <───────┘
/// ```
///
/// Every non-terminal state may move to `Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum DownloadState {
    NotDownloaded,
    Queued,
    Downloading,
    Paused(PauseReason),
    Completed,
    Failed {
        /// Retries already used when the failure happened.
        retry_count: u32,
        /// No automatic retry is scheduled; a fresh request is required.
        terminal: bool,
    },
    Cancelled,
}

impl DownloadState {
    /// Returns true if moving from `self` to `next` is a legal edge.
    pub fn can_transition_to(&self, next: &DownloadState) -> bool {
        use DownloadState::*;

        match (self, next) {
            (NotDownloaded | Cancelled | Failed { terminal: true, .. }, Queued) => true,
            (Queued, Downloading | Paused(_) | Cancelled) => true,
            (Downloading, Completed | Paused(_) | Failed { .. } | Cancelled) => true,
            (Paused(current), Paused(reason)) => current != reason,
            (Paused(_), Downloading | Queued | Cancelled) => true,
            (Failed { terminal: false, .. }, Queued | Cancelled) => true,
            (Completed, NotDownloaded) => true,
            _ => false,
        }
    }

    /// States that hold (or wait for) a transfer slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DownloadState::Queued
                | DownloadState::Downloading
                | DownloadState::Paused(_)
                | DownloadState::Failed {
                    terminal: false,
                    ..
                }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed
                | DownloadState::Cancelled
                | DownloadState::Failed { terminal: true, .. }
        )
    }

    /// Canonical string form, as carried by download events.
    pub fn as_str(&self) -> String {
        match self {
            DownloadState::NotDownloaded => "not_downloaded".to_string(),
            DownloadState::Queued => "queued".to_string(),
            DownloadState::Downloading => "downloading".to_string(),
            DownloadState::Paused(reason) => format!("paused:{}", reason.as_str()),
            DownloadState::Completed => "completed".to_string(),
            DownloadState::Failed {
                retry_count,
                terminal: false,
            } => format!("failed:{}", retry_count),
            DownloadState::Failed {
                retry_count,
                terminal: true,
            } => format!("failed:{}:terminal", retry_count),
            DownloadState::Cancelled => "cancelled".to_string(),
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_downloaded" => Ok(DownloadState::NotDownloaded),
            "queued" => Ok(DownloadState::Queued),
            "downloading" => Ok(DownloadState::Downloading),
            "paused:no_network" => Ok(DownloadState::Paused(PauseReason::NoNetwork)),
            "paused:requires_unmetered" => {
                Ok(DownloadState::Paused(PauseReason::RequiresUnmetered))
            }
            "completed" => Ok(DownloadState::Completed),
            "cancelled" => Ok(DownloadState::Cancelled),
            other => {
                let rest = other
                    .strip_prefix("failed:")
                    .ok_or_else(|| format!("Unknown download state: {}", other))?;
                let (count, terminal) = match rest.strip_suffix(":terminal") {
                    Some(count) => (count, true),
                    None => (rest, false),
                };
                let retry_count = count
                    .parse()
                    .map_err(|_| format!("Invalid retry count in state: {}", other))?;
                Ok(DownloadState::Failed {
                    retry_count,
                    terminal,
                })
            }
        }
    }
}

/// A download owned by the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadTask {
    pub content_id: ContentId,
    pub source_uri: String,
    pub state: DownloadState,
    pub bytes_transferred: u64,
    /// Unknown until the server reports a size.
    pub total_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl DownloadTask {
    pub fn new(content_id: ContentId, source_uri: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            content_id,
            source_uri: source_uri.into(),
            state: DownloadState::NotDownloaded,
            bytes_transferred: 0,
            total_bytes: None,
            created_at: now,
            last_error: None,
        }
    }

    /// Bytes still missing, if the total is known.
    pub fn remaining_bytes(&self) -> Option<u64> {
        self.total_bytes
            .map(|total| total.saturating_sub(self.bytes_transferred))
    }
}

/// Why a download request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InsufficientStorage,
    AlreadyDownloading,
    AlreadyDownloaded,
}

impl RejectReason {
    pub fn description(&self) -> &'static str {
        match self {
            RejectReason::InsufficientStorage => "Not enough free space for this download",
            RejectReason::AlreadyDownloading => "This title is already being downloaded",
            RejectReason::AlreadyDownloaded => "This title is already downloaded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The task exists; carries its state right after admission.
    Accepted(DownloadState),
    Rejected(RejectReason),
}

impl RequestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RequestOutcome::Accepted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Ok,
    NotFound,
}

/// A catalog title as handed over by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub content_id: ContentId,
    pub title: String,
    pub source_uri: String,
}

impl CatalogItem {
    pub fn new(
        content_id: impl Into<ContentId>,
        title: impl Into<String>,
        source_uri: impl Into<String>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            title: title.into(),
            source_uri: source_uri.into(),
        }
    }
}
