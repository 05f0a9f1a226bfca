//! # Event Bus System
//!
//! Broadcasts download lifecycle, connectivity and cache events to every
//! interested subscriber using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain, wrapped by [`CoreEvent`]
//! - **EventBus**: central broadcast channel for publishing events
//! - **EventStream**: wrapper for consuming events with filtering
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Orchestrator ├──────────────>│           │     subscribe    ┌────────────┐
//! └──────────────┘               │ EventBus  ├─────────────────>│  Host UI   │
//! ┌──────────────┐     emit      │ (broadcast│                  └────────────┘
//! │ Connectivity ├──────────────>│  channel) │     subscribe    ┌────────────┐
//! └──────────────┘               │           ├─────────────────>│   Tests    │
//! ┌──────────────┐     emit      │           │                  └────────────┘
//! │ Cache Store  ├──────────────>│           │
//! └──────────────┘               └───────────┘
//! ```
//!
//! ## Event Types
//!
//! ### Download Events
//! - `StateChanged`: every lifecycle transition, with both endpoints
//! - `Progress`: bytes transferred so far
//! - `Restarted`: the server ignored a resume request, transfer restarts at zero
//! - `Completed`: payload committed and registered
//! - `Failed`: transfer failed (possibly retried)
//! - `Cancelled`: user cancelled, all artifacts removed
//! - `Removed`: a completed download was deleted
//!
//! ### Network Events
//! - `ConnectivityChanged`: Offline / Metered / Unmetered transitions
//!
//! ### Cache Events
//! - `Evicted`: an ephemeral entry was dropped to make room
//! - `CorruptionRepaired`: registry and disk disagreed at startup
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emission never blocks the publisher. A slow subscriber only hurts itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Progress events are the bulk of the traffic; subscribers that can't keep
/// up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Download lifecycle events
    Download(DownloadEvent),
    /// Connectivity events
    Network(NetworkEvent),
    /// Media cache events
    Cache(CacheEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Network(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Download(DownloadEvent::Failed { terminal: true, .. }) => {
                EventSeverity::Error
            }
            CoreEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Warning,
            CoreEvent::Cache(CacheEvent::CorruptionRepaired { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Restarted { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Network(NetworkEvent::ConnectivityChanged { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Content id the event refers to, if any.
    pub fn content_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Download(e) => Some(e.content_id()),
            CoreEvent::Cache(CacheEvent::CorruptionRepaired { content_id, .. }) => {
                Some(content_id)
            }
            _ => None,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Download Events
// ============================================================================

/// Events describing a single download's lifecycle.
///
/// States are carried as their canonical string form (`"queued"`,
/// `"paused:no_network"`, `"failed:2"`, ...) so hosts can render them
/// without depending on the engine crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// A lifecycle transition.
    StateChanged {
        content_id: String,
        from: String,
        to: String,
    },
    /// Bytes transferred so far.
    Progress {
        content_id: String,
        bytes_transferred: u64,
        /// `None` while the server has not disclosed the size.
        total_bytes: Option<u64>,
    },
    /// The server answered a resume request with the full body.
    Restarted {
        content_id: String,
        /// Staged bytes that were thrown away.
        discarded_bytes: u64,
    },
    /// Payload committed to retained storage and registered.
    Completed { content_id: String, size_bytes: u64 },
    /// Transfer failed.
    Failed {
        content_id: String,
        message: String,
        /// Retries already used when the failure happened.
        retry_count: u32,
        /// No further automatic retries will happen.
        terminal: bool,
    },
    /// User cancelled an in-flight or queued download.
    Cancelled { content_id: String },
    /// A completed download was deleted.
    Removed {
        content_id: String,
        /// Why the bytes went away (`"cancelled"`, `"watched"`, `"cleared"`).
        reason: String,
    },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::StateChanged { .. } => "Download state changed",
            DownloadEvent::Progress { .. } => "Download in progress",
            DownloadEvent::Restarted { .. } => "Download restarted from zero",
            DownloadEvent::Completed { .. } => "Download completed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Cancelled { .. } => "Download cancelled",
            DownloadEvent::Removed { .. } => "Download removed",
        }
    }

    pub fn content_id(&self) -> &str {
        match self {
            DownloadEvent::StateChanged { content_id, .. }
            | DownloadEvent::Progress { content_id, .. }
            | DownloadEvent::Restarted { content_id, .. }
            | DownloadEvent::Completed { content_id, .. }
            | DownloadEvent::Failed { content_id, .. }
            | DownloadEvent::Cancelled { content_id }
            | DownloadEvent::Removed { content_id, .. } => content_id,
        }
    }
}

// ============================================================================
// Network Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum NetworkEvent {
    /// Connectivity moved between `offline`, `metered` and `unmetered`.
    ConnectivityChanged { from: String, to: String },
}

impl NetworkEvent {
    fn description(&self) -> &str {
        match self {
            NetworkEvent::ConnectivityChanged { .. } => "Connectivity changed",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// An ephemeral entry was evicted.
    Evicted { key: String, bytes_freed: u64 },
    /// A registry entry without valid bytes on disk was dropped at startup.
    CorruptionRepaired { content_id: String, reason: String },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Evicted { .. } => "Cache entry evicted",
            CacheEvent::CorruptionRepaired { .. } => "Cache inconsistency repaired",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Cloneable handle to one broadcast channel of [`CoreEvent`]s.
///
/// Publishing never waits on subscribers. Each subscriber has its own
/// buffer of `capacity` events; one that falls further behind sees
/// `RecvError::Lagged` and then continues with the newest events.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
///
/// let bus = EventBus::new(64);
/// let mut ui = bus.subscribe();
///
/// bus.emit(CoreEvent::Download(DownloadEvent::Completed {
///     content_id: "m1".to_string(),
///     size_bytes: 1_048_576,
/// }))
/// .ok();
///
/// assert!(ui.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to every current subscriber, returning how many there were.
    ///
    /// Fails only when nobody is subscribed, which publishers ignore.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Receive every event published from now on. Nothing is replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Subscriber that only yields events accepted by an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(64);
/// let connectivity = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Network(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Next accepted event. Lag and closure are passed through unchanged.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Next accepted event that is already buffered, if any.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => return Some(Err(RecvError::Lagged(n))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            };
            if self.accepts(&event) {
                return Some(Ok(event));
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state_changed(id: &str, from: &str, to: &str) -> CoreEvent {
        CoreEvent::Download(DownloadEvent::StateChanged {
            content_id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);

        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(state_changed("m1", "not_downloaded", "queued")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = state_changed("m1", "queued", "downloading");
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Network(_)));

        bus.emit(state_changed("m1", "queued", "downloading")).ok();

        let network_event = CoreEvent::Network(NetworkEvent::ConnectivityChanged {
            from: "unmetered".to_string(),
            to: "offline".to_string(),
        });
        bus.emit(network_event.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), network_event);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(CoreEvent::Download(DownloadEvent::Progress {
                content_id: "m1".to_string(),
                bytes_transferred: i * 1024,
                total_bytes: None,
            }))
            .ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let terminal = CoreEvent::Download(DownloadEvent::Failed {
            content_id: "m1".to_string(),
            message: "HTTP 404".to_string(),
            retry_count: 3,
            terminal: true,
        });
        assert_eq!(terminal.severity(), EventSeverity::Error);

        let retrying = CoreEvent::Download(DownloadEvent::Failed {
            content_id: "m1".to_string(),
            message: "connection reset".to_string(),
            retry_count: 0,
            terminal: false,
        });
        assert_eq!(retrying.severity(), EventSeverity::Warning);

        let completed = CoreEvent::Download(DownloadEvent::Completed {
            content_id: "m1".to_string(),
            size_bytes: 10,
        });
        assert_eq!(completed.severity(), EventSeverity::Info);
        assert_eq!(completed.description(), "Download completed");

        let evicted = CoreEvent::Cache(CacheEvent::Evicted {
            key: "preview".to_string(),
            bytes_freed: 64,
        });
        assert_eq!(evicted.severity(), EventSeverity::Debug);
        assert_eq!(evicted.content_id(), None);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());

        let event = CoreEvent::Download(DownloadEvent::Cancelled {
            content_id: "m1".to_string(),
        });
        bus.emit(event.clone()).ok();

        assert_eq!(stream.try_recv().unwrap().unwrap(), event);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Download(DownloadEvent::Removed {
            content_id: "m7".to_string(),
            reason: "watched".to_string(),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"Download""#));
        assert!(json.contains(r#""event":"Removed""#));

        let deserialized: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
        assert_eq!(deserialized.content_id(), Some("m7"));
    }
}
