//! Connectivity classification and change notification
//!
//! The platform bridge reports raw [`NetworkInfo`]; downloads only care about
//! three classes. [`ConnectivityMonitor`] keeps the current class, collapses
//! repeated identical reports and fans transitions out to subscribers.

use bridge_traits::network::{NetworkInfo, NetworkMonitor, NetworkStatus};
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::PauseReason;

const CHANGE_BUFFER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Offline,
    Metered,
    Unmetered,
}

impl ConnectivityState {
    /// Classify a bridge report. An indeterminate link counts as offline.
    pub fn from_info(info: &NetworkInfo) -> Self {
        match info.status {
            NetworkStatus::Connected if info.is_costly() => {
                ConnectivityState::Metered
            }
            NetworkStatus::Connected => ConnectivityState::Unmetered,
            NetworkStatus::Disconnected | NetworkStatus::Indeterminate => {
                ConnectivityState::Offline
            }
        }
    }

    pub fn is_online(&self) -> bool {
        !matches!(self, ConnectivityState::Offline)
    }

    /// Whether a transfer may run, given the Wi-Fi only preference.
    pub fn permits(&self, wifi_only: bool) -> Result<(), PauseReason> {
        match self {
            ConnectivityState::Offline => Err(PauseReason::NoNetwork),
            ConnectivityState::Metered if wifi_only => Err(PauseReason::RequiresUnmetered),
            _ => Ok(()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Offline => "offline",
            ConnectivityState::Metered => "metered",
            ConnectivityState::Unmetered => "unmetered",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Shared {
    current: RwLock<ConnectivityState>,
    changes: broadcast::Sender<ConnectivityState>,
}

/// Process-wide connectivity state.
pub struct ConnectivityMonitor {
    shared: Arc<Shared>,
    events: Option<EventBus>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER_SIZE);
        Self {
            shared: Arc::new(Shared {
                current: RwLock::new(initial),
                changes,
            }),
            events: None,
            pump: Mutex::new(None),
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Seed the state from the bridge and keep following its change stream.
    pub async fn from_bridge(
        monitor: Arc<dyn NetworkMonitor>,
        events: EventBus,
    ) -> crate::Result<Arc<Self>> {
        let initial = match monitor.get_network_info().await {
            Ok(info) => ConnectivityState::from_info(&info),
            Err(e) => {
                warn!(error = %e, "Initial network query failed, assuming offline");
                ConnectivityState::Offline
            }
        };
        let mut changes = monitor.subscribe_changes().await?;

        let this = Arc::new(Self::new(initial).with_event_bus(events));
        let weak: Weak<Self> = Arc::downgrade(&this);

        let handle = tokio::spawn(async move {
            while let Some(info) = changes.next().await {
                let Some(monitor) = weak.upgrade() else {
                    break;
                };
                monitor.publish(ConnectivityState::from_info(&info));
            }
            debug!("Network change stream ended");
        });
        *this.pump.lock() = Some(handle);

        info!(state = %initial, "Connectivity monitor started");
        Ok(this)
    }

    pub fn current(&self) -> ConnectivityState {
        *self.shared.current.read()
    }

    /// Record a new state. Returns `false` for a duplicate of the current one.
    pub fn publish(&self, state: ConnectivityState) -> bool {
        let previous = {
            let mut current = self.shared.current.write();
            if *current == state {
                return false;
            }
            let previous = std::mem::replace(&mut *current, state);
            // Sent under the lock so subscribers never see transitions out of order.
            let _ = self.shared.changes.send(state);
            previous
        };

        info!(from = %previous, to = %state, "Connectivity changed");
        if let Some(events) = &self.events {
            let _ = events.emit(CoreEvent::Network(NetworkEvent::ConnectivityChanged {
                from: previous.as_str().to_string(),
                to: state.as_str().to_string(),
            }));
        }
        true
    }

    /// A stream yielding the current state first, then each transition.
    pub fn subscribe(&self) -> ConnectivityStream {
        let current = self.shared.current.read();
        let receiver = self.shared.changes.subscribe();

        ConnectivityStream {
            shared: Arc::clone(&self.shared),
            receiver,
            pending: Some(*current),
            last: *current,
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("current", &self.current())
            .finish()
    }
}

pub struct ConnectivityStream {
    shared: Arc<Shared>,
    receiver: broadcast::Receiver<ConnectivityState>,
    pending: Option<ConnectivityState>,
    last: ConnectivityState,
}

impl ConnectivityStream {
    /// Next state, or `None` once the monitor is gone.
    pub async fn next(&mut self) -> Option<ConnectivityState> {
        if let Some(state) = self.pending.take() {
            return Some(state);
        }

        loop {
            let state = match self.receiver.recv().await {
                Ok(state) => state,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Connectivity subscriber lagged");
                    *self.shared.current.read()
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            if state != self.last {
                self.last = state;
                return Some(state);
            }
        }
    }
}
