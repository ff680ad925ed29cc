//! Status events for the UI/observability collaborator.
//!
//! Producers never block on consumers: events are broadcast and dropped for
//! subscribers that fall too far behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tokio::sync::broadcast;

/// Buffered events per subscriber.
const EVENT_CAPACITY: usize = 64;

/// Reason recorded for controller-initiated switches.
pub const SMART_SWITCH: &str = "smart_switch";

/// Something the UI layer may want to show.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    /// Relay is serving queries.
    Active {
        resolver: IpAddr,
        group: String,
        port: u16,
    },
    /// Relay stopped.
    Stopped,
    /// The controller moved the relay to another resolver group.
    Switched {
        resolver: IpAddr,
        group: String,
        timestamp: DateTime<Utc>,
        reason: String,
        peak_hour: bool,
    },
    /// Periodic one-line summary.
    Status { text: String },
}

/// Broadcast channel of [`StatusEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscriber is not an error.
    pub fn emit(&self, event: StatusEvent) {
        tracing::debug!("event: {event:?}");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
