//! Lifecycle events and the channel that carries them.
//!
//! Anomalies publish into an [`EventSink`] handed to them at construction
//! (or attached by the processor). There is no global emitter: whoever owns
//! the sink decides who may subscribe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{Activity, AnomalyId, AnomalyState, LogLevel};

/// Default broadcast capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Something observable that happened to one anomaly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnomalyEvent {
    /// Mirrors a history entry.
    Log {
        #[serde(rename = "type")]
        level: LogLevel,
        message: String,
        data: serde_json::Value,
    },
    State {
        old_state: AnomalyState,
        new_state: AnomalyState,
    },
    Pause {
        reason: String,
    },
    Resume {
        reason: String,
    },
    /// Brackets a lifecycle phase: `progress` is 0 on entry, 100 on completion.
    Activity {
        activity: Activity,
        progress: u8,
    },
}

/// An event tagged with the anomaly that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub anomaly_id: AnomalyId,
    pub anomaly_name: String,
    pub timestamp: DateTime<Utc>,
    pub event: AnomalyEvent,
}

/// Sending half of the lifecycle event channel.
#[derive(Clone, Debug)]
pub struct EventSink {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventSink {
    /// Create a sink with the given buffer capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an envelope. Dropped silently when nobody is subscribed.
    pub fn publish(&self, envelope: EventEnvelope) {
        let _ = self.sender.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
