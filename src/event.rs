//! Structured events emitted by the engine on queue and item transitions.
//!
//! Strictly advisory: the engine's correctness never depends on a
//! subscriber being attached. Consumers (UI, logs) subscribe to the
//! broadcast stream; a lagging receiver drops old events, it never
//! backpressures the worker.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::WorkItemId;

/// A structured event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The worker began executing an item.
    ItemStarted { id: WorkItemId },
    /// An item reached Completed or Failed.
    ItemFinished {
        id: WorkItemId,
        success: bool,
        payload: serde_json::Value,
    },
    /// Processing suspended by external request.
    QueuePaused,
    /// Processing resumed.
    QueueResumed,
    /// The worker drained the queue and went idle.
    QueueEmpty,
    /// Queue contents changed (enqueue, cancel, retry).
    QueueChanged { pending: usize },
    /// The server throttled an operation.
    RateLimited { retry_after_secs: u64, message: String },
}

/// Event fan-out. Stamps sequence numbers and timestamps, delivers over
/// a broadcast channel.
pub(crate) struct EventBus {
    seq: AtomicU64,
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            seq: AtomicU64::new(0),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit an event. A send with no live receivers is not an error.
    pub fn emit(&self, kind: EventKind) {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            kind,
        };
        tracing::debug!(seq = event.seq, kind = ?event.kind, "event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_carry_monotonic_seq() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(EventKind::QueuePaused);
        bus.emit(EventKind::QueueResumed);
        bus.emit(EventKind::QueueEmpty);

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        let c = rx.recv().await.unwrap();
        assert!(a.seq < b.seq && b.seq < c.seq);
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        bus.emit(EventKind::QueueEmpty);
    }

    #[test]
    fn event_kind_serializes_tagged() {
        let kind = EventKind::RateLimited {
            retry_after_secs: 30,
            message: "slow down".into(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "rate_limited");
        assert_eq!(json["retry_after_secs"], 30);
    }
}
