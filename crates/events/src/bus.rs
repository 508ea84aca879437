//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`BatchEvent`]s. It is
//! designed to be shared via `Arc<EventBus>` between the engine (the only
//! publisher) and any number of dashboard pollers or streamers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event type constants
// ---------------------------------------------------------------------------

/// Run accepted and queued after validation.
pub const EVENT_BATCH_QUEUED: &str = "batch.queued";

/// Progress update during batch execution (current/total + item).
pub const EVENT_BATCH_PROGRESS: &str = "batch.progress";

/// One item failed terminally (retries exhausted or not retryable).
pub const EVENT_BATCH_ITEM_FAILED: &str = "batch.item_failed";

/// Run reached a terminal `completed` state.
pub const EVENT_BATCH_COMPLETED: &str = "batch.completed";

/// Run could not proceed and is terminally `failed`.
pub const EVENT_BATCH_FAILED: &str = "batch.failed";

/// Run was cancelled before all items were dispatched.
pub const EVENT_BATCH_CANCELLED: &str = "batch.cancelled";

/// Rollback started for an atomic or explicitly-rolled-back run.
pub const EVENT_BATCH_ROLLBACK_STARTED: &str = "batch.rollback_started";

/// Rollback finished; payload carries reverted/failed counts.
pub const EVENT_BATCH_ROLLBACK_FINISHED: &str = "batch.rollback_finished";

// ---------------------------------------------------------------------------
// BatchEvent
// ---------------------------------------------------------------------------

/// A batch lifecycle event.
///
/// Constructed via [`BatchEvent::new`] and enriched with
/// [`with_payload`](BatchEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvent {
    /// Dot-separated event name, e.g. `"batch.progress"`.
    pub event_type: String,

    /// The run this event belongs to.
    pub operation_id: Uuid,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl BatchEvent {
    /// Create a new event with an empty payload.
    pub fn new(event_type: impl Into<String>, operation_id: Uuid) -> Self {
        Self {
            event_type: event_type.into(),
            operation_id,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`BatchEvent`].
pub struct EventBus {
    sender: broadcast::Sender<BatchEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: BatchEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let op = Uuid::now_v7();

        let event = BatchEvent::new(EVENT_BATCH_PROGRESS, op)
            .with_payload(serde_json::json!({"current": 3, "total": 10}));

        bus.publish(event);

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, EVENT_BATCH_PROGRESS);
        assert_eq!(received.operation_id, op);
        assert_eq!(received.payload["current"], 3);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let op = Uuid::now_v7();

        bus.publish(BatchEvent::new(EVENT_BATCH_COMPLETED, op));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");

        assert_eq!(e1.event_type, EVENT_BATCH_COMPLETED);
        assert_eq!(e2.operation_id, op);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        // No subscribers — this must not panic.
        bus.publish(BatchEvent::new(EVENT_BATCH_QUEUED, Uuid::now_v7()));
    }

    #[test]
    fn default_event_has_empty_payload() {
        let event = BatchEvent::new(EVENT_BATCH_FAILED, Uuid::now_v7());
        assert!(event.payload.is_object());
        assert_eq!(event.payload.as_object().unwrap().len(), 0);
    }
}
