//! In-memory progress tracker, the single writer of run progress records.
//!
//! Readers poll [`ProgressTracker::get`] for a clone of the record; every
//! mutation also publishes a `batch.*` event so dashboards can stream
//! instead of poll.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use squadops_core::progress::{BatchOperationProgress, RunStatus};
use squadops_core::types::{BatchOperationError, BatchOperationType};
use squadops_events::bus::{
    EVENT_BATCH_CANCELLED, EVENT_BATCH_COMPLETED, EVENT_BATCH_FAILED, EVENT_BATCH_ITEM_FAILED,
    EVENT_BATCH_PROGRESS, EVENT_BATCH_QUEUED, EVENT_BATCH_ROLLBACK_STARTED,
};
use squadops_events::{BatchEvent, EventBus};

use crate::error::EngineError;

/// Tracks live progress for every known batch run.
pub struct ProgressTracker {
    runs: RwLock<HashMap<Uuid, BatchOperationProgress>>,
    bus: Arc<EventBus>,
}

impl ProgressTracker {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Register a fresh run in `Queued` state and announce it.
    pub async fn register(
        &self,
        operation_id: Uuid,
        operation_type: BatchOperationType,
        total: usize,
    ) {
        let record = BatchOperationProgress::new(operation_id, operation_type, total);
        self.runs.write().await.insert(operation_id, record);
        self.bus.publish(
            BatchEvent::new(EVENT_BATCH_QUEUED, operation_id).with_payload(json!({
                "operation_type": operation_type.as_str(),
                "total": total,
            })),
        );
    }

    /// Advance the run status, publishing the matching lifecycle event.
    pub async fn transition(&self, operation_id: Uuid, to: RunStatus) -> Result<(), EngineError> {
        {
            let mut runs = self.runs.write().await;
            let record = runs
                .get_mut(&operation_id)
                .ok_or(EngineError::OperationNotFound(operation_id))?;
            record.transition(to)?;
        }
        let event_type = match to {
            RunStatus::Completed => Some(EVENT_BATCH_COMPLETED),
            RunStatus::Failed => Some(EVENT_BATCH_FAILED),
            RunStatus::Cancelled => Some(EVENT_BATCH_CANCELLED),
            RunStatus::RollingBack => Some(EVENT_BATCH_ROLLBACK_STARTED),
            _ => None,
        };
        if let Some(event_type) = event_type {
            self.bus.publish(BatchEvent::new(event_type, operation_id));
        }
        Ok(())
    }

    /// Record that an item entered processing.
    pub async fn item_started(&self, operation_id: Uuid, item_id: &str) {
        if let Some(record) = self.runs.write().await.get_mut(&operation_id) {
            record.item_started(item_id);
        }
    }

    /// Record a terminal item outcome and publish a progress tick (plus an
    /// `item_failed` event when the item failed).
    pub async fn item_finished(&self, operation_id: Uuid, error: Option<BatchOperationError>) {
        let snapshot = {
            let mut runs = self.runs.write().await;
            let Some(record) = runs.get_mut(&operation_id) else {
                return;
            };
            record.item_finished(error.clone());
            (record.current, record.total, record.percentage)
        };
        if let Some(e) = error {
            self.bus.publish(
                BatchEvent::new(EVENT_BATCH_ITEM_FAILED, operation_id).with_payload(json!({
                    "item_id": e.item_id,
                    "error": e.error,
                    "retryable": e.retryable,
                })),
            );
        }
        self.bus.publish(
            BatchEvent::new(EVENT_BATCH_PROGRESS, operation_id).with_payload(json!({
                "current": snapshot.0,
                "total": snapshot.1,
                "percentage": snapshot.2,
            })),
        );
    }

    /// Clone of the current progress record, if the run is known.
    pub async fn get(&self, operation_id: Uuid) -> Option<BatchOperationProgress> {
        self.runs.read().await.get(&operation_id).cloned()
    }

    /// Whether the run may still be cancelled.
    pub async fn is_cancellable(&self, operation_id: Uuid) -> bool {
        self.runs
            .read()
            .await
            .get(&operation_id)
            .is_some_and(|r| r.cancellable)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
