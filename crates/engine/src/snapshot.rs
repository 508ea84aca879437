//! Snapshot store, rollback driver, and the snapshot retention sweep.
//!
//! Snapshots live in memory for the lifetime of the process, bounded by the
//! retention sweep. Capture is lazy: an operation gets an entry only once
//! its first snapshot-worthy item is about to mutate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use squadops_core::options::RetryPolicy;
use squadops_core::snapshot::{
    items_to_revert, AffectedItem, BatchOperationSnapshot, BatchRollbackRequest,
};
use squadops_core::types::ItemStatus;
use squadops_events::bus::EVENT_BATCH_ROLLBACK_FINISHED;
use squadops_events::{BatchEvent, EventBus};

use crate::applier::ItemReverter;
use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// How long finished-run snapshots are kept for audit/rollback, in hours.
pub const DEFAULT_SNAPSHOT_RETENTION_HOURS: i64 = 24;

/// How often the retention sweep runs.
pub const SNAPSHOT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

// ---------------------------------------------------------------------------
// Rollback report
// ---------------------------------------------------------------------------

/// One item whose revert did not succeed. The entity is left in its
/// post-apply state; the caller must reconcile by hand.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RollbackFailure {
    pub item_id: String,
    pub error: String,
}

/// Outcome of one rollback pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RollbackReport {
    pub operation_id: Uuid,
    /// Item ids reverted to their snapshotted state, in revert order.
    pub reverted: Vec<String>,
    pub failures: Vec<RollbackFailure>,
}

impl RollbackReport {
    pub fn fully_reverted(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owns captured snapshots and executes rollback passes against them.
pub struct SnapshotManager {
    snapshots: RwLock<HashMap<Uuid, BatchOperationSnapshot>>,
    bus: Arc<EventBus>,
}

impl SnapshotManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Record an item's pre-mutation state, creating the operation's
    /// snapshot on first use. A second capture for the same item is a no-op:
    /// the first observed state is the one rollback restores.
    pub async fn record_before(
        &self,
        operation_id: Uuid,
        item_id: &str,
        entity_type: &str,
        previous_state: serde_json::Value,
    ) {
        let mut snapshots = self.snapshots.write().await;
        let snapshot = snapshots
            .entry(operation_id)
            .or_insert_with(|| BatchOperationSnapshot::new(operation_id));
        if snapshot.item(item_id).is_some() {
            return;
        }
        snapshot.affected_items.push(AffectedItem {
            item_id: item_id.to_string(),
            entity_type: entity_type.to_string(),
            previous_state,
            new_state: None,
        });
    }

    /// Attach the post-mutation state to an item captured earlier.
    pub async fn record_after(
        &self,
        operation_id: Uuid,
        item_id: &str,
        new_state: serde_json::Value,
    ) {
        let mut snapshots = self.snapshots.write().await;
        if let Some(snapshot) = snapshots.get_mut(&operation_id) {
            if let Some(item) = snapshot
                .affected_items
                .iter_mut()
                .find(|i| i.item_id == item_id)
            {
                item.new_state = Some(new_state);
            }
        }
    }

    pub async fn get(&self, operation_id: Uuid) -> Option<BatchOperationSnapshot> {
        self.snapshots.read().await.get(&operation_id).cloned()
    }

    pub async fn discard(&self, operation_id: Uuid) {
        self.snapshots.write().await.remove(&operation_id);
    }

    /// Drop snapshots captured before `cutoff`. Returns the number removed.
    pub async fn purge_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> usize {
        let mut snapshots = self.snapshots.write().await;
        let before = snapshots.len();
        snapshots.retain(|_, s| s.timestamp >= cutoff);
        before - snapshots.len()
    }

    /// Revert the items a rollback request selects, in reverse capture order
    /// so dependent mutations unwind before the state they built on.
    ///
    /// Each revert gets the same timeout/retry treatment as a forward apply.
    /// Failures are collected, never fatal: the report says exactly which
    /// entities remain un-reverted.
    pub async fn rollback(
        &self,
        request: &BatchRollbackRequest,
        statuses: &[(String, ItemStatus)],
        reverter: &dyn ItemReverter,
        retry: &RetryPolicy,
        call_timeout_ms: u64,
    ) -> Result<RollbackReport, EngineError> {
        let snapshot = self
            .get(request.operation_id)
            .await
            .ok_or(EngineError::SnapshotNotFound(request.operation_id))?;

        let mut selected = items_to_revert(&snapshot, statuses, request);
        selected.reverse();

        info!(
            operation_id = %request.operation_id,
            items = selected.len(),
            partial = request.partial,
            "Rolling back batch operation"
        );

        let mut report = RollbackReport {
            operation_id: request.operation_id,
            reverted: Vec::new(),
            failures: Vec::new(),
        };

        for item in selected {
            match revert_with_retry(reverter, item, retry, call_timeout_ms).await {
                Ok(()) => {
                    debug!(item_id = %item.item_id, "Reverted item");
                    report.reverted.push(item.item_id.clone());
                }
                Err(message) => {
                    warn!(item_id = %item.item_id, error = %message, "Revert failed");
                    report.failures.push(RollbackFailure {
                        item_id: item.item_id.clone(),
                        error: message,
                    });
                }
            }
        }

        self.bus.publish(
            BatchEvent::new(EVENT_BATCH_ROLLBACK_FINISHED, request.operation_id).with_payload(
                json!({
                    "reverted": report.reverted.len(),
                    "failed": report.failures.len(),
                }),
            ),
        );

        Ok(report)
    }
}

/// Revert one item under the run's timeout and retry policy.
async fn revert_with_retry(
    reverter: &dyn ItemReverter,
    item: &AffectedItem,
    retry: &RetryPolicy,
    call_timeout_ms: u64,
) -> Result<(), String> {
    let timeout = Duration::from_millis(call_timeout_ms);
    let mut attempt = 0u32;
    loop {
        let (message, retryable) = match tokio::time::timeout(timeout, reverter.revert(item)).await
        {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => (e.message, e.retryable),
            Err(_) => (format!("Revert timed out after {call_timeout_ms}ms"), true),
        };
        if attempt < retry.max_retries && retry.is_retryable(&message, retryable) {
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(retry.retry_delay_ms)).await;
            continue;
        }
        return Err(message);
    }
}

// ---------------------------------------------------------------------------
// Retention sweep
// ---------------------------------------------------------------------------

/// Background loop that discards snapshots past their retention window.
/// Runs until the token is cancelled.
pub async fn run_snapshot_retention(
    manager: Arc<SnapshotManager>,
    retention_hours: i64,
    cancel: CancellationToken,
) {
    info!(retention_hours, "Snapshot retention sweep started");
    let mut ticker = tokio::time::interval(SNAPSHOT_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Snapshot retention sweep stopped");
                return;
            }
            _ = ticker.tick() => {
                let cutoff = chrono::Utc::now() - chrono::Duration::hours(retention_hours);
                let purged = manager.purge_older_than(cutoff).await;
                if purged > 0 {
                    info!(purged, "Purged expired snapshots");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
