//! Snapshot and rollback value types, plus the pure revert-selection logic.
//!
//! Snapshots are captured lazily, one entry per item, immediately before the
//! first mutating call for that item. The async store and the revert
//! execution live in the engine; the selection matrix here is pure so it can
//! be tested without collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ItemStatus;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Prior/new state pair for one mutated item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedItem {
    pub item_id: String,
    /// Logical entity type, e.g. "workout_template" or "workout_session".
    pub entity_type: String,
    /// Collaborator-reported state before the mutation.
    pub previous_state: serde_json::Value,
    /// State after the mutation succeeded; `None` if it never did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<serde_json::Value>,
}

/// All captured state for one batch run, keyed by operation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperationSnapshot {
    pub operation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub affected_items: Vec<AffectedItem>,
}

impl BatchOperationSnapshot {
    pub fn new(operation_id: Uuid) -> Self {
        Self {
            operation_id,
            timestamp: Utc::now(),
            affected_items: Vec::new(),
        }
    }

    pub fn item(&self, item_id: &str) -> Option<&AffectedItem> {
        self.affected_items.iter().find(|i| i.item_id == item_id)
    }
}

// ---------------------------------------------------------------------------
// Rollback request
// ---------------------------------------------------------------------------

/// Caller request to revert a finished (or failed) batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRollbackRequest {
    pub operation_id: Uuid,
    /// Only revert items whose status is `Failed`.
    #[serde(default)]
    pub partial: bool,
    /// Refuse to revert already-successful items even under a full rollback.
    /// Combined with a full request this is the only way to get a
    /// best-effort partial commit; it is never the default.
    #[serde(default)]
    pub preserve_successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BatchRollbackRequest {
    pub fn full(operation_id: Uuid) -> Self {
        Self {
            operation_id,
            partial: false,
            preserve_successful: false,
            reason: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Revert selection
// ---------------------------------------------------------------------------

/// Decide which snapshotted items a rollback request covers.
///
/// - full request: everything captured;
/// - `partial`: only items that ended `Failed`;
/// - `preserve_successful`: successful items are excluded even from a full
///   request.
///
/// Items with no recorded status (never dispatched) are never selected.
pub fn items_to_revert<'a>(
    snapshot: &'a BatchOperationSnapshot,
    statuses: &[(String, ItemStatus)],
    request: &BatchRollbackRequest,
) -> Vec<&'a AffectedItem> {
    snapshot
        .affected_items
        .iter()
        .filter(|item| {
            let Some((_, status)) = statuses.iter().find(|(id, _)| *id == item.item_id) else {
                return false;
            };
            match status {
                ItemStatus::Pending => false,
                ItemStatus::Processing => !request.partial,
                ItemStatus::Failed => true,
                ItemStatus::Success => !request.partial && !request.preserve_successful,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
