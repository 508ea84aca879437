//! Batch operation data contracts and the per-item status state machine.
//!
//! This module lives in `core` (zero internal deps) so it can be used by the
//! engine, any future API layer, and CLI tooling alike. All evaluation is
//! done against data passed in by the caller; nothing here touches a store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Maximum number of items per batch operation.
pub const MAX_BATCH_SIZE: usize = 1_000;

/// Minimum items required for a batch operation.
pub const MIN_BATCH_SIZE: usize = 1;

// ---------------------------------------------------------------------------
// Operation type
// ---------------------------------------------------------------------------

/// Which sub-pipeline a batch request drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperationType {
    Create,
    Update,
    Delete,
    Assign,
    Schedule,
    Duplicate,
    Export,
    Import,
}

impl BatchOperationType {
    /// String representation used in events and stored records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Assign => "assign",
            Self::Schedule => "schedule",
            Self::Duplicate => "duplicate",
            Self::Export => "export",
            Self::Import => "import",
        }
    }

    /// Parse from a string, returning an error for unknown types.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "assign" => Ok(Self::Assign),
            "schedule" => Ok(Self::Schedule),
            "duplicate" => Ok(Self::Duplicate),
            "export" => Ok(Self::Export),
            "import" => Ok(Self::Import),
            other => Err(CoreError::Validation(format!(
                "Unknown operation type: '{other}'"
            ))),
        }
    }

    /// Operation types that generate sessions and therefore run the
    /// distribution planner and conflict detector first.
    pub fn distributes_sessions(self) -> bool {
        matches!(self, Self::Assign | Self::Schedule)
    }
}

// ---------------------------------------------------------------------------
// Item status state machine
// ---------------------------------------------------------------------------

/// Status of a single unit of work inside a batch.
///
/// Transitions are strictly monotonic: `Pending -> Processing ->
/// {Success | Failed}`. An item never regresses to `Pending` once processing
/// starts; retries stay in `Processing` and increment the attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl ItemStatus {
    /// Returns the set of valid target statuses reachable from `self`.
    ///
    /// Terminal statuses return an empty slice.
    pub fn valid_transitions(self) -> &'static [ItemStatus] {
        match self {
            Self::Pending => &[Self::Processing],
            Self::Processing => &[Self::Processing, Self::Success, Self::Failed],
            Self::Success | Self::Failed => &[],
        }
    }

    /// Check whether a transition from `self` to `to` is valid.
    pub fn can_transition(self, to: ItemStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// True once the item has reached a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// One unit of work inside a batch run.
///
/// Owned exclusively by the run that created it; only the executor mutates
/// the status and retry counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperationItem<T> {
    /// Caller-correlatable item id (e.g. a template or session id).
    pub id: String,
    /// Operation payload for this item.
    pub data: T,
    pub status: ItemStatus,
    /// Terminal error message when `status` is `Failed`.
    pub error: Option<String>,
    /// Number of retry attempts consumed (0 on the first attempt).
    pub retry_count: u32,
}

impl<T> BatchOperationItem<T> {
    /// Create a fresh pending item.
    pub fn new(id: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            data,
            status: ItemStatus::Pending,
            error: None,
            retry_count: 0,
        }
    }

    /// Advance the item's status, enforcing the monotonic state machine.
    pub fn transition(&mut self, to: ItemStatus) -> Result<(), CoreError> {
        if self.status.can_transition(to) {
            self.status = to;
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid item transition for '{}': {:?} -> {:?}",
                self.id, self.status, to
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

/// A failure applying one item, correlated 1:1 with the failed item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperationError {
    pub item_id: String,
    pub error: String,
    /// Payload echo for callers that want to rebuild a retry batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Whether re-submitting this item could plausibly succeed.
    pub retryable: bool,
}

/// Immutable summary of a finished batch run.
///
/// `total` counts items that reached a terminal outcome in this run, so
/// `success_count + failure_count == total` holds unconditionally. Under a
/// `stop` policy the undispatched remainder is folded into `failed` with a
/// retryable "skipped" sentinel; under cancellation undispatched items stay
/// pending and are excluded here.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOperationResult<T> {
    pub operation_id: Uuid,
    pub operation_type: BatchOperationType,
    pub successful: Vec<T>,
    pub failed: Vec<BatchOperationError>,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

impl<T> BatchOperationResult<T> {
    /// Assemble a result from the terminal buckets, deriving the counts.
    pub fn from_buckets(
        operation_id: Uuid,
        operation_type: BatchOperationType,
        successful: Vec<T>,
        failed: Vec<BatchOperationError>,
        duration_ms: u64,
    ) -> Self {
        let success_count = successful.len();
        let failure_count = failed.len();
        Self {
            operation_id,
            operation_type,
            successful,
            failed,
            total: success_count + failure_count,
            success_count,
            failure_count,
            duration_ms,
        }
    }

    /// Check the count invariant; used by tests and debug assertions.
    pub fn counts_consistent(&self) -> bool {
        self.success_count == self.successful.len()
            && self.failure_count == self.failed.len()
            && self.success_count + self.failure_count == self.total
    }
}

// ---------------------------------------------------------------------------
// Assignment targets
// ---------------------------------------------------------------------------

/// Kind of schedulable entity a batch assignment points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Player,
    Team,
    Group,
}

/// Reference to a schedulable entity. Referenced, never owned, by
/// assignment and distribution structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAssignmentTarget {
    pub kind: TargetKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl BatchAssignmentTarget {
    pub fn player(id: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Player,
            id: id.into(),
            metadata: None,
        }
    }

    pub fn team(id: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Team,
            id: id.into(),
            metadata: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that a batch item list is within size limits.
pub fn validate_batch_size(len: usize) -> Result<(), CoreError> {
    if len < MIN_BATCH_SIZE {
        return Err(CoreError::Validation(
            "Batch must contain at least one item".to_string(),
        ));
    }
    if len > MAX_BATCH_SIZE {
        return Err(CoreError::Validation(format!(
            "Batch size {len} exceeds maximum of {MAX_BATCH_SIZE} items"
        )));
    }
    Ok(())
}

/// Timestamp helper shared by progress and snapshot records.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- BatchOperationType ---------------------------------------------------

    #[test]
    fn operation_type_round_trips() {
        for op in [
            BatchOperationType::Create,
            BatchOperationType::Update,
            BatchOperationType::Delete,
            BatchOperationType::Assign,
            BatchOperationType::Schedule,
            BatchOperationType::Duplicate,
            BatchOperationType::Export,
            BatchOperationType::Import,
        ] {
            assert_eq!(BatchOperationType::parse(op.as_str()).unwrap(), op);
        }
    }

    #[test]
    fn unknown_operation_type_rejected() {
        assert!(BatchOperationType::parse("archive").is_err());
        assert!(BatchOperationType::parse("").is_err());
    }

    #[test]
    fn only_assign_and_schedule_distribute() {
        assert!(BatchOperationType::Assign.distributes_sessions());
        assert!(BatchOperationType::Schedule.distributes_sessions());
        assert!(!BatchOperationType::Create.distributes_sessions());
        assert!(!BatchOperationType::Export.distributes_sessions());
    }

    // -- ItemStatus state machine ---------------------------------------------

    #[test]
    fn pending_to_processing() {
        assert!(ItemStatus::Pending.can_transition(ItemStatus::Processing));
    }

    #[test]
    fn processing_to_terminal() {
        assert!(ItemStatus::Processing.can_transition(ItemStatus::Success));
        assert!(ItemStatus::Processing.can_transition(ItemStatus::Failed));
    }

    #[test]
    fn retry_stays_in_processing() {
        assert!(ItemStatus::Processing.can_transition(ItemStatus::Processing));
    }

    #[test]
    fn no_regression_to_pending() {
        assert!(!ItemStatus::Processing.can_transition(ItemStatus::Pending));
        assert!(!ItemStatus::Failed.can_transition(ItemStatus::Pending));
    }

    #[test]
    fn terminal_statuses_have_no_transitions() {
        assert!(ItemStatus::Success.valid_transitions().is_empty());
        assert!(ItemStatus::Failed.valid_transitions().is_empty());
    }

    #[test]
    fn pending_cannot_jump_to_success() {
        assert!(!ItemStatus::Pending.can_transition(ItemStatus::Success));
    }

    #[test]
    fn item_transition_enforced() {
        let mut item = BatchOperationItem::new("t1", 7u32);
        assert!(item.transition(ItemStatus::Success).is_err());
        item.transition(ItemStatus::Processing).unwrap();
        item.transition(ItemStatus::Success).unwrap();
        assert!(item.transition(ItemStatus::Processing).is_err());
    }

    // -- BatchOperationResult -------------------------------------------------

    #[test]
    fn result_counts_derived_from_buckets() {
        let result = BatchOperationResult::from_buckets(
            Uuid::now_v7(),
            BatchOperationType::Create,
            vec!["a", "b"],
            vec![BatchOperationError {
                item_id: "c".to_string(),
                error: "boom".to_string(),
                data: None,
                retryable: false,
            }],
            120,
        );
        assert_eq!(result.total, 3);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
        assert!(result.counts_consistent());
    }

    #[test]
    fn empty_result_is_consistent() {
        let result: BatchOperationResult<()> = BatchOperationResult::from_buckets(
            Uuid::now_v7(),
            BatchOperationType::Delete,
            vec![],
            vec![],
            0,
        );
        assert_eq!(result.total, 0);
        assert!(result.counts_consistent());
    }

    // -- validate_batch_size --------------------------------------------------

    #[test]
    fn batch_size_bounds() {
        assert!(validate_batch_size(0).is_err());
        assert!(validate_batch_size(1).is_ok());
        assert!(validate_batch_size(MAX_BATCH_SIZE).is_ok());
        assert!(validate_batch_size(MAX_BATCH_SIZE + 1).is_err());
    }
}
