//! The applier seam between the generic executor and per-operation logic.
//!
//! One applier implementation exists per operation type. The executor owns
//! retries, timeouts, chunking, snapshots, and policy; the applier owns the
//! single-item collaborator calls.

use async_trait::async_trait;

use squadops_core::snapshot::AffectedItem;

use crate::error::CollabResult;

/// Successful outcome of applying one item.
pub struct Applied<T> {
    /// Value placed in the result's `successful` bucket.
    pub value: T,
    /// Post-mutation state recorded into the snapshot, when one is kept.
    pub new_state: Option<serde_json::Value>,
}

impl<T> Applied<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            new_state: None,
        }
    }

    pub fn with_state(value: T, new_state: serde_json::Value) -> Self {
        Self {
            value,
            new_state: Some(new_state),
        }
    }
}

/// Reverts one previously-applied item from its snapshot entry.
///
/// Split from [`ItemApplier`] so the orchestrator can keep a type-erased
/// handle for explicit post-run rollback requests.
#[async_trait]
pub trait ItemReverter: Send + Sync {
    async fn revert(&self, item: &AffectedItem) -> CollabResult<()>;
}

/// Applies one item of a specific operation type.
#[async_trait]
pub trait ItemApplier: ItemReverter {
    /// Item payload type.
    type Data: Clone + Send + Sync + 'static;
    /// Success bucket type.
    type Output: Send + Sync + 'static;

    /// Logical entity type recorded in snapshot entries.
    fn entity_type(&self) -> &'static str;

    /// Fetch the pre-mutation state for the snapshot. Called once per item,
    /// before the first apply attempt, and only when the run's options
    /// require snapshots. `Value::Null` means the entity did not exist.
    async fn capture_previous(
        &self,
        item_id: &str,
        data: &Self::Data,
    ) -> CollabResult<serde_json::Value>;

    /// Perform the item's mutation (or read, for export).
    async fn apply(&self, item_id: &str, data: &Self::Data) -> CollabResult<Applied<Self::Output>>;
}
