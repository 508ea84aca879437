//! Run-level status state machine and live progress bookkeeping.
//!
//! [`BatchOperationProgress`] is single-writer (the owning run) and
//! multi-reader (status pollers); the engine's tracker hands out clones for
//! reads and is the only mutator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::{BatchOperationError, BatchOperationType};

// ---------------------------------------------------------------------------
// Run status state machine
// ---------------------------------------------------------------------------

/// Lifecycle of one batch run.
///
/// `Validating -> Queued -> Processing -> {Completed | Failed | Cancelled}`,
/// with `RollingBack` between `Processing` and a terminal state for atomic
/// failures. Terminal states are final; a new request always gets a new
/// operation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Validating,
    Queued,
    Processing,
    RollingBack,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Returns the set of valid target statuses reachable from `self`.
    ///
    /// Terminal states return an empty slice.
    pub fn valid_transitions(self) -> &'static [RunStatus] {
        match self {
            Self::Validating => &[Self::Queued, Self::Failed],
            Self::Queued => &[Self::Processing, Self::Cancelled],
            Self::Processing => &[
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
                Self::RollingBack,
            ],
            Self::RollingBack => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition(self, to: RunStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// A run is cancellable only while queued or processing. Once a rollback
    /// starts, cancellation would race it and is refused.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Live progress record for one running batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOperationProgress {
    pub operation_id: Uuid,
    pub operation_type: BatchOperationType,
    pub status: RunStatus,
    pub current: usize,
    pub total: usize,
    /// `round(current / total * 100)`; 0 for an empty run.
    pub percentage: u8,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_ms: Option<u64>,
    /// Item currently being processed, when one is in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
    pub errors: Vec<BatchOperationError>,
    pub cancellable: bool,
}

impl BatchOperationProgress {
    /// Fresh record in `Queued` state.
    pub fn new(operation_id: Uuid, operation_type: BatchOperationType, total: usize) -> Self {
        Self {
            operation_id,
            operation_type,
            status: RunStatus::Queued,
            current: 0,
            total,
            percentage: 0,
            start_time: Utc::now(),
            estimated_time_remaining_ms: None,
            current_item: None,
            errors: Vec::new(),
            cancellable: RunStatus::Queued.is_cancellable(),
        }
    }

    /// Advance the run status, enforcing the state machine. Terminal
    /// statuses freeze the record (`cancellable` drops to false).
    pub fn transition(&mut self, to: RunStatus) -> Result<(), CoreError> {
        if !self.status.can_transition(to) {
            return Err(CoreError::Conflict(format!(
                "Invalid run transition: {:?} -> {:?}",
                self.status, to
            )));
        }
        self.status = to;
        self.cancellable = to.is_cancellable();
        if to.is_terminal() {
            self.current_item = None;
            self.estimated_time_remaining_ms = None;
        }
        Ok(())
    }

    /// Record that an item entered processing.
    pub fn item_started(&mut self, item_id: &str) {
        self.current_item = Some(item_id.to_string());
    }

    /// Record a terminal item outcome, advancing `current` and the derived
    /// percentage/ETA. `current` never exceeds `total`.
    pub fn item_finished(&mut self, error: Option<BatchOperationError>) {
        if self.current < self.total {
            self.current += 1;
        }
        self.percentage = percentage(self.current, self.total);
        self.estimated_time_remaining_ms = self.estimate_remaining_ms(Utc::now());
        if let Some(e) = error {
            self.errors.push(e);
        }
        if self.current == self.total {
            self.current_item = None;
        }
    }

    /// Linear projection from throughput so far; `None` until the first
    /// item completes or once the run is done.
    fn estimate_remaining_ms(&self, now: DateTime<Utc>) -> Option<u64> {
        if self.current == 0 || self.current >= self.total {
            return None;
        }
        let elapsed_ms = (now - self.start_time).num_milliseconds().max(0) as u64;
        let per_item = elapsed_ms / self.current as u64;
        Some(per_item * (self.total - self.current) as u64)
    }
}

/// `round(current / total * 100)`, clamped to 0 for an empty denominator.
pub fn percentage(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((current as f64 / total as f64) * 100.0).round() as u8
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(total: usize) -> BatchOperationProgress {
        BatchOperationProgress::new(Uuid::now_v7(), BatchOperationType::Create, total)
    }

    // -- RunStatus state machine ----------------------------------------------

    #[test]
    fn happy_path_transitions() {
        assert!(RunStatus::Validating.can_transition(RunStatus::Queued));
        assert!(RunStatus::Queued.can_transition(RunStatus::Processing));
        assert!(RunStatus::Processing.can_transition(RunStatus::Completed));
    }

    #[test]
    fn rollback_path_transitions() {
        assert!(RunStatus::Processing.can_transition(RunStatus::RollingBack));
        assert!(RunStatus::RollingBack.can_transition(RunStatus::Completed));
        assert!(RunStatus::RollingBack.can_transition(RunStatus::Failed));
    }

    #[test]
    fn terminal_states_are_final() {
        for status in [RunStatus::Completed, RunStatus::Failed, RunStatus::Cancelled] {
            assert!(status.valid_transitions().is_empty());
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn cancellation_only_from_queued_or_processing() {
        assert!(RunStatus::Queued.is_cancellable());
        assert!(RunStatus::Processing.is_cancellable());
        assert!(!RunStatus::RollingBack.is_cancellable());
        assert!(!RunStatus::Completed.is_cancellable());
        assert!(!RunStatus::Validating.is_cancellable());
    }

    #[test]
    fn rolling_back_cannot_be_cancelled_mid_flight() {
        assert!(!RunStatus::RollingBack.can_transition(RunStatus::Cancelled));
    }

    #[test]
    fn queued_cannot_complete_directly() {
        assert!(!RunStatus::Queued.can_transition(RunStatus::Completed));
    }

    // -- percentage -----------------------------------------------------------

    #[test]
    fn percentage_rounds() {
        assert_eq!(percentage(0, 3), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(3, 3), 100);
    }

    #[test]
    fn percentage_of_empty_run_is_zero() {
        assert_eq!(percentage(0, 0), 0);
    }

    // -- progress bookkeeping -------------------------------------------------

    #[test]
    fn progress_tracks_items() {
        let mut p = record(4);
        p.transition(RunStatus::Processing).unwrap();
        p.item_started("a");
        assert_eq!(p.current_item.as_deref(), Some("a"));
        p.item_finished(None);
        assert_eq!(p.current, 1);
        assert_eq!(p.percentage, 25);
        p.item_finished(Some(BatchOperationError {
            item_id: "b".to_string(),
            error: "boom".to_string(),
            data: None,
            retryable: false,
        }));
        assert_eq!(p.current, 2);
        assert_eq!(p.errors.len(), 1);
    }

    #[test]
    fn current_never_exceeds_total() {
        let mut p = record(1);
        p.transition(RunStatus::Processing).unwrap();
        p.item_finished(None);
        p.item_finished(None);
        assert_eq!(p.current, 1);
        assert_eq!(p.percentage, 100);
    }

    #[test]
    fn current_item_cleared_when_done() {
        let mut p = record(1);
        p.transition(RunStatus::Processing).unwrap();
        p.item_started("only");
        p.item_finished(None);
        assert!(p.current_item.is_none());
    }

    #[test]
    fn terminal_transition_freezes_record() {
        let mut p = record(2);
        p.transition(RunStatus::Processing).unwrap();
        p.item_started("a");
        p.transition(RunStatus::Completed).unwrap();
        assert!(!p.cancellable);
        assert!(p.current_item.is_none());
        assert!(p.transition(RunStatus::Processing).is_err());
    }

    #[test]
    fn invalid_transition_rejected() {
        let mut p = record(1);
        assert!(p.transition(RunStatus::Completed).is_err());
    }
}
