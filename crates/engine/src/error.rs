//! Engine error types.

use thiserror::Error;
use uuid::Uuid;

use squadops_core::CoreError;

/// Failure reported by an external collaborator for a single call.
///
/// Carries the retry classification decided by the collaborator itself;
/// the executor combines it with the run's [`RetryPolicy`] substring list.
///
/// [`RetryPolicy`]: squadops_core::options::RetryPolicy
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CollabError {
    pub message: String,
    /// Whether re-issuing the same call could plausibly succeed.
    pub retryable: bool,
}

impl CollabError {
    /// A transient failure (timeouts, connection loss, lock contention).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A permanent failure (constraint violations, missing entities).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Shorthand for collaborator call results.
pub type CollabResult<T> = Result<T, CollabError>;

/// Fatal, run-level errors surfaced by the engine.
///
/// Item-level failures never appear here; they land in the failed bucket of
/// the run's `BatchOperationResult` instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Unknown operation: {0}")]
    OperationNotFound(Uuid),

    #[error("Operation {0} is not cancellable in its current state")]
    NotCancellable(Uuid),

    #[error("No snapshot recorded for operation {0}")]
    SnapshotNotFound(Uuid),

    #[error("Unsupported exchange format: {0}")]
    UnsupportedFormat(&'static str),

    /// A collaborator failed before the per-item pipeline started
    /// (target resolution, commitment lookup, payload parsing).
    #[error("Collaborator call failed: {0}")]
    Collaborator(String),
}

impl From<CollabError> for EngineError {
    fn from(e: CollabError) -> Self {
        Self::Collaborator(e.message)
    }
}
