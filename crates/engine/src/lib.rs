//! Async batch-operation engine for workout templates and sessions.
//!
//! The [`BatchOrchestrator`] is the entry point: construct it with the
//! collaborator implementations of the embedding product, then call one
//! `run_*` method per batch request. Execution semantics (chunking,
//! retries, timeouts, snapshots, rollback, cancellation) live in the
//! generic [`executor`]; the pure planning and validation logic lives in
//! `squadops-core`.

pub mod applier;
pub mod appliers;
pub mod collaborators;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod progress;
pub mod snapshot;

pub use collaborators::JsonFormatAdapter;
pub use error::{CollabError, CollabResult, EngineError};
pub use orchestrator::BatchOrchestrator;
pub use progress::ProgressTracker;
pub use snapshot::{run_snapshot_retention, RollbackReport, SnapshotManager};
