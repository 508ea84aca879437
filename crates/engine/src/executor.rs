//! Generic batch executor.
//!
//! Drives a list of [`BatchOperationItem`]s through an [`ItemApplier`],
//! owning everything item-agnostic: sequential or chunked-parallel dispatch,
//! per-call timeouts, bounded retries, lazy snapshot capture, on-error
//! policy, cooperative cancellation, and progress reporting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use squadops_core::options::{BatchOperationOptions, OnErrorPolicy, RetryPolicy};
use squadops_core::progress::RunStatus;
use squadops_core::snapshot::BatchRollbackRequest;
use squadops_core::types::{
    BatchOperationError, BatchOperationItem, BatchOperationResult, BatchOperationType, ItemStatus,
};

use crate::applier::ItemApplier;
use crate::error::EngineError;
use crate::progress::ProgressTracker;
use crate::snapshot::{RollbackReport, SnapshotManager};

/// Failure message attached to items never dispatched under a `stop` policy.
pub const SKIPPED_ERROR: &str = "Skipped: batch halted after an earlier failure";

/// Failure message attached to applied items reverted by an automatic
/// rollback.
pub const REVERTED_ERROR: &str = "Reverted: batch rolled back after a failure";

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Everything the orchestrator needs after a run finishes.
pub struct ExecutionReport<T> {
    pub result: BatchOperationResult<T>,
    /// Final status of every submitted item, in submission order.
    /// Undispatched items stay `Pending`.
    pub item_statuses: Vec<(String, ItemStatus)>,
    /// Present when an on-error rollback ran.
    pub rollback: Option<RollbackReport>,
    /// True when the run stopped on a cancellation request.
    pub cancelled: bool,
}

/// Terminal outcome of one item, carried back from the per-item task.
struct ItemOutcome<T> {
    item_id: String,
    status: ItemStatus,
    value: Option<T>,
    error: Option<BatchOperationError>,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct BatchExecutor {
    progress: Arc<ProgressTracker>,
    snapshots: Arc<SnapshotManager>,
}

impl BatchExecutor {
    pub fn new(progress: Arc<ProgressTracker>, snapshots: Arc<SnapshotManager>) -> Self {
        Self {
            progress,
            snapshots,
        }
    }

    /// Run a batch to completion (or cancellation).
    ///
    /// The run must already be registered with the progress tracker in
    /// `Queued` state. In-flight items always finish; cancellation and
    /// policy halts only stop further dispatch.
    pub async fn execute<A>(
        &self,
        operation_id: Uuid,
        operation_type: BatchOperationType,
        items: Vec<BatchOperationItem<A::Data>>,
        options: &BatchOperationOptions,
        applier: Arc<A>,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport<A::Output>, EngineError>
    where
        A: ItemApplier + 'static,
        A::Data: serde::Serialize,
    {
        let started = Instant::now();
        let policy = options.effective_on_error();
        let chunk_size = if options.parallel {
            options.chunk_size.max(1)
        } else {
            1
        };

        info!(
            operation_id = %operation_id,
            operation_type = operation_type.as_str(),
            items = items.len(),
            parallel = options.parallel,
            on_error = ?policy,
            "Executing batch operation"
        );

        self.progress
            .transition(operation_id, RunStatus::Processing)
            .await?;

        let mut queue: std::collections::VecDeque<_> = items.into_iter().collect();
        let mut successful: Vec<(String, A::Output)> = Vec::new();
        let mut failed: Vec<BatchOperationError> = Vec::new();
        let mut statuses: Vec<(String, ItemStatus)> = Vec::new();
        let mut cancelled = false;
        let mut halted = false;
        let mut rollback_triggered = false;

        while !queue.is_empty() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let take = chunk_size.min(queue.len());
            let chunk: Vec<_> = queue.drain(..take).collect();

            let outcomes: Vec<ItemOutcome<A::Output>> = if chunk_size == 1 {
                let mut out = Vec::with_capacity(chunk.len());
                for item in chunk {
                    out.push(
                        run_item(
                            Arc::clone(&applier),
                            operation_id,
                            item,
                            options,
                            Arc::clone(&self.progress),
                            Arc::clone(&self.snapshots),
                        )
                        .await,
                    );
                }
                out
            } else {
                let handles: Vec<_> = chunk
                    .into_iter()
                    .map(|item| {
                        tokio::spawn(run_item(
                            Arc::clone(&applier),
                            operation_id,
                            item,
                            options.clone(),
                            Arc::clone(&self.progress),
                            Arc::clone(&self.snapshots),
                        ))
                    })
                    .collect();
                let mut out = Vec::with_capacity(handles.len());
                for joined in futures::future::join_all(handles).await {
                    match joined {
                        Ok(outcome) => out.push(outcome),
                        Err(e) => {
                            return Err(EngineError::Collaborator(format!(
                                "Item task panicked: {e}"
                            )))
                        }
                    }
                }
                out
            };

            let mut chunk_failed = false;
            for outcome in outcomes {
                statuses.push((outcome.item_id.clone(), outcome.status));
                if let Some(value) = outcome.value {
                    successful.push((outcome.item_id, value));
                }
                if let Some(error) = outcome.error {
                    chunk_failed = true;
                    failed.push(error);
                }
            }

            if chunk_failed {
                match policy {
                    OnErrorPolicy::Continue => {}
                    OnErrorPolicy::Stop => {
                        halted = true;
                        break;
                    }
                    OnErrorPolicy::Rollback => {
                        rollback_triggered = true;
                        break;
                    }
                }
            }
        }

        // Undispatched remainder: pending sentinels under `stop`, plain
        // pending under cancellation and rollback.
        for item in &queue {
            statuses.push((item.id.clone(), ItemStatus::Pending));
            if halted {
                failed.push(BatchOperationError {
                    item_id: item.id.clone(),
                    error: SKIPPED_ERROR.to_string(),
                    data: serde_json::to_value(&item.data).ok(),
                    retryable: true,
                });
            }
        }

        let mut rollback = None;
        if rollback_triggered {
            self.progress
                .transition(operation_id, RunStatus::RollingBack)
                .await?;
            let report = self
                .snapshots
                .rollback(
                    &BatchRollbackRequest::full(operation_id),
                    &statuses,
                    &*applier,
                    &options.retry,
                    options.call_timeout_ms,
                )
                .await?;

            // Every applied item is folded into the failed bucket; an item
            // whose revert also failed says so explicitly.
            for (item_id, _) in successful.drain(..) {
                let error = match report.failures.iter().find(|f| f.item_id == item_id) {
                    Some(f) => format!("Applied, but revert failed: {}", f.error),
                    None => REVERTED_ERROR.to_string(),
                };
                failed.push(BatchOperationError {
                    item_id,
                    error,
                    data: None,
                    retryable: true,
                });
            }
            rollback = Some(report);
        }

        let terminal = if cancelled {
            RunStatus::Cancelled
        } else if let Some(report) = &rollback {
            if report.fully_reverted() {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            }
        } else {
            RunStatus::Completed
        };
        self.progress.transition(operation_id, terminal).await?;

        let result = BatchOperationResult::from_buckets(
            operation_id,
            operation_type,
            successful.into_iter().map(|(_, v)| v).collect(),
            failed,
            started.elapsed().as_millis() as u64,
        );
        debug_assert!(result.counts_consistent());

        info!(
            operation_id = %operation_id,
            status = ?terminal,
            success = result.success_count,
            failure = result.failure_count,
            duration_ms = result.duration_ms,
            "Batch operation finished"
        );

        Ok(ExecutionReport {
            result,
            item_statuses: statuses,
            rollback,
            cancelled,
        })
    }
}

// ---------------------------------------------------------------------------
// Per-item pipeline
// ---------------------------------------------------------------------------

/// Drive one item to a terminal status: optional snapshot capture, the
/// apply call under a timeout, and bounded retries for failures the policy
/// classifies retryable.
async fn run_item<A>(
    applier: Arc<A>,
    operation_id: Uuid,
    mut item: BatchOperationItem<A::Data>,
    options: impl std::borrow::Borrow<BatchOperationOptions>,
    progress: Arc<ProgressTracker>,
    snapshots: Arc<SnapshotManager>,
) -> ItemOutcome<A::Output>
where
    A: ItemApplier,
    A::Data: serde::Serialize,
{
    let options = options.borrow();
    let retry: &RetryPolicy = &options.retry;
    let timeout = Duration::from_millis(options.call_timeout_ms);
    let needs_snapshot = options.needs_snapshots();

    item.transition(ItemStatus::Processing).ok();
    progress.item_started(operation_id, &item.id).await;

    let mut captured = !needs_snapshot;
    let failure: (String, bool) = loop {
        let attempt_failure = 'attempt: {
            if !captured {
                match tokio::time::timeout(timeout, applier.capture_previous(&item.id, &item.data))
                    .await
                {
                    Ok(Ok(previous)) => {
                        snapshots
                            .record_before(operation_id, &item.id, applier.entity_type(), previous)
                            .await;
                        captured = true;
                    }
                    Ok(Err(e)) => break 'attempt (e.message, e.retryable),
                    Err(_) => {
                        break 'attempt (
                            format!(
                                "Snapshot capture timed out after {}ms",
                                options.call_timeout_ms
                            ),
                            true,
                        )
                    }
                }
            }

            match tokio::time::timeout(timeout, applier.apply(&item.id, &item.data)).await {
                Ok(Ok(applied)) => {
                    if needs_snapshot {
                        if let Some(new_state) = applied.new_state {
                            snapshots
                                .record_after(operation_id, &item.id, new_state)
                                .await;
                        }
                    }
                    item.transition(ItemStatus::Success).ok();
                    progress.item_finished(operation_id, None).await;
                    return ItemOutcome {
                        item_id: item.id,
                        status: ItemStatus::Success,
                        value: Some(applied.value),
                        error: None,
                    };
                }
                Ok(Err(e)) => break 'attempt (e.message, e.retryable),
                Err(_) => {
                    break 'attempt (
                        format!("Call timed out after {}ms", options.call_timeout_ms),
                        true,
                    )
                }
            }
        };

        let (message, flagged) = attempt_failure;
        if item.retry_count < retry.max_retries && retry.is_retryable(&message, flagged) {
            item.retry_count += 1;
            item.transition(ItemStatus::Processing).ok();
            debug!(
                operation_id = %operation_id,
                item_id = %item.id,
                attempt = item.retry_count,
                error = %message,
                "Retrying item"
            );
            tokio::time::sleep(Duration::from_millis(retry.retry_delay_ms)).await;
            continue;
        }
        break (message, flagged);
    };

    let (message, flagged) = failure;
    warn!(
        operation_id = %operation_id,
        item_id = %item.id,
        retries = item.retry_count,
        error = %message,
        "Item failed"
    );
    item.error = Some(message.clone());
    item.transition(ItemStatus::Failed).ok();
    let error = BatchOperationError {
        item_id: item.id.clone(),
        error: message.clone(),
        data: serde_json::to_value(&item.data).ok(),
        retryable: retry.is_retryable(&message, flagged),
    };
    progress.item_finished(operation_id, Some(error.clone())).await;
    ItemOutcome {
        item_id: item.id,
        status: ItemStatus::Failed,
        value: None,
        error: Some(error),
    }
}
