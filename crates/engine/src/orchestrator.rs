//! Batch orchestrator: the engine's public surface.
//!
//! One `run_*` entry point per operation type, each following the same
//! shape: structural validation, planning (for session-generating runs),
//! conflict detection, then the generic executor with the operation's
//! applier. Runs execute to completion within the call; concurrent
//! observers use the event bus plus [`BatchOrchestrator::progress`] and
//! [`BatchOrchestrator::cancel`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use squadops_core::conflict::{self, ExistingCommitments, DEFAULT_SESSION_DURATION_MINS};
use squadops_core::distribution::{plan, SessionDistributionSummary};
use squadops_core::options::{BatchOperationOptions, RetryPolicy};
use squadops_core::progress::BatchOperationProgress;
use squadops_core::requests::{
    BatchAssignWorkoutRequest, BatchAssignWorkoutResponse, BatchCreateWorkoutRequest,
    BatchCreateWorkoutResponse, BatchDeleteWorkoutRequest, BatchDeleteWorkoutResponse,
    BatchDuplicateTemplateRequest, BatchDuplicateTemplateResponse, BatchExportRequest,
    BatchExportResponse, BatchImportRequest, BatchImportResponse, BatchScheduleWorkoutRequest,
    BatchScheduleWorkoutResponse, BatchUpdateWorkoutRequest, BatchUpdateWorkoutResponse,
    BatchValidationResult, CascadedDeletions, WorkoutSession,
};
use squadops_core::snapshot::BatchRollbackRequest;
use squadops_core::types::{
    validate_batch_size, BatchOperationItem, BatchOperationResult, BatchOperationType, ItemStatus,
};
use squadops_core::CoreError;
use squadops_events::{BatchEvent, EventBus};

use crate::applier::{ItemApplier, ItemReverter};
use crate::appliers::{
    CreateApplier, DeleteApplier, DuplicateApplier, ExportApplier, ImportApplier, SessionApplier,
    UpdateApplier,
};
use crate::collaborators::{
    FormatAdapter, NotificationSink, PlayerDirectory, ScheduleLookup, WorkoutStore,
};
use crate::error::EngineError;
use crate::executor::{BatchExecutor, ExecutionReport};
use crate::progress::ProgressTracker;
use crate::snapshot::{RollbackReport, SnapshotManager};

// ---------------------------------------------------------------------------
// Run registry
// ---------------------------------------------------------------------------

/// Everything a post-run rollback request needs from the original run.
struct FinishedRun {
    statuses: Vec<(String, ItemStatus)>,
    reverter: Arc<dyn ItemReverter>,
    retry: RetryPolicy,
    call_timeout_ms: u64,
}

struct RunRecord {
    cancel: CancellationToken,
    finished: Option<FinishedRun>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct BatchOrchestrator {
    store: Arc<dyn WorkoutStore>,
    directory: Arc<dyn PlayerDirectory>,
    schedule: Arc<dyn ScheduleLookup>,
    notifier: Option<Arc<dyn NotificationSink>>,
    formats: Arc<dyn FormatAdapter>,
    bus: Arc<EventBus>,
    progress: Arc<ProgressTracker>,
    snapshots: Arc<SnapshotManager>,
    executor: BatchExecutor,
    runs: RwLock<HashMap<Uuid, RunRecord>>,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn WorkoutStore>,
        directory: Arc<dyn PlayerDirectory>,
        schedule: Arc<dyn ScheduleLookup>,
        formats: Arc<dyn FormatAdapter>,
        bus: Arc<EventBus>,
    ) -> Self {
        let progress = Arc::new(ProgressTracker::new(Arc::clone(&bus)));
        let snapshots = Arc::new(SnapshotManager::new(Arc::clone(&bus)));
        let executor = BatchExecutor::new(Arc::clone(&progress), Arc::clone(&snapshots));
        Self {
            store,
            directory,
            schedule,
            notifier: None,
            formats,
            bus,
            progress,
            snapshots,
            executor,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Attach an outbound notification sink for `notify_players` runs.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Subscribe to the `batch.*` event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BatchEvent> {
        self.bus.subscribe()
    }

    /// Shared snapshot manager, e.g. for wiring the retention sweep.
    pub fn snapshot_manager(&self) -> Arc<SnapshotManager> {
        Arc::clone(&self.snapshots)
    }

    // -- observation / control ----------------------------------------------

    /// Current progress record of a known run.
    pub async fn progress(&self, operation_id: Uuid) -> Option<BatchOperationProgress> {
        self.progress.get(operation_id).await
    }

    /// Request cooperative cancellation of a queued or processing run.
    /// In-flight items finish; undispatched items stay pending.
    pub async fn cancel(&self, operation_id: Uuid) -> Result<(), EngineError> {
        if self.progress.get(operation_id).await.is_none() {
            return Err(EngineError::OperationNotFound(operation_id));
        }
        if !self.progress.is_cancellable(operation_id).await {
            return Err(EngineError::NotCancellable(operation_id));
        }
        let runs = self.runs.read().await;
        let record = runs
            .get(&operation_id)
            .ok_or(EngineError::OperationNotFound(operation_id))?;
        record.cancel.cancel();
        Ok(())
    }

    /// Explicit rollback of a finished run from its retained snapshot.
    pub async fn rollback(
        &self,
        request: BatchRollbackRequest,
    ) -> Result<RollbackReport, EngineError> {
        let operation_id = request.operation_id;
        if let Some(progress) = self.progress.get(operation_id).await {
            if !progress.status.is_terminal() {
                return Err(CoreError::Conflict(format!(
                    "Operation {operation_id} is still running"
                ))
                .into());
            }
        }
        let finished = {
            let runs = self.runs.read().await;
            let record = runs
                .get(&operation_id)
                .ok_or(EngineError::OperationNotFound(operation_id))?;
            let finished = record
                .finished
                .as_ref()
                .ok_or(EngineError::OperationNotFound(operation_id))?;
            (
                finished.statuses.clone(),
                Arc::clone(&finished.reverter),
                finished.retry.clone(),
                finished.call_timeout_ms,
            )
        };
        self.snapshots
            .rollback(&request, &finished.0, &*finished.1, &finished.2, finished.3)
            .await
    }

    // -- operations ----------------------------------------------------------

    pub async fn run_create(
        &self,
        req: BatchCreateWorkoutRequest,
    ) -> Result<BatchCreateWorkoutResponse, EngineError> {
        let operation_id = Uuid::now_v7();
        let validation = req.validate();
        if !validation.valid || req.options.validate_only {
            return Ok(BatchCreateWorkoutResponse {
                result: empty_result(operation_id, BatchOperationType::Create),
                validation,
            });
        }

        let items = req
            .templates
            .into_iter()
            .map(|t| BatchOperationItem::new(t.id.clone(), t))
            .collect();
        let applier = Arc::new(CreateApplier::new(Arc::clone(&self.store)));
        let report = self
            .run_items(
                operation_id,
                BatchOperationType::Create,
                items,
                &req.options,
                applier,
            )
            .await?;
        Ok(BatchCreateWorkoutResponse {
            result: report.result,
            validation,
        })
    }

    pub async fn run_update(
        &self,
        req: BatchUpdateWorkoutRequest,
    ) -> Result<BatchUpdateWorkoutResponse, EngineError> {
        let operation_id = Uuid::now_v7();
        let validation = req.validate();
        if !validation.valid || req.options.validate_only {
            return Ok(BatchUpdateWorkoutResponse {
                result: empty_result(operation_id, BatchOperationType::Update),
                validation,
            });
        }

        let items = req
            .updates
            .into_iter()
            .map(|u| BatchOperationItem::new(u.template_id.clone(), u))
            .collect();
        let applier = Arc::new(UpdateApplier::new(Arc::clone(&self.store)));
        let report = self
            .run_items(
                operation_id,
                BatchOperationType::Update,
                items,
                &req.options,
                applier,
            )
            .await?;
        Ok(BatchUpdateWorkoutResponse {
            result: report.result,
            validation,
        })
    }

    pub async fn run_delete(
        &self,
        req: BatchDeleteWorkoutRequest,
    ) -> Result<BatchDeleteWorkoutResponse, EngineError> {
        let operation_id = Uuid::now_v7();
        let validation = req.validate();
        if !validation.valid || req.options.validate_only {
            return Ok(BatchDeleteWorkoutResponse {
                result: empty_result(operation_id, BatchOperationType::Delete),
                cascaded_deletions: CascadedDeletions::default(),
                validation,
            });
        }

        let items = req
            .template_ids
            .into_iter()
            .map(|id| BatchOperationItem::new(id.clone(), id))
            .collect();
        let applier = Arc::new(DeleteApplier::new(Arc::clone(&self.store), req.cascade));
        let report = self
            .run_items(
                operation_id,
                BatchOperationType::Delete,
                items,
                &req.options,
                Arc::clone(&applier),
            )
            .await?;
        Ok(BatchDeleteWorkoutResponse {
            result: report.result,
            cascaded_deletions: CascadedDeletions {
                sessions: applier.cascaded_sessions(),
            },
            validation,
        })
    }

    pub async fn run_assign(
        &self,
        req: BatchAssignWorkoutRequest,
    ) -> Result<BatchAssignWorkoutResponse, EngineError> {
        let operation_id = Uuid::now_v7();
        let mut validation = req.validate();
        if !validation.valid {
            return Ok(assign_response(operation_id, validation, vec![], vec![]));
        }

        let planned = match self.plan_sessions(&req).await? {
            Ok(planned) => planned,
            Err(message) => {
                validation = BatchValidationResult::invalid(vec![message]);
                return Ok(assign_response(operation_id, validation, vec![], vec![]));
            }
        };
        let PlannedSessions {
            summaries,
            warnings,
            blocked,
        } = planned;

        if req.options.validate_only {
            return Ok(BatchAssignWorkoutResponse {
                result: empty_result(operation_id, BatchOperationType::Assign),
                summaries,
                warnings,
                validation,
            });
        }

        let sessions = sessions_from_summaries(&req.template_id, &summaries, &blocked);
        if let Err(e) = validate_batch_size(sessions.len()) {
            return Ok(assign_response(
                operation_id,
                BatchValidationResult::invalid(vec![e.to_string()]),
                summaries,
                warnings,
            ));
        }

        let items = sessions
            .into_iter()
            .map(|s| BatchOperationItem::new(s.id.clone(), s))
            .collect();
        let applier = Arc::new(SessionApplier::new(
            Arc::clone(&self.store),
            self.notifier
                .as_ref()
                .filter(|_| req.options.notify_players)
                .map(Arc::clone),
        ));
        let report = self
            .run_items(
                operation_id,
                BatchOperationType::Assign,
                items,
                &req.options,
                applier,
            )
            .await?;
        Ok(BatchAssignWorkoutResponse {
            result: report.result,
            summaries,
            warnings,
            validation,
        })
    }

    pub async fn run_schedule(
        &self,
        req: BatchScheduleWorkoutRequest,
    ) -> Result<BatchScheduleWorkoutResponse, EngineError> {
        let operation_id = Uuid::now_v7();
        let mut validation = req.validate();
        if !validation.valid {
            return Ok(schedule_response(
                operation_id,
                validation,
                vec![],
                vec![],
                vec![],
            ));
        }

        let dates = match req.pattern.expand() {
            Ok(dates) => dates,
            Err(e) => {
                validation = BatchValidationResult::invalid(vec![e.to_string()]);
                return Ok(schedule_response(
                    operation_id,
                    validation,
                    vec![],
                    vec![],
                    vec![],
                ));
            }
        };

        let assign_view = BatchAssignWorkoutRequest {
            template_id: req.template_id.clone(),
            targets: req.targets.clone(),
            bulk: req.bulk.clone(),
            staff_ids: req.staff_ids.clone(),
            options: req.options.clone(),
        };
        let planned = match self.plan_sessions(&assign_view).await? {
            Ok(planned) => planned,
            Err(message) => {
                validation = BatchValidationResult::invalid(vec![message]);
                return Ok(schedule_response(
                    operation_id,
                    validation,
                    vec![],
                    dates,
                    vec![],
                ));
            }
        };
        let PlannedSessions {
            summaries,
            warnings,
            blocked,
        } = planned;

        if req.options.validate_only {
            return Ok(BatchScheduleWorkoutResponse {
                result: empty_result(operation_id, BatchOperationType::Schedule),
                summaries,
                dates,
                warnings,
                validation,
            });
        }

        let sessions = expand_over_dates(&req.template_id, &summaries, &blocked, &dates);
        if let Err(e) = validate_batch_size(sessions.len()) {
            return Ok(schedule_response(
                operation_id,
                BatchValidationResult::invalid(vec![e.to_string()]),
                summaries,
                dates,
                warnings,
            ));
        }

        let items = sessions
            .into_iter()
            .map(|s| BatchOperationItem::new(s.id.clone(), s))
            .collect();
        let applier = Arc::new(SessionApplier::new(
            Arc::clone(&self.store),
            self.notifier
                .as_ref()
                .filter(|_| req.options.notify_players)
                .map(Arc::clone),
        ));
        let report = self
            .run_items(
                operation_id,
                BatchOperationType::Schedule,
                items,
                &req.options,
                applier,
            )
            .await?;
        Ok(BatchScheduleWorkoutResponse {
            result: report.result,
            summaries,
            dates,
            warnings,
            validation,
        })
    }

    pub async fn run_duplicate(
        &self,
        req: BatchDuplicateTemplateRequest,
    ) -> Result<BatchDuplicateTemplateResponse, EngineError> {
        let operation_id = Uuid::now_v7();
        let validation = req.validate();
        if !validation.valid || req.options.validate_only {
            return Ok(BatchDuplicateTemplateResponse {
                result: empty_result(operation_id, BatchOperationType::Duplicate),
                validation,
            });
        }

        let items = req
            .template_ids
            .into_iter()
            .map(|id| BatchOperationItem::new(id.clone(), id))
            .collect();
        let applier = Arc::new(DuplicateApplier::new(
            Arc::clone(&self.store),
            req.name_suffix,
        ));
        let report = self
            .run_items(
                operation_id,
                BatchOperationType::Duplicate,
                items,
                &req.options,
                applier,
            )
            .await?;
        Ok(BatchDuplicateTemplateResponse {
            result: report.result,
            validation,
        })
    }

    pub async fn run_import(
        &self,
        req: BatchImportRequest,
    ) -> Result<BatchImportResponse, EngineError> {
        let operation_id = Uuid::now_v7();
        let mut validation = req.validate();
        if !validation.valid {
            return Ok(BatchImportResponse {
                result: empty_result(operation_id, BatchOperationType::Import),
                validation,
            });
        }
        if !self.formats.supports(req.format) {
            return Err(EngineError::UnsupportedFormat(req.format.as_str()));
        }

        let templates = match self.formats.deserialize(&req.payload, req.format).await {
            Ok(templates) => templates,
            Err(e) => {
                validation = BatchValidationResult::invalid(vec![e.message]);
                return Ok(BatchImportResponse {
                    result: empty_result(operation_id, BatchOperationType::Import),
                    validation,
                });
            }
        };
        if let Err(e) = validate_batch_size(templates.len()) {
            return Ok(BatchImportResponse {
                result: empty_result(operation_id, BatchOperationType::Import),
                validation: BatchValidationResult::invalid(vec![e.to_string()]),
            });
        }
        if req.options.validate_only {
            return Ok(BatchImportResponse {
                result: empty_result(operation_id, BatchOperationType::Import),
                validation,
            });
        }

        let items = templates
            .into_iter()
            .map(|t| BatchOperationItem::new(t.id.clone(), t))
            .collect();
        let applier = Arc::new(ImportApplier::new(
            Arc::clone(&self.store),
            req.update_existing,
        ));
        let report = self
            .run_items(
                operation_id,
                BatchOperationType::Import,
                items,
                &req.options,
                applier,
            )
            .await?;
        Ok(BatchImportResponse {
            result: report.result,
            validation,
        })
    }

    pub async fn run_export(
        &self,
        req: BatchExportRequest,
    ) -> Result<BatchExportResponse, EngineError> {
        let operation_id = Uuid::now_v7();
        let validation = req.validate();
        if !validation.valid || req.options.validate_only {
            return Ok(BatchExportResponse {
                result: empty_result(operation_id, BatchOperationType::Export),
                payload: Vec::new(),
                format: req.format,
                validation,
            });
        }
        if !self.formats.supports(req.format) {
            return Err(EngineError::UnsupportedFormat(req.format.as_str()));
        }

        let items = req
            .template_ids
            .iter()
            .map(|id| BatchOperationItem::new(id.clone(), id.clone()))
            .collect();
        let applier = Arc::new(ExportApplier::new(Arc::clone(&self.store)));
        let report = self
            .run_items(
                operation_id,
                BatchOperationType::Export,
                items,
                &req.options,
                Arc::clone(&applier),
            )
            .await?;

        let templates = applier.collected(&req.template_ids);
        let payload = self.formats.serialize(&templates, req.format).await?;
        Ok(BatchExportResponse {
            result: report.result,
            payload,
            format: req.format,
            validation,
        })
    }

    // -- shared plumbing ------------------------------------------------------

    /// Register, execute, and record one run.
    async fn run_items<A>(
        &self,
        operation_id: Uuid,
        operation_type: BatchOperationType,
        items: Vec<BatchOperationItem<A::Data>>,
        options: &BatchOperationOptions,
        applier: Arc<A>,
    ) -> Result<ExecutionReport<A::Output>, EngineError>
    where
        A: ItemApplier + 'static,
        A::Data: serde::Serialize,
    {
        let cancel = CancellationToken::new();
        self.runs.write().await.insert(
            operation_id,
            RunRecord {
                cancel: cancel.clone(),
                finished: None,
            },
        );
        self.progress
            .register(operation_id, operation_type, items.len())
            .await;

        let report = self
            .executor
            .execute(
                operation_id,
                operation_type,
                items,
                options,
                Arc::clone(&applier),
                cancel,
            )
            .await?;

        if let Some(record) = self.runs.write().await.get_mut(&operation_id) {
            record.finished = Some(FinishedRun {
                statuses: report.item_statuses.clone(),
                reverter: applier,
                retry: options.retry.clone(),
                call_timeout_ms: options.call_timeout_ms,
            });
        }
        Ok(report)
    }

    /// Resolve targets, plan buckets, detect conflicts. Returns
    /// `Ok(Err(message))` for planning failures the caller should surface
    /// as a validation error rather than a fatal one.
    async fn plan_sessions(
        &self,
        req: &BatchAssignWorkoutRequest,
    ) -> Result<Result<PlannedSessions, String>, EngineError> {
        let pool = self.directory.resolve(&req.targets).await?;

        let mut config = req.bulk.clone();
        config.allow_player_overlap |= req.options.allow_player_overlap;
        let outcome = match plan(&pool, &config) {
            Ok(outcome) => outcome,
            Err(e) => return Ok(Err(e.to_string())),
        };
        let mut summaries = outcome.summaries;
        let mut warnings = outcome.warnings;

        let commitments = self.load_commitments(&summaries, &req.staff_ids).await?;
        let conflicts = conflict::detect(
            &mut summaries,
            &commitments,
            &req.staff_ids,
            req.options.auto_resolve_conflicts,
        );
        for session in &conflicts.sessions {
            warnings.extend(session.resolved.iter().cloned());
        }
        let blocked: HashSet<usize> = conflicts.blocked_indices().into_iter().collect();
        for index in &blocked {
            warnings.push(format!(
                "Session {index} blocked by unresolved conflicts; it was not created"
            ));
        }

        Ok(Ok(PlannedSessions {
            summaries,
            warnings,
            blocked,
        }))
    }

    /// Fetch existing bookings covering the planned buckets' time window.
    /// Buckets without a start time skip the lookup entirely.
    async fn load_commitments(
        &self,
        summaries: &[SessionDistributionSummary],
        staff_ids: &[String],
    ) -> Result<ExistingCommitments, EngineError> {
        let mut player_ids: Vec<String> = Vec::new();
        for summary in summaries {
            for id in &summary.player_ids {
                if !player_ids.contains(id) {
                    player_ids.push(id.clone());
                }
            }
        }

        let starts: Vec<DateTime<Utc>> = summaries.iter().filter_map(|s| s.start_time).collect();
        let Some(from) = starts.iter().min().copied() else {
            return Ok(ExistingCommitments::default());
        };
        let max_duration = summaries
            .iter()
            .filter_map(|s| s.estimated_duration_mins)
            .max()
            .unwrap_or(DEFAULT_SESSION_DURATION_MINS);
        let to = starts.iter().max().copied().unwrap_or(from) + Duration::minutes(max_duration);

        Ok(self
            .schedule
            .commitments(&player_ids, staff_ids, from, to)
            .await?)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct PlannedSessions {
    summaries: Vec<SessionDistributionSummary>,
    warnings: Vec<String>,
    blocked: HashSet<usize>,
}

fn empty_result<T>(operation_id: Uuid, operation_type: BatchOperationType) -> BatchOperationResult<T> {
    BatchOperationResult::from_buckets(operation_id, operation_type, Vec::new(), Vec::new(), 0)
}

fn assign_response(
    operation_id: Uuid,
    validation: BatchValidationResult,
    summaries: Vec<SessionDistributionSummary>,
    warnings: Vec<String>,
) -> BatchAssignWorkoutResponse {
    BatchAssignWorkoutResponse {
        result: empty_result(operation_id, BatchOperationType::Assign),
        summaries,
        warnings,
        validation,
    }
}

fn schedule_response(
    operation_id: Uuid,
    validation: BatchValidationResult,
    summaries: Vec<SessionDistributionSummary>,
    dates: Vec<NaiveDate>,
    warnings: Vec<String>,
) -> BatchScheduleWorkoutResponse {
    BatchScheduleWorkoutResponse {
        result: empty_result(operation_id, BatchOperationType::Schedule),
        summaries,
        dates,
        warnings,
        validation,
    }
}

/// One concrete session per non-blocked bucket.
fn sessions_from_summaries(
    template_id: &str,
    summaries: &[SessionDistributionSummary],
    blocked: &HashSet<usize>,
) -> Vec<WorkoutSession> {
    summaries
        .iter()
        .filter(|s| !blocked.contains(&s.session_index))
        .map(|s| WorkoutSession {
            id: s.session_id.clone(),
            template_id: template_id.to_string(),
            name: s.session_name.clone(),
            start_time: s.start_time,
            player_ids: s.player_ids.clone(),
            team_ids: s.team_ids.clone(),
            facility: s.facility.clone(),
            equipment: s.equipment.clone(),
        })
        .collect()
}

/// Cross product of buckets and recurrence dates. Each occurrence gets a
/// fresh session id; the bucket's start time contributes the time of day.
fn expand_over_dates(
    template_id: &str,
    summaries: &[SessionDistributionSummary],
    blocked: &HashSet<usize>,
    dates: &[NaiveDate],
) -> Vec<WorkoutSession> {
    let base = sessions_from_summaries(template_id, summaries, blocked);
    let mut sessions = Vec::with_capacity(base.len() * dates.len());
    for date in dates {
        for session in &base {
            sessions.push(WorkoutSession {
                id: Uuid::now_v7().to_string(),
                name: format!("{} {}", session.name, date),
                start_time: session
                    .start_time
                    .map(|t| date.and_time(t.time()).and_utc()),
                ..session.clone()
            });
        }
    }
    sessions
}
