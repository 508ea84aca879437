//! Typed request and response payloads for the batch request surface.
//!
//! One request/response pair per operation type, plus the workout domain
//! structs that replace the untyped payloads of the surrounding dashboards.
//! Structural validation here runs before any run is enqueued; failures
//! never reach the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::distribution::{BulkModeConfig, DistributionStrategy, SessionDistributionSummary};
use crate::error::CoreError;
use crate::options::BatchOperationOptions;
use crate::schedule::BatchSchedulePattern;
use crate::types::{validate_batch_size, BatchAssignmentTarget, BatchOperationResult};

// ---------------------------------------------------------------------------
// Domain payloads
// ---------------------------------------------------------------------------

/// A workout template as the engine sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutTemplate {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_mins: Option<i64>,
    /// Free-form template body (exercises, sets, notes) owned by the
    /// dashboard layer; opaque to the engine.
    #[serde(default)]
    pub details: serde_json::Value,
}

/// A generated training session bound to a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSession {
    pub id: String,
    pub template_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub player_ids: Vec<String>,
    #[serde(default)]
    pub team_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment: Option<Vec<String>>,
}

/// Partial update applied to one template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkoutUpdate {
    pub template_id: String,
    /// Sparse field set merged into the stored template.
    pub changes: serde_json::Value,
}

/// Exchange formats for import/export. Payloads are opaque to the engine;
/// a format adapter collaborator owns the (de)serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeFormat {
    Json,
    Csv,
    Excel,
    Pdf,
}

impl ExchangeFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Excel => "excel",
            Self::Pdf => "pdf",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "excel" => Ok(Self::Excel),
            "pdf" => Ok(Self::Pdf),
            other => Err(CoreError::Validation(format!(
                "Unknown exchange format: '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation result
// ---------------------------------------------------------------------------

/// Outcome of structural request validation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl BatchValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
            warnings: Vec::new(),
        }
    }
}

/// Fold a list of checks into a validation result.
fn collect(checks: Vec<Result<(), CoreError>>) -> BatchValidationResult {
    let errors: Vec<String> = checks
        .into_iter()
        .filter_map(|c| c.err().map(|e| e.to_string()))
        .collect();
    if errors.is_empty() {
        BatchValidationResult::ok()
    } else {
        BatchValidationResult::invalid(errors)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCreateWorkoutRequest {
    pub templates: Vec<WorkoutTemplate>,
    #[serde(default)]
    pub options: BatchOperationOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdateWorkoutRequest {
    pub updates: Vec<WorkoutUpdate>,
    #[serde(default)]
    pub options: BatchOperationOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDeleteWorkoutRequest {
    pub template_ids: Vec<String>,
    /// Also delete the sessions generated from each template.
    #[serde(default)]
    pub cascade: bool,
    #[serde(default)]
    pub options: BatchOperationOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAssignWorkoutRequest {
    pub template_id: String,
    pub targets: Vec<BatchAssignmentTarget>,
    pub bulk: BulkModeConfig,
    /// Coaches/trainers running the generated sessions.
    #[serde(default)]
    pub staff_ids: Vec<String>,
    #[serde(default)]
    pub options: BatchOperationOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchScheduleWorkoutRequest {
    pub template_id: String,
    pub targets: Vec<BatchAssignmentTarget>,
    pub pattern: BatchSchedulePattern,
    pub bulk: BulkModeConfig,
    #[serde(default)]
    pub staff_ids: Vec<String>,
    #[serde(default)]
    pub options: BatchOperationOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDuplicateTemplateRequest {
    pub template_ids: Vec<String>,
    /// Appended to each duplicated template's name.
    #[serde(default = "default_name_suffix")]
    pub name_suffix: String,
    #[serde(default)]
    pub options: BatchOperationOptions,
}

fn default_name_suffix() -> String {
    " (copy)".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchImportRequest {
    pub format: ExchangeFormat,
    /// Opaque serialized payload handed to the format adapter.
    pub payload: Vec<u8>,
    /// Update templates whose ids already exist instead of rejecting them.
    #[serde(default)]
    pub update_existing: bool,
    #[serde(default)]
    pub options: BatchOperationOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExportRequest {
    pub template_ids: Vec<String>,
    pub format: ExchangeFormat,
    #[serde(default)]
    pub options: BatchOperationOptions,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct BatchCreateWorkoutResponse {
    pub result: BatchOperationResult<WorkoutTemplate>,
    pub validation: BatchValidationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchUpdateWorkoutResponse {
    pub result: BatchOperationResult<WorkoutTemplate>,
    pub validation: BatchValidationResult,
}

/// Session/record counts removed alongside cascaded template deletes.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CascadedDeletions {
    pub sessions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchDeleteWorkoutResponse {
    pub result: BatchOperationResult<String>,
    pub cascaded_deletions: CascadedDeletions,
    pub validation: BatchValidationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchAssignWorkoutResponse {
    pub result: BatchOperationResult<WorkoutSession>,
    pub summaries: Vec<SessionDistributionSummary>,
    pub warnings: Vec<String>,
    pub validation: BatchValidationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchScheduleWorkoutResponse {
    pub result: BatchOperationResult<WorkoutSession>,
    pub summaries: Vec<SessionDistributionSummary>,
    /// Concrete dates the recurrence pattern expanded into.
    pub dates: Vec<chrono::NaiveDate>,
    pub warnings: Vec<String>,
    pub validation: BatchValidationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchDuplicateTemplateResponse {
    pub result: BatchOperationResult<WorkoutTemplate>,
    pub validation: BatchValidationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchImportResponse {
    pub result: BatchOperationResult<WorkoutTemplate>,
    pub validation: BatchValidationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchExportResponse {
    pub result: BatchOperationResult<String>,
    /// Opaque serialized payload produced by the format adapter.
    pub payload: Vec<u8>,
    pub format: ExchangeFormat,
    pub validation: BatchValidationResult,
}

// ---------------------------------------------------------------------------
// Structural validation
// ---------------------------------------------------------------------------

impl BatchCreateWorkoutRequest {
    pub fn validate(&self) -> BatchValidationResult {
        let mut checks = vec![
            validate_batch_size(self.templates.len()),
            self.options.validate(),
        ];
        for t in &self.templates {
            if t.name.trim().is_empty() {
                checks.push(Err(CoreError::Validation(format!(
                    "Template '{}' has an empty name",
                    t.id
                ))));
            }
        }
        collect(checks)
    }
}

impl BatchUpdateWorkoutRequest {
    pub fn validate(&self) -> BatchValidationResult {
        let mut checks = vec![
            validate_batch_size(self.updates.len()),
            self.options.validate(),
        ];
        for u in &self.updates {
            if !u.changes.is_object() {
                checks.push(Err(CoreError::Validation(format!(
                    "Update for '{}' must carry a JSON object of changes",
                    u.template_id
                ))));
            }
        }
        collect(checks)
    }
}

impl BatchDeleteWorkoutRequest {
    pub fn validate(&self) -> BatchValidationResult {
        collect(vec![
            validate_batch_size(self.template_ids.len()),
            self.options.validate(),
        ])
    }
}

fn validate_bulk(bulk: &BulkModeConfig, targets: &[BatchAssignmentTarget]) -> Vec<Result<(), CoreError>> {
    let mut checks = Vec::new();
    if bulk.number_of_sessions < 1 {
        checks.push(Err(CoreError::Validation(
            "number_of_sessions must be at least 1".to_string(),
        )));
    }
    if targets.is_empty() {
        checks.push(Err(CoreError::Validation(
            "At least one assignment target is required".to_string(),
        )));
    }
    if bulk.strategy == DistributionStrategy::Manual && bulk.session_configurations.is_none() {
        checks.push(Err(CoreError::Validation(
            "Manual distribution requires session_configurations".to_string(),
        )));
    }
    checks
}

impl BatchAssignWorkoutRequest {
    pub fn validate(&self) -> BatchValidationResult {
        let mut checks = validate_bulk(&self.bulk, &self.targets);
        if self.template_id.trim().is_empty() {
            checks.push(Err(CoreError::Validation(
                "template_id must not be empty".to_string(),
            )));
        }
        checks.push(self.options.validate());
        collect(checks)
    }
}

impl BatchScheduleWorkoutRequest {
    pub fn validate(&self) -> BatchValidationResult {
        let mut checks = validate_bulk(&self.bulk, &self.targets);
        if self.template_id.trim().is_empty() {
            checks.push(Err(CoreError::Validation(
                "template_id must not be empty".to_string(),
            )));
        }
        checks.push(self.pattern.validate());
        checks.push(self.options.validate());
        collect(checks)
    }
}

impl BatchDuplicateTemplateRequest {
    pub fn validate(&self) -> BatchValidationResult {
        collect(vec![
            validate_batch_size(self.template_ids.len()),
            self.options.validate(),
        ])
    }
}

impl BatchImportRequest {
    pub fn validate(&self) -> BatchValidationResult {
        let mut checks = vec![self.options.validate()];
        if self.payload.is_empty() {
            checks.push(Err(CoreError::Validation(
                "Import payload must not be empty".to_string(),
            )));
        }
        collect(checks)
    }
}

impl BatchExportRequest {
    pub fn validate(&self) -> BatchValidationResult {
        collect(vec![
            validate_batch_size(self.template_ids.len()),
            self.options.validate(),
        ])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
