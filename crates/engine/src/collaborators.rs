//! Collaborator trait seams.
//!
//! The orchestrator talks to the surrounding product exclusively through
//! these traits. Production wires real services; tests wire in-memory fakes.
//! Every call is fallible and classified retryable/permanent via
//! [`CollabError`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use squadops_core::conflict::ExistingCommitments;
use squadops_core::distribution::ResolvedTarget;
use squadops_core::requests::{ExchangeFormat, WorkoutSession, WorkoutTemplate};
use squadops_core::types::BatchAssignmentTarget;

use crate::error::{CollabError, CollabResult};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// What a cascaded template delete removed alongside the template.
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeOutcome {
    pub sessions_deleted: usize,
}

/// Persistence seam for templates and generated sessions.
#[async_trait]
pub trait WorkoutStore: Send + Sync {
    async fn get_template(&self, id: &str) -> CollabResult<Option<WorkoutTemplate>>;

    /// Insert or replace a template. Used for creation, duplication, import,
    /// and restoring prior state during rollback.
    async fn put_template(&self, template: &WorkoutTemplate) -> CollabResult<()>;

    /// Merge a sparse change set into a stored template, returning the
    /// updated record. Missing template is a permanent error.
    async fn apply_template_changes(
        &self,
        id: &str,
        changes: &serde_json::Value,
    ) -> CollabResult<WorkoutTemplate>;

    /// Delete a template; with `cascade` set, also delete its sessions.
    /// Missing template is a permanent error.
    async fn delete_template(&self, id: &str, cascade: bool) -> CollabResult<CascadeOutcome>;

    async fn create_session(&self, session: &WorkoutSession) -> CollabResult<()>;

    async fn delete_session(&self, id: &str) -> CollabResult<()>;
}

// ---------------------------------------------------------------------------
// Directory / schedule / notifications
// ---------------------------------------------------------------------------

/// Resolves assignment targets to concrete players with team rosters
/// expanded and skill scores attached where the directory has them.
#[async_trait]
pub trait PlayerDirectory: Send + Sync {
    async fn resolve(&self, targets: &[BatchAssignmentTarget])
        -> CollabResult<Vec<ResolvedTarget>>;
}

/// Read-only view of existing bookings inside a planning window.
#[async_trait]
pub trait ScheduleLookup: Send + Sync {
    async fn commitments(
        &self,
        player_ids: &[String],
        staff_ids: &[String],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CollabResult<ExistingCommitments>;
}

/// Outbound notification seam. Delivery failures are logged, never fatal:
/// a created session stands whether or not the player heard about it.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_assignment(&self, session: &WorkoutSession) -> CollabResult<()>;
}

// ---------------------------------------------------------------------------
// Format adapter
// ---------------------------------------------------------------------------

/// (De)serializes template payloads for import/export. Formats beyond the
/// built-in JSON adapter are supplied by the embedding product.
#[async_trait]
pub trait FormatAdapter: Send + Sync {
    fn supports(&self, format: ExchangeFormat) -> bool;

    async fn serialize(
        &self,
        templates: &[WorkoutTemplate],
        format: ExchangeFormat,
    ) -> CollabResult<Vec<u8>>;

    async fn deserialize(
        &self,
        payload: &[u8],
        format: ExchangeFormat,
    ) -> CollabResult<Vec<WorkoutTemplate>>;
}

/// Built-in adapter for [`ExchangeFormat::Json`] payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatAdapter;

#[async_trait]
impl FormatAdapter for JsonFormatAdapter {
    fn supports(&self, format: ExchangeFormat) -> bool {
        format == ExchangeFormat::Json
    }

    async fn serialize(
        &self,
        templates: &[WorkoutTemplate],
        format: ExchangeFormat,
    ) -> CollabResult<Vec<u8>> {
        if format != ExchangeFormat::Json {
            return Err(CollabError::permanent(format!(
                "Format '{}' is not supported by the JSON adapter",
                format.as_str()
            )));
        }
        serde_json::to_vec_pretty(templates)
            .map_err(|e| CollabError::permanent(format!("Serialization failed: {e}")))
    }

    async fn deserialize(
        &self,
        payload: &[u8],
        format: ExchangeFormat,
    ) -> CollabResult<Vec<WorkoutTemplate>> {
        if format != ExchangeFormat::Json {
            return Err(CollabError::permanent(format!(
                "Format '{}' is not supported by the JSON adapter",
                format.as_str()
            )));
        }
        serde_json::from_slice(payload)
            .map_err(|e| CollabError::permanent(format!("Malformed import payload: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
