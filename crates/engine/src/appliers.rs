//! Concrete [`ItemApplier`]s, one per operation type.
//!
//! Each applier owns the single-item collaborator calls for its operation
//! and knows how to undo them from a snapshot entry. Policy, retries, and
//! timeouts all live in the executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use squadops_core::requests::{WorkoutSession, WorkoutTemplate, WorkoutUpdate};
use squadops_core::snapshot::AffectedItem;

use crate::applier::{Applied, ItemApplier, ItemReverter};
use crate::collaborators::{NotificationSink, WorkoutStore};
use crate::error::{CollabError, CollabResult};

const ENTITY_TEMPLATE: &str = "workout_template";
const ENTITY_SESSION: &str = "workout_session";

fn template_json(template: &WorkoutTemplate) -> Value {
    serde_json::to_value(template).unwrap_or(Value::Null)
}

fn template_from_state(state: &Value) -> CollabResult<WorkoutTemplate> {
    serde_json::from_value(state.clone())
        .map_err(|e| CollabError::permanent(format!("Corrupt snapshot state: {e}")))
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

pub struct CreateApplier {
    store: Arc<dyn WorkoutStore>,
}

impl CreateApplier {
    pub fn new(store: Arc<dyn WorkoutStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ItemReverter for CreateApplier {
    async fn revert(&self, item: &AffectedItem) -> CollabResult<()> {
        // The create never committed; nothing to undo.
        if item.new_state.is_none() {
            return Ok(());
        }
        if self.store.get_template(&item.item_id).await?.is_none() {
            return Ok(());
        }
        self.store.delete_template(&item.item_id, false).await?;
        Ok(())
    }
}

#[async_trait]
impl ItemApplier for CreateApplier {
    type Data = WorkoutTemplate;
    type Output = WorkoutTemplate;

    fn entity_type(&self) -> &'static str {
        ENTITY_TEMPLATE
    }

    async fn capture_previous(&self, item_id: &str, _data: &Self::Data) -> CollabResult<Value> {
        Ok(match self.store.get_template(item_id).await? {
            Some(existing) => template_json(&existing),
            None => Value::Null,
        })
    }

    async fn apply(&self, item_id: &str, data: &Self::Data) -> CollabResult<Applied<Self::Output>> {
        if self.store.get_template(item_id).await?.is_some() {
            return Err(CollabError::permanent(format!(
                "Template '{item_id}' already exists"
            )));
        }
        self.store.put_template(data).await?;
        Ok(Applied::with_state(data.clone(), template_json(data)))
    }
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

pub struct UpdateApplier {
    store: Arc<dyn WorkoutStore>,
}

impl UpdateApplier {
    pub fn new(store: Arc<dyn WorkoutStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ItemReverter for UpdateApplier {
    async fn revert(&self, item: &AffectedItem) -> CollabResult<()> {
        if item.new_state.is_none() {
            return Ok(());
        }
        let previous = template_from_state(&item.previous_state)?;
        self.store.put_template(&previous).await
    }
}

#[async_trait]
impl ItemApplier for UpdateApplier {
    type Data = WorkoutUpdate;
    type Output = WorkoutTemplate;

    fn entity_type(&self) -> &'static str {
        ENTITY_TEMPLATE
    }

    async fn capture_previous(&self, item_id: &str, _data: &Self::Data) -> CollabResult<Value> {
        Ok(match self.store.get_template(item_id).await? {
            Some(existing) => template_json(&existing),
            None => Value::Null,
        })
    }

    async fn apply(&self, item_id: &str, data: &Self::Data) -> CollabResult<Applied<Self::Output>> {
        let updated = self
            .store
            .apply_template_changes(item_id, &data.changes)
            .await?;
        let state = template_json(&updated);
        Ok(Applied::with_state(updated, state))
    }
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

pub struct DeleteApplier {
    store: Arc<dyn WorkoutStore>,
    cascade: bool,
    cascaded_sessions: AtomicUsize,
}

impl DeleteApplier {
    pub fn new(store: Arc<dyn WorkoutStore>, cascade: bool) -> Self {
        Self {
            store,
            cascade,
            cascaded_sessions: AtomicUsize::new(0),
        }
    }

    /// Total sessions removed by cascaded deletes across the run.
    pub fn cascaded_sessions(&self) -> usize {
        self.cascaded_sessions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ItemReverter for DeleteApplier {
    /// Restores the template record. Cascaded sessions are gone for good;
    /// the rollback report is the caller's cue to rebuild them.
    async fn revert(&self, item: &AffectedItem) -> CollabResult<()> {
        if item.new_state.is_none() {
            return Ok(());
        }
        let previous = template_from_state(&item.previous_state)?;
        self.store.put_template(&previous).await
    }
}

#[async_trait]
impl ItemApplier for DeleteApplier {
    type Data = String;
    type Output = String;

    fn entity_type(&self) -> &'static str {
        ENTITY_TEMPLATE
    }

    async fn capture_previous(&self, item_id: &str, _data: &Self::Data) -> CollabResult<Value> {
        Ok(match self.store.get_template(item_id).await? {
            Some(existing) => template_json(&existing),
            None => Value::Null,
        })
    }

    async fn apply(&self, item_id: &str, _data: &Self::Data) -> CollabResult<Applied<Self::Output>> {
        let outcome = self.store.delete_template(item_id, self.cascade).await?;
        self.cascaded_sessions
            .fetch_add(outcome.sessions_deleted, Ordering::Relaxed);
        Ok(Applied::with_state(
            item_id.to_string(),
            serde_json::json!({ "deleted": true, "cascaded_sessions": outcome.sessions_deleted }),
        ))
    }
}

// ---------------------------------------------------------------------------
// Assign / schedule
// ---------------------------------------------------------------------------

/// Creates the sessions planned by the distributor. Shared by assign and
/// schedule runs; the only difference between the two is how many sessions
/// the planner emitted.
pub struct SessionApplier {
    store: Arc<dyn WorkoutStore>,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl SessionApplier {
    pub fn new(store: Arc<dyn WorkoutStore>, notifier: Option<Arc<dyn NotificationSink>>) -> Self {
        Self { store, notifier }
    }
}

#[async_trait]
impl ItemReverter for SessionApplier {
    async fn revert(&self, item: &AffectedItem) -> CollabResult<()> {
        if item.new_state.is_none() {
            return Ok(());
        }
        self.store.delete_session(&item.item_id).await
    }
}

#[async_trait]
impl ItemApplier for SessionApplier {
    type Data = WorkoutSession;
    type Output = WorkoutSession;

    fn entity_type(&self) -> &'static str {
        ENTITY_SESSION
    }

    async fn capture_previous(&self, _item_id: &str, _data: &Self::Data) -> CollabResult<Value> {
        // Sessions are always freshly created.
        Ok(Value::Null)
    }

    async fn apply(&self, _item_id: &str, data: &Self::Data) -> CollabResult<Applied<Self::Output>> {
        self.store.create_session(data).await?;
        if let Some(notifier) = &self.notifier {
            // Notification delivery is best-effort; the session stands.
            if let Err(e) = notifier.notify_assignment(data).await {
                warn!(session_id = %data.id, error = %e.message, "Assignment notification failed");
            }
        }
        let state = serde_json::to_value(data).unwrap_or(Value::Null);
        Ok(Applied::with_state(data.clone(), state))
    }
}

// ---------------------------------------------------------------------------
// Duplicate
// ---------------------------------------------------------------------------

pub struct DuplicateApplier {
    store: Arc<dyn WorkoutStore>,
    name_suffix: String,
}

impl DuplicateApplier {
    pub fn new(store: Arc<dyn WorkoutStore>, name_suffix: String) -> Self {
        Self { store, name_suffix }
    }
}

#[async_trait]
impl ItemReverter for DuplicateApplier {
    /// Deletes the copy, whose id lives in the snapshot's `new_state`.
    async fn revert(&self, item: &AffectedItem) -> CollabResult<()> {
        let Some(new_state) = &item.new_state else {
            return Ok(());
        };
        let copy = template_from_state(new_state)?;
        if self.store.get_template(&copy.id).await?.is_none() {
            return Ok(());
        }
        self.store.delete_template(&copy.id, false).await?;
        Ok(())
    }
}

#[async_trait]
impl ItemApplier for DuplicateApplier {
    type Data = String;
    type Output = WorkoutTemplate;

    fn entity_type(&self) -> &'static str {
        ENTITY_TEMPLATE
    }

    async fn capture_previous(&self, _item_id: &str, _data: &Self::Data) -> CollabResult<Value> {
        // The copy is a fresh entity; the source is never touched.
        Ok(Value::Null)
    }

    async fn apply(&self, item_id: &str, _data: &Self::Data) -> CollabResult<Applied<Self::Output>> {
        let source = self
            .store
            .get_template(item_id)
            .await?
            .ok_or_else(|| CollabError::permanent(format!("Template '{item_id}' not found")))?;
        let copy = WorkoutTemplate {
            id: Uuid::now_v7().to_string(),
            name: format!("{}{}", source.name, self.name_suffix),
            ..source
        };
        self.store.put_template(&copy).await?;
        let state = template_json(&copy);
        Ok(Applied::with_state(copy, state))
    }
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

pub struct ImportApplier {
    store: Arc<dyn WorkoutStore>,
    update_existing: bool,
}

impl ImportApplier {
    pub fn new(store: Arc<dyn WorkoutStore>, update_existing: bool) -> Self {
        Self {
            store,
            update_existing,
        }
    }
}

#[async_trait]
impl ItemReverter for ImportApplier {
    async fn revert(&self, item: &AffectedItem) -> CollabResult<()> {
        if item.new_state.is_none() {
            return Ok(());
        }
        if item.previous_state.is_null() {
            // Imported as a new template.
            if self.store.get_template(&item.item_id).await?.is_some() {
                self.store.delete_template(&item.item_id, false).await?;
            }
            return Ok(());
        }
        let previous = template_from_state(&item.previous_state)?;
        self.store.put_template(&previous).await
    }
}

#[async_trait]
impl ItemApplier for ImportApplier {
    type Data = WorkoutTemplate;
    type Output = WorkoutTemplate;

    fn entity_type(&self) -> &'static str {
        ENTITY_TEMPLATE
    }

    async fn capture_previous(&self, item_id: &str, _data: &Self::Data) -> CollabResult<Value> {
        Ok(match self.store.get_template(item_id).await? {
            Some(existing) => template_json(&existing),
            None => Value::Null,
        })
    }

    async fn apply(&self, item_id: &str, data: &Self::Data) -> CollabResult<Applied<Self::Output>> {
        if !self.update_existing && self.store.get_template(item_id).await?.is_some() {
            return Err(CollabError::permanent(format!(
                "Template '{item_id}' already exists; re-run with update_existing to overwrite"
            )));
        }
        self.store.put_template(data).await?;
        Ok(Applied::with_state(data.clone(), template_json(data)))
    }
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Read-only applier: fetches each requested template and collects it for
/// the format adapter. The success bucket carries the exported ids.
pub struct ExportApplier {
    store: Arc<dyn WorkoutStore>,
    collected: Mutex<Vec<WorkoutTemplate>>,
}

impl ExportApplier {
    pub fn new(store: Arc<dyn WorkoutStore>) -> Self {
        Self {
            store,
            collected: Mutex::new(Vec::new()),
        }
    }

    /// Fetched templates, reordered to match the requested id order.
    pub fn collected(&self, id_order: &[String]) -> Vec<WorkoutTemplate> {
        let mut collected = match self.collected.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        collected.sort_by_key(|t| id_order.iter().position(|id| *id == t.id));
        collected
    }
}

#[async_trait]
impl ItemReverter for ExportApplier {
    async fn revert(&self, _item: &AffectedItem) -> CollabResult<()> {
        // Read-only; nothing to undo.
        Ok(())
    }
}

#[async_trait]
impl ItemApplier for ExportApplier {
    type Data = String;
    type Output = String;

    fn entity_type(&self) -> &'static str {
        ENTITY_TEMPLATE
    }

    async fn capture_previous(&self, _item_id: &str, _data: &Self::Data) -> CollabResult<Value> {
        Ok(Value::Null)
    }

    async fn apply(&self, item_id: &str, _data: &Self::Data) -> CollabResult<Applied<Self::Output>> {
        let template = self
            .store
            .get_template(item_id)
            .await?
            .ok_or_else(|| CollabError::permanent(format!("Template '{item_id}' not found")))?;
        match self.collected.lock() {
            Ok(mut collected) => collected.push(template),
            Err(poisoned) => poisoned.into_inner().push(template),
        }
        Ok(Applied::new(item_id.to_string()))
    }
}
