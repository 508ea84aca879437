#![allow(dead_code)]

//! In-memory collaborator fakes and the shared test harness.
//!
//! The fakes support failure injection (permanent and transient, keyed by
//! entity id) and an optional dispatch gate so tests can hold items
//! mid-flight while they cancel or observe progress.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Semaphore;

use squadops_core::conflict::ExistingCommitments;
use squadops_core::distribution::{PoolPlayer, ResolvedTarget};
use squadops_core::requests::{WorkoutSession, WorkoutTemplate};
use squadops_core::types::{BatchAssignmentTarget, TargetKind};
use squadops_engine::collaborators::{
    CascadeOutcome, NotificationSink, PlayerDirectory, ScheduleLookup, WorkoutStore,
};
use squadops_engine::error::{CollabError, CollabResult};
use squadops_engine::{BatchOrchestrator, JsonFormatAdapter};
use squadops_events::EventBus;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .init();
    });
}

// ---------------------------------------------------------------------------
// Store fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStore {
    templates: Mutex<HashMap<String, WorkoutTemplate>>,
    sessions: Mutex<HashMap<String, WorkoutSession>>,
    /// Ids whose mutations always fail permanently.
    fail_ids: Mutex<HashSet<String>>,
    /// Ids that fail with a retryable error N times before succeeding.
    transient: Mutex<HashMap<String, u32>>,
    /// When set, every template mutation waits for one permit first.
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_template(&self, template: WorkoutTemplate) {
        self.templates
            .lock()
            .unwrap()
            .insert(template.id.clone(), template);
    }

    pub fn seed_session(&self, session: WorkoutSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn fail_permanently(&self, id: &str) {
        self.fail_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_transiently(&self, id: &str, times: u32) {
        self.transient.lock().unwrap().insert(id.to_string(), times);
    }

    /// Gate template mutations behind a semaphore the test feeds.
    pub fn install_gate(&self, initial_permits: usize) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(initial_permits));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn template(&self, id: &str) -> Option<WorkoutTemplate> {
        self.templates.lock().unwrap().get(id).cloned()
    }

    pub fn template_count(&self) -> usize {
        self.templates.lock().unwrap().len()
    }

    pub fn clear_templates(&self) {
        self.templates.lock().unwrap().clear();
    }

    pub fn session(&self, id: &str) -> Option<WorkoutSession> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await;
            if let Ok(permit) = permit {
                permit.forget();
            }
        }
    }

    fn check_failure(&self, id: &str) -> CollabResult<()> {
        if self.fail_ids.lock().unwrap().contains(id) {
            return Err(CollabError::permanent("Simulated store failure"));
        }
        let mut transient = self.transient.lock().unwrap();
        if let Some(remaining) = transient.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CollabError::retryable("Simulated transient failure"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkoutStore for InMemoryStore {
    async fn get_template(&self, id: &str) -> CollabResult<Option<WorkoutTemplate>> {
        Ok(self.templates.lock().unwrap().get(id).cloned())
    }

    async fn put_template(&self, template: &WorkoutTemplate) -> CollabResult<()> {
        self.pass_gate().await;
        self.check_failure(&template.id)?;
        self.templates
            .lock()
            .unwrap()
            .insert(template.id.clone(), template.clone());
        Ok(())
    }

    async fn apply_template_changes(
        &self,
        id: &str,
        changes: &serde_json::Value,
    ) -> CollabResult<WorkoutTemplate> {
        self.pass_gate().await;
        self.check_failure(id)?;
        let mut templates = self.templates.lock().unwrap();
        let existing = templates
            .get(id)
            .ok_or_else(|| CollabError::permanent(format!("Template '{id}' not found")))?;
        let mut value = serde_json::to_value(existing)
            .map_err(|e| CollabError::permanent(e.to_string()))?;
        if let (Some(target), Some(source)) = (value.as_object_mut(), changes.as_object()) {
            for (key, v) in source {
                target.insert(key.clone(), v.clone());
            }
        }
        let updated: WorkoutTemplate =
            serde_json::from_value(value).map_err(|e| CollabError::permanent(e.to_string()))?;
        templates.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete_template(&self, id: &str, cascade: bool) -> CollabResult<CascadeOutcome> {
        self.pass_gate().await;
        self.check_failure(id)?;
        let removed = self.templates.lock().unwrap().remove(id);
        if removed.is_none() {
            return Err(CollabError::permanent(format!("Template '{id}' not found")));
        }
        let mut outcome = CascadeOutcome::default();
        if cascade {
            let mut sessions = self.sessions.lock().unwrap();
            let before = sessions.len();
            sessions.retain(|_, s| s.template_id != id);
            outcome.sessions_deleted = before - sessions.len();
        }
        Ok(outcome)
    }

    async fn create_session(&self, session: &WorkoutSession) -> CollabResult<()> {
        self.check_failure(&session.id)?;
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> CollabResult<()> {
        self.sessions.lock().unwrap().remove(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Directory fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDirectory {
    skills: Mutex<HashMap<String, f64>>,
    teams: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_skill(&self, player_id: &str, skill: f64) {
        self.skills
            .lock()
            .unwrap()
            .insert(player_id.to_string(), skill);
    }

    pub fn seed_team(&self, team_id: &str, roster: &[&str]) {
        self.teams.lock().unwrap().insert(
            team_id.to_string(),
            roster.iter().map(|s| s.to_string()).collect(),
        );
    }

    fn pool_player(&self, id: &str) -> PoolPlayer {
        match self.skills.lock().unwrap().get(id) {
            Some(skill) => PoolPlayer::with_skill(id, *skill),
            None => PoolPlayer::new(id),
        }
    }
}

#[async_trait]
impl PlayerDirectory for FakeDirectory {
    async fn resolve(
        &self,
        targets: &[BatchAssignmentTarget],
    ) -> CollabResult<Vec<ResolvedTarget>> {
        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            match target.kind {
                TargetKind::Player => resolved.push(ResolvedTarget::player(
                    self.pool_player(&target.id),
                )),
                TargetKind::Team | TargetKind::Group => {
                    let roster = self
                        .teams
                        .lock()
                        .unwrap()
                        .get(&target.id)
                        .cloned()
                        .ok_or_else(|| {
                            CollabError::permanent(format!("Team '{}' not found", target.id))
                        })?;
                    resolved.push(ResolvedTarget::team(
                        target.id.clone(),
                        roster.iter().map(|id| self.pool_player(id)).collect(),
                    ));
                }
            }
        }
        Ok(resolved)
    }
}

// ---------------------------------------------------------------------------
// Schedule fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSchedule {
    commitments: Mutex<ExistingCommitments>,
}

impl FakeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_commitments(&self, commitments: ExistingCommitments) {
        *self.commitments.lock().unwrap() = commitments;
    }
}

#[async_trait]
impl ScheduleLookup for FakeSchedule {
    async fn commitments(
        &self,
        _player_ids: &[String],
        _staff_ids: &[String],
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> CollabResult<ExistingCommitments> {
        Ok(self.commitments.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Notifier fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    notified: Mutex<Vec<String>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deliveries(&self) {
        *self.failing.lock().unwrap() = true;
    }

    pub fn notified_sessions(&self) -> Vec<String> {
        self.notified.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify_assignment(&self, session: &WorkoutSession) -> CollabResult<()> {
        if *self.failing.lock().unwrap() {
            return Err(CollabError::retryable("Simulated delivery failure"));
        }
        self.notified.lock().unwrap().push(session.id.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub directory: Arc<FakeDirectory>,
    pub schedule: Arc<FakeSchedule>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Arc<BatchOrchestrator>,
}

pub fn harness() -> Harness {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let directory = Arc::new(FakeDirectory::new());
    let schedule = Arc::new(FakeSchedule::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let orchestrator = Arc::new(
        BatchOrchestrator::new(
            Arc::clone(&store) as Arc<dyn WorkoutStore>,
            Arc::clone(&directory) as Arc<dyn PlayerDirectory>,
            Arc::clone(&schedule) as Arc<dyn ScheduleLookup>,
            Arc::new(JsonFormatAdapter),
            Arc::new(EventBus::default()),
        )
        .with_notifier(Arc::clone(&notifier) as Arc<dyn NotificationSink>),
    );
    Harness {
        store,
        directory,
        schedule,
        notifier,
        orchestrator,
    }
}

pub fn template(id: &str, name: &str) -> WorkoutTemplate {
    WorkoutTemplate {
        id: id.to_string(),
        name: name.to_string(),
        category: Some("conditioning".to_string()),
        duration_mins: Some(60),
        details: json!({"exercises": ["sprints", "ladders"]}),
    }
}
