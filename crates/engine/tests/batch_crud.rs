//! Template CRUD batches: create, update, delete, duplicate, and the
//! continue/stop error policies with retries.

mod common;

use assert_matches::assert_matches;
use serde_json::json;

use squadops_core::options::{BatchOperationOptions, OnErrorPolicy, RetryPolicy};
use squadops_core::progress::RunStatus;
use squadops_core::requests::{
    BatchCreateWorkoutRequest, BatchDeleteWorkoutRequest, BatchDuplicateTemplateRequest,
    BatchUpdateWorkoutRequest, WorkoutSession, WorkoutUpdate,
};
use squadops_engine::executor::SKIPPED_ERROR;
use squadops_engine::EngineError;

use common::{harness, template};

fn fast_options() -> BatchOperationOptions {
    BatchOperationOptions {
        retry: RetryPolicy {
            max_retries: 0,
            retry_delay_ms: 1,
            retryable_errors: vec![],
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn create_batch_persists_all_templates() {
    let h = harness();
    let req = BatchCreateWorkoutRequest {
        templates: vec![
            template("t1", "Sprints"),
            template("t2", "Ladders"),
            template("t3", "Core"),
        ],
        options: fast_options(),
    };

    let resp = h.orchestrator.run_create(req).await.unwrap();
    assert!(resp.validation.valid);
    assert_eq!(resp.result.success_count, 3);
    assert_eq!(resp.result.failure_count, 0);
    assert_eq!(resp.result.total, 3);
    assert!(resp.result.counts_consistent());
    assert_eq!(h.store.template_count(), 3);

    let progress = h
        .orchestrator
        .progress(resp.result.operation_id)
        .await
        .unwrap();
    assert_eq!(progress.status, RunStatus::Completed);
    assert_eq!(progress.percentage, 100);
}

#[tokio::test]
async fn continue_policy_isolates_failures() {
    let h = harness();
    h.store.fail_permanently("t2");
    let req = BatchCreateWorkoutRequest {
        templates: vec![
            template("t1", "Sprints"),
            template("t2", "Ladders"),
            template("t3", "Core"),
        ],
        options: fast_options(),
    };

    let resp = h.orchestrator.run_create(req).await.unwrap();
    assert_eq!(resp.result.success_count, 2);
    assert_eq!(resp.result.failure_count, 1);
    assert_eq!(resp.result.failed[0].item_id, "t2");
    assert!(!resp.result.failed[0].retryable);
    // The failed item's payload is echoed for retry batches.
    assert!(resp.result.failed[0].data.is_some());
    assert!(h.store.template("t1").is_some());
    assert!(h.store.template("t2").is_none());
    assert!(h.store.template("t3").is_some());
}

#[tokio::test]
async fn stop_policy_skips_the_remainder() {
    let h = harness();
    h.store.fail_permanently("t2");
    let req = BatchCreateWorkoutRequest {
        templates: vec![
            template("t1", "Sprints"),
            template("t2", "Ladders"),
            template("t3", "Core"),
            template("t4", "Mobility"),
        ],
        options: BatchOperationOptions {
            on_error: OnErrorPolicy::Stop,
            ..fast_options()
        },
    };

    let resp = h.orchestrator.run_create(req).await.unwrap();
    assert_eq!(resp.result.success_count, 1);
    assert_eq!(resp.result.failure_count, 3);
    let skipped: Vec<_> = resp
        .result
        .failed
        .iter()
        .filter(|e| e.error == SKIPPED_ERROR)
        .collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped.iter().all(|e| e.retryable));
    assert_eq!(h.store.template_count(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let h = harness();
    h.store.fail_transiently("t1", 2);
    let req = BatchCreateWorkoutRequest {
        templates: vec![template("t1", "Sprints")],
        options: BatchOperationOptions {
            retry: RetryPolicy {
                max_retries: 3,
                retry_delay_ms: 1,
                retryable_errors: vec![],
            },
            ..Default::default()
        },
    };

    let resp = h.orchestrator.run_create(req).await.unwrap();
    assert_eq!(resp.result.success_count, 1);
    assert!(h.store.template("t1").is_some());
}

#[tokio::test]
async fn retries_exhaust_into_failure() {
    let h = harness();
    h.store.fail_transiently("t1", 5);
    let req = BatchCreateWorkoutRequest {
        templates: vec![template("t1", "Sprints")],
        options: BatchOperationOptions {
            retry: RetryPolicy {
                max_retries: 2,
                retry_delay_ms: 1,
                retryable_errors: vec![],
            },
            ..Default::default()
        },
    };

    let resp = h.orchestrator.run_create(req).await.unwrap();
    assert_eq!(resp.result.failure_count, 1);
    assert!(resp.result.failed[0].retryable);
}

#[tokio::test]
async fn parallel_create_matches_sequential_outcome() {
    let h = harness();
    let templates: Vec<_> = (0..20)
        .map(|i| template(&format!("t{i}"), &format!("Workout {i}")))
        .collect();
    let req = BatchCreateWorkoutRequest {
        templates,
        options: BatchOperationOptions {
            parallel: true,
            chunk_size: 4,
            ..fast_options()
        },
    };

    let resp = h.orchestrator.run_create(req).await.unwrap();
    assert_eq!(resp.result.success_count, 20);
    assert_eq!(h.store.template_count(), 20);
}

#[tokio::test]
async fn update_batch_merges_changes() {
    let h = harness();
    h.store.seed_template(template("t1", "Sprints"));
    let req = BatchUpdateWorkoutRequest {
        updates: vec![WorkoutUpdate {
            template_id: "t1".to_string(),
            changes: json!({"name": "Hill Sprints", "duration_mins": 45}),
        }],
        options: fast_options(),
    };

    let resp = h.orchestrator.run_update(req).await.unwrap();
    assert_eq!(resp.result.success_count, 1);
    let stored = h.store.template("t1").unwrap();
    assert_eq!(stored.name, "Hill Sprints");
    assert_eq!(stored.duration_mins, Some(45));
    // Untouched fields survive the merge.
    assert_eq!(stored.category.as_deref(), Some("conditioning"));
}

#[tokio::test]
async fn update_of_missing_template_fails_permanently() {
    let h = harness();
    let req = BatchUpdateWorkoutRequest {
        updates: vec![WorkoutUpdate {
            template_id: "ghost".to_string(),
            changes: json!({"name": "x"}),
        }],
        options: fast_options(),
    };

    let resp = h.orchestrator.run_update(req).await.unwrap();
    assert_eq!(resp.result.failure_count, 1);
    assert!(!resp.result.failed[0].retryable);
}

#[tokio::test]
async fn cascade_delete_counts_removed_sessions() {
    let h = harness();
    for t in ["t1", "t2", "t3"] {
        h.store.seed_template(template(t, t));
        for i in 0..3 {
            h.store.seed_session(WorkoutSession {
                id: format!("{t}-s{i}"),
                template_id: t.to_string(),
                name: format!("{t} session {i}"),
                start_time: None,
                player_ids: vec![],
                team_ids: vec![],
                facility: None,
                equipment: None,
            });
        }
    }

    let req = BatchDeleteWorkoutRequest {
        template_ids: vec!["t1".to_string(), "t2".to_string(), "t3".to_string()],
        cascade: true,
        options: fast_options(),
    };
    let resp = h.orchestrator.run_delete(req).await.unwrap();
    assert_eq!(resp.result.success_count, 3);
    assert_eq!(resp.cascaded_deletions.sessions, 9);
    assert_eq!(h.store.template_count(), 0);
    assert_eq!(h.store.session_count(), 0);
}

#[tokio::test]
async fn delete_without_cascade_keeps_sessions() {
    let h = harness();
    h.store.seed_template(template("t1", "Sprints"));
    h.store.seed_session(WorkoutSession {
        id: "s1".to_string(),
        template_id: "t1".to_string(),
        name: "Session".to_string(),
        start_time: None,
        player_ids: vec![],
        team_ids: vec![],
        facility: None,
        equipment: None,
    });

    let req = BatchDeleteWorkoutRequest {
        template_ids: vec!["t1".to_string()],
        cascade: false,
        options: fast_options(),
    };
    let resp = h.orchestrator.run_delete(req).await.unwrap();
    assert_eq!(resp.result.success_count, 1);
    assert_eq!(resp.cascaded_deletions.sessions, 0);
    assert_eq!(h.store.session_count(), 1);
}

#[tokio::test]
async fn duplicate_appends_suffix_and_copies_body() {
    let h = harness();
    h.store.seed_template(template("t1", "Sprints"));
    let req = BatchDuplicateTemplateRequest {
        template_ids: vec!["t1".to_string()],
        name_suffix: " (copy)".to_string(),
        options: fast_options(),
    };

    let resp = h.orchestrator.run_duplicate(req).await.unwrap();
    assert_eq!(resp.result.success_count, 1);
    assert_eq!(h.store.template_count(), 2);

    let copy = &resp.result.successful[0];
    assert_ne!(copy.id, "t1");
    assert_eq!(copy.name, "Sprints (copy)");
    assert_eq!(copy.details, template("t1", "Sprints").details);
    assert!(h.store.template(&copy.id).is_some());
}

#[tokio::test]
async fn validate_only_never_mutates() {
    let h = harness();
    let req = BatchCreateWorkoutRequest {
        templates: vec![template("t1", "Sprints")],
        options: BatchOperationOptions {
            validate_only: true,
            ..Default::default()
        },
    };

    let resp = h.orchestrator.run_create(req).await.unwrap();
    assert!(resp.validation.valid);
    assert_eq!(resp.result.total, 0);
    assert_eq!(h.store.template_count(), 0);
}

#[tokio::test]
async fn validate_only_surfaces_the_same_errors_as_a_real_run() {
    let h = harness();
    let bad = BatchCreateWorkoutRequest {
        templates: vec![template("t1", "   ")],
        options: BatchOperationOptions {
            validate_only: true,
            ..Default::default()
        },
    };
    let dry = h.orchestrator.run_create(bad).await.unwrap();

    let wet_req = BatchCreateWorkoutRequest {
        templates: vec![template("t1", "   ")],
        options: Default::default(),
    };
    let wet = h.orchestrator.run_create(wet_req).await.unwrap();

    assert!(!dry.validation.valid);
    assert_eq!(dry.validation.errors, wet.validation.errors);
    assert_eq!(h.store.template_count(), 0);
}

#[tokio::test]
async fn empty_batch_is_rejected_up_front() {
    let h = harness();
    let req = BatchCreateWorkoutRequest {
        templates: vec![],
        options: Default::default(),
    };
    let resp = h.orchestrator.run_create(req).await.unwrap();
    assert!(!resp.validation.valid);
    assert_eq!(resp.result.total, 0);
    // Nothing was enqueued, so the operation id is unknown to the tracker.
    assert!(h
        .orchestrator
        .progress(resp.result.operation_id)
        .await
        .is_none());
}

#[tokio::test]
async fn progress_of_unknown_operation_is_none_and_cancel_errors() {
    let h = harness();
    let ghost = uuid::Uuid::now_v7();
    assert!(h.orchestrator.progress(ghost).await.is_none());
    assert_matches!(
        h.orchestrator.cancel(ghost).await,
        Err(EngineError::OperationNotFound(_))
    );
}
