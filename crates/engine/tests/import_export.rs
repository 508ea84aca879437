//! Import/export runs through the JSON format adapter.

mod common;

use assert_matches::assert_matches;

use squadops_core::requests::{
    BatchExportRequest, BatchImportRequest, ExchangeFormat, WorkoutTemplate,
};
use squadops_engine::EngineError;

use common::{harness, template};

#[tokio::test]
async fn export_serializes_requested_templates_in_order() {
    let h = harness();
    h.store.seed_template(template("t2", "Ladders"));
    h.store.seed_template(template("t1", "Sprints"));

    let resp = h
        .orchestrator
        .run_export(BatchExportRequest {
            template_ids: vec!["t1".to_string(), "t2".to_string()],
            format: ExchangeFormat::Json,
            options: Default::default(),
        })
        .await
        .unwrap();

    assert_eq!(resp.result.success_count, 2);
    assert_eq!(resp.format, ExchangeFormat::Json);

    let exported: Vec<WorkoutTemplate> = serde_json::from_slice(&resp.payload).unwrap();
    assert_eq!(exported.len(), 2);
    assert_eq!(exported[0].id, "t1");
    assert_eq!(exported[1].id, "t2");
}

#[tokio::test]
async fn export_reports_missing_templates_and_ships_the_rest() {
    let h = harness();
    h.store.seed_template(template("t1", "Sprints"));

    let resp = h
        .orchestrator
        .run_export(BatchExportRequest {
            template_ids: vec!["t1".to_string(), "ghost".to_string()],
            format: ExchangeFormat::Json,
            options: Default::default(),
        })
        .await
        .unwrap();

    assert_eq!(resp.result.success_count, 1);
    assert_eq!(resp.result.failure_count, 1);
    assert_eq!(resp.result.failed[0].item_id, "ghost");

    let exported: Vec<WorkoutTemplate> = serde_json::from_slice(&resp.payload).unwrap();
    assert_eq!(exported.len(), 1);
}

#[tokio::test]
async fn export_then_import_round_trips() {
    let h = harness();
    h.store.seed_template(template("t1", "Sprints"));
    h.store.seed_template(template("t2", "Ladders"));

    let exported = h
        .orchestrator
        .run_export(BatchExportRequest {
            template_ids: vec!["t1".to_string(), "t2".to_string()],
            format: ExchangeFormat::Json,
            options: Default::default(),
        })
        .await
        .unwrap();

    // Wipe the store and bring everything back from the payload.
    let before_t1 = h.store.template("t1").unwrap();
    h.store.clear_templates();
    assert_eq!(h.store.template_count(), 0);

    let imported = h
        .orchestrator
        .run_import(BatchImportRequest {
            format: ExchangeFormat::Json,
            payload: exported.payload,
            update_existing: false,
            options: Default::default(),
        })
        .await
        .unwrap();

    assert_eq!(imported.result.success_count, 2);
    assert_eq!(h.store.template_count(), 2);
    assert_eq!(h.store.template("t1").unwrap(), before_t1);
}

#[tokio::test]
async fn import_rejects_existing_ids_without_update_flag() {
    let h = harness();
    h.store.seed_template(template("t1", "Original"));
    let payload = serde_json::to_vec(&vec![template("t1", "Imported")]).unwrap();

    let resp = h
        .orchestrator
        .run_import(BatchImportRequest {
            format: ExchangeFormat::Json,
            payload,
            update_existing: false,
            options: Default::default(),
        })
        .await
        .unwrap();

    assert_eq!(resp.result.failure_count, 1);
    assert!(resp.result.failed[0].error.contains("already exists"));
    assert_eq!(h.store.template("t1").unwrap().name, "Original");
}

#[tokio::test]
async fn import_overwrites_with_update_flag() {
    let h = harness();
    h.store.seed_template(template("t1", "Original"));
    let payload = serde_json::to_vec(&vec![template("t1", "Imported")]).unwrap();

    let resp = h
        .orchestrator
        .run_import(BatchImportRequest {
            format: ExchangeFormat::Json,
            payload,
            update_existing: true,
            options: Default::default(),
        })
        .await
        .unwrap();

    assert_eq!(resp.result.success_count, 1);
    assert_eq!(h.store.template("t1").unwrap().name, "Imported");
}

#[tokio::test]
async fn malformed_payload_fails_validation_not_the_engine() {
    let h = harness();
    let resp = h
        .orchestrator
        .run_import(BatchImportRequest {
            format: ExchangeFormat::Json,
            payload: b"{ definitely not templates".to_vec(),
            update_existing: false,
            options: Default::default(),
        })
        .await
        .unwrap();

    assert!(!resp.validation.valid);
    assert!(resp.validation.errors[0].contains("Malformed"));
    assert_eq!(resp.result.total, 0);
}

#[tokio::test]
async fn unsupported_format_is_a_fatal_error() {
    let h = harness();
    let err = h
        .orchestrator
        .run_export(BatchExportRequest {
            template_ids: vec!["t1".to_string()],
            format: ExchangeFormat::Excel,
            options: Default::default(),
        })
        .await;
    assert_matches!(err, Err(EngineError::UnsupportedFormat("excel")));
}

#[tokio::test]
async fn import_validate_only_parses_without_writing() {
    let h = harness();
    let payload = serde_json::to_vec(&vec![template("t1", "Imported")]).unwrap();
    let resp = h
        .orchestrator
        .run_import(BatchImportRequest {
            format: ExchangeFormat::Json,
            payload,
            update_existing: false,
            options: squadops_core::options::BatchOperationOptions {
                validate_only: true,
                ..Default::default()
            },
        })
        .await
        .unwrap();

    assert!(resp.validation.valid);
    assert_eq!(h.store.template_count(), 0);
}
