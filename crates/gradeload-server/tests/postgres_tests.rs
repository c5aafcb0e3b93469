//! PostgreSQL record store tests
//!
//! Each test starts its own PostgreSQL container, so these need Docker:
//!
//! ```text
//! cargo test -p gradeload-server --test postgres_tests -- --ignored
//! ```

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use gradeload_server::import::cutover::SwapError;
use gradeload_server::import::types::{
    AcademicRecord, FileResult, FileStatus, ImportTask, TaskStatus,
};
use gradeload_server::import::{ImportConfig, ImportPipeline};
use gradeload_server::storage::LocalFileStorage;
use gradeload_server::store::{PgRecordStore, RecordStore, StoreError};

mod common;
use common::{grades_csv, grades_xlsx, TestPostgres};

struct PgHarness {
    _pg: TestPostgres,
    _dir: TempDir,
    store: Arc<PgRecordStore>,
    pipeline: ImportPipeline,
}

async fn harness(config: ImportConfig) -> PgHarness {
    let pg = TestPostgres::start().await.unwrap();
    let store = Arc::new(PgRecordStore::new(pg.pool().clone()));
    store.ensure_schema().await.unwrap();

    let dir = TempDir::new().unwrap();
    let storage = Arc::new(LocalFileStorage::new(dir.path()));
    let pipeline = ImportPipeline::new(store.clone(), storage, config);
    PgHarness {
        _pg: pg,
        _dir: dir,
        store,
        pipeline,
    }
}

fn record(snh: &str) -> AcademicRecord {
    AcademicRecord {
        snh: snh.to_string(),
        course_id: Some("CS101".to_string()),
        year: Some(2024),
        ..AcademicRecord::default()
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_schema_creation_is_idempotent() {
    let h = harness(ImportConfig::default()).await;

    h.store.ensure_schema().await.unwrap();
    h.pipeline.schema.ensure().await.unwrap();

    let staging = h
        .store
        .table_columns("academic_results_staging")
        .await
        .unwrap();
    assert!(staging.contains(&"import_file_id".to_string()));
    assert!(staging.contains(&"assessment_method".to_string()));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_full_task_cycle_against_postgres() {
    let h = harness(ImportConfig::default()).await;
    let a = h.pipeline.uploads.register("a.csv", grades_csv("A", 120)).await.unwrap();
    let b = h.pipeline.uploads.register("b.xlsx", grades_xlsx("B", 30)).await.unwrap();
    let bad = h
        .pipeline
        .uploads
        .register("bad.xlsx", b"not a workbook".to_vec())
        .await
        .unwrap();

    let task = h
        .pipeline
        .orchestrator
        .create_task(&[a.id, b.id, bad.id])
        .await
        .unwrap();
    let report = h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(report.tasks_swapped, vec![task.id]);

    let task_row = h.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task_row.status, TaskStatus::Completed);
    assert_eq!(task_row.processed_files, 3);
    assert_eq!(task_row.imported_records, 150);
    assert!(task_row
        .error_message
        .unwrap()
        .starts_with("1 of 3 files failed: bad.xlsx"));

    assert_eq!(h.store.count_production().await.unwrap(), 150);
    assert_eq!(h.store.count_staged().await.unwrap(), 0);

    let err = h.pipeline.cutover.swap(task.id).await.unwrap_err();
    assert!(matches!(err, SwapError::AlreadyTerminal { .. }));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_only_one_task_runs_at_a_time() {
    let h = harness(ImportConfig::default()).await;
    let first = ImportTask::new_pending(0);
    let second = ImportTask::new_pending(0);
    h.store.create_task(&first, &[]).await.unwrap();
    h.store.create_task(&second, &[]).await.unwrap();

    assert!(h.store.begin_task(first.id).await.unwrap());
    assert!(!h.store.begin_task(second.id).await.unwrap());
    assert!(!h.store.begin_task(first.id).await.unwrap());

    let running = h.store.running_task().await.unwrap().unwrap();
    assert_eq!(running.id, first.id);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_claims_skip_locked_and_stale_files_are_reclaimed() {
    let h = harness(ImportConfig::default()).await;
    let upload = h.pipeline.uploads.register("q.csv", grades_csv("Q", 3)).await.unwrap();
    let task = h.pipeline.orchestrator.create_task(&[upload.id]).await.unwrap();
    h.pipeline.orchestrator.activate_next().await.unwrap();

    let claimed = h.store.claim_files(task.id, 5, "worker-a").await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert!(h.store.claim_files(task.id, 5, "worker-b").await.unwrap().is_empty());

    h.store
        .insert_staged(&claimed[0].claim(), &[record("S1"), record("S2")])
        .await
        .unwrap();

    // nothing is stale yet
    let outcome = h
        .store
        .reclaim_stale_files(Utc::now() - ChronoDuration::hours(1), 3)
        .await
        .unwrap();
    assert_eq!(outcome.requeued + outcome.abandoned, 0);

    // with max_attempts reached the file is failed and its rows dropped
    let outcome = h
        .store
        .reclaim_stale_files(Utc::now() + ChronoDuration::seconds(1), 1)
        .await
        .unwrap();
    assert_eq!(outcome.abandoned, 1);
    assert_eq!(h.store.count_staged().await.unwrap(), 0);

    let detail = h.store.get_file_detail(claimed[0].id).await.unwrap().unwrap();
    assert_eq!(detail.status, FileStatus::Failed);
    assert_eq!(
        detail.error_message.as_deref(),
        Some("abandoned after 1 attempts without progress")
    );
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_completion_is_conditional_on_processing() {
    let h = harness(ImportConfig::default()).await;
    let upload = h.pipeline.uploads.register("c.csv", grades_csv("C", 2)).await.unwrap();
    let task = h.pipeline.orchestrator.create_task(&[upload.id]).await.unwrap();
    let files = h.store.list_file_details(task.id).await.unwrap();

    // still pending: completion must not apply
    let result = FileResult {
        records_count: 2,
        imported_count: 2,
        error_message: None,
    };
    assert!(!h.store.complete_file(&files[0].claim(), &result).await.unwrap());

    h.pipeline.orchestrator.activate_next().await.unwrap();
    let claim = h.store.claim_files(task.id, 1, "worker").await.unwrap()[0].claim();
    assert!(h.store.complete_file(&claim, &result).await.unwrap());
    assert!(!h.store.complete_file(&claim, &result).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_reclaimed_file_rejects_writes_from_previous_claim() {
    let h = harness(ImportConfig::default()).await;
    let upload = h.pipeline.uploads.register("r.csv", grades_csv("R", 3)).await.unwrap();
    let task = h.pipeline.orchestrator.create_task(&[upload.id]).await.unwrap();
    h.pipeline.orchestrator.activate_next().await.unwrap();

    let first = h.store.claim_files(task.id, 1, "worker-a").await.unwrap()[0].claim();
    h.store
        .insert_staged(&first, &[record("A1"), record("A2")])
        .await
        .unwrap();

    // worker-a stalls past the stale window and worker-b takes over
    let outcome = h
        .store
        .reclaim_stale_files(Utc::now() + ChronoDuration::seconds(1), 3)
        .await
        .unwrap();
    assert_eq!(outcome.requeued, 1);
    let second = h.store.claim_files(task.id, 1, "worker-b").await.unwrap()[0].claim();
    assert_eq!(second.attempt, first.attempt + 1);
    h.store.delete_staged(&second).await.unwrap();
    h.store
        .insert_staged(&second, &[record("B1"), record("B2"), record("B3")])
        .await
        .unwrap();

    // worker-a wakes up and keeps going
    assert!(matches!(
        h.store.insert_staged(&first, &[record("A3")]).await,
        Err(StoreError::ClaimLost(_))
    ));
    assert!(!h.store.heartbeat_file(&first).await.unwrap());
    let late = FileResult {
        records_count: 4,
        imported_count: 4,
        error_message: None,
    };
    assert!(!h.store.complete_file(&first, &late).await.unwrap());

    let result = FileResult {
        records_count: 3,
        imported_count: 3,
        error_message: None,
    };
    assert!(h.store.complete_file(&second, &result).await.unwrap());
    assert_eq!(h.store.count_staged().await.unwrap(), 3);
}
