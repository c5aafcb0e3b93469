//! End-to-end pipeline tests over the in-memory record store
//!
//! Each test uploads real CSV/XLSX bytes into a temporary local file store
//! and drives the queue with `process_queue()`, the same entry point the
//! sweeper and the one-shot binary use.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use gradeload_server::import::cutover::SwapError;
use gradeload_server::import::orchestrator::CreateTaskError;
use gradeload_server::import::types::{
    AcademicRecord, FileStatus, TaskStatus, UploadStatus,
};
use gradeload_server::import::{FileIngestor, ImportConfig};
use gradeload_server::storage::LocalFileStorage;
use gradeload_server::store::RecordStore;

mod common;
use common::{grades_csv, grades_xlsx, manual_cutover, Harness, StallingStorage};

fn legacy_row(snh: &str) -> AcademicRecord {
    AcademicRecord {
        snh: snh.to_string(),
        course_id: Some("OLD100".to_string()),
        ..AcademicRecord::default()
    }
}

#[tokio::test]
async fn test_mixed_task_swaps_valid_rows_and_names_failed_file() {
    let h = Harness::new(ImportConfig::default());
    let first = h.upload("term1.csv", grades_csv("A", 100)).await;
    let second = h.upload("term2.xlsx", grades_xlsx("B", 50)).await;
    let broken = h.upload("broken.xlsx", b"definitely not a workbook".to_vec()).await;

    let task = h
        .pipeline
        .orchestrator
        .create_task(&[first, second, broken])
        .await
        .unwrap();

    let report = h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(report.files_completed, 2);
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.tasks_swapped, vec![task.id]);

    let status = h.pipeline.orchestrator.get_status(task.id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(status.progress, 100);
    assert_eq!(status.imported_records, 150);
    let message = status.error_message.unwrap();
    assert!(message.starts_with("1 of 3 files failed: broken.xlsx"), "{message}");

    // imported_records is the sum over files
    let per_file: i64 = status.files.iter().map(|f| f.imported_count).sum();
    assert_eq!(per_file, status.imported_records);

    assert_eq!(h.store.production_rows().await.len(), 150);
    assert_eq!(h.store.count_staged().await.unwrap(), 0);

    // consumed uploads are no longer offered for new tasks
    let remaining = h.pipeline.uploads.list_uploaded().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, broken);
}

#[tokio::test]
async fn test_task_without_valid_rows_fails_and_keeps_production() {
    let h = Harness::new(ImportConfig::default());
    h.store.seed_production(vec![legacy_row("OLD1"), legacy_row("OLD2")]).await;

    let no_snh = h
        .upload("no_snh.csv", b"SNH,Course_ID\n,CS101\n,CS102\n".to_vec())
        .await;
    let task = h.pipeline.orchestrator.create_task(&[no_snh]).await.unwrap();

    let report = h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(report.tasks_failed, vec![task.id]);
    assert!(report.tasks_swapped.is_empty());

    let task = h.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.imported_records, 0);
    assert_eq!(task.total_records, 2);
    assert_eq!(
        task.error_message.as_deref(),
        Some("no valid rows were imported")
    );

    assert_eq!(h.store.production_rows().await.len(), 2);
}

#[tokio::test]
async fn test_header_without_snh_completes_file_with_skipped_rows() {
    let h = Harness::new(ImportConfig::default());
    let good = h.upload("good.csv", grades_csv("G", 3)).await;
    let no_snh = h
        .upload("nosnh.csv", b"Course_ID,Grade\nC1,90\nC2,80\n".to_vec())
        .await;
    let task = h.pipeline.orchestrator.create_task(&[good, no_snh]).await.unwrap();

    let report = h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(report.files_completed, 2);
    assert_eq!(report.files_failed, 0);
    assert_eq!(report.tasks_swapped, vec![task.id]);

    let status = h.pipeline.orchestrator.get_status(task.id).await.unwrap().unwrap();
    let file = status.files.iter().find(|f| f.file_name == "nosnh.csv").unwrap();
    assert_eq!(file.status, FileStatus::Completed);
    assert_eq!(file.records_count, 2);
    assert_eq!(file.imported_count, 0);
    let message = file.error_message.as_deref().unwrap();
    assert!(message.starts_with("2 rows skipped (row 2: missing SNH column"), "{message}");
    assert_eq!(h.store.production_rows().await.len(), 3);
}

#[tokio::test]
async fn test_all_files_failing_fails_task() {
    let h = Harness::new(ImportConfig::default());
    let a = h.upload("a.xlsx", b"garbage".to_vec()).await;
    let b = h.upload("b.csv", vec![0xff, 0xfe, 0x00]).await;
    let task = h.pipeline.orchestrator.create_task(&[a, b]).await.unwrap();

    h.pipeline.processor.process_queue().await.unwrap();

    let task = h.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    let message = task.error_message.unwrap();
    assert!(message.starts_with("all 2 files failed: "), "{message}");
    assert!(message.contains("a.xlsx") && message.contains("b.csv"));
}

#[tokio::test]
async fn test_row_errors_are_skipped_and_summarized() {
    let h = Harness::new(ImportConfig::default());
    let csv = b"SNH,Course_ID,Course_Name,Year\nS1,CS101,,2023\n,CS102,,2023\nS3,,,2023\nS4,CS104,,next\nS5,,Algebra,2024\n";
    let id = h.upload("rows.csv", csv.to_vec()).await;
    let task = h.pipeline.orchestrator.create_task(&[id]).await.unwrap();

    h.pipeline.processor.process_queue().await.unwrap();

    let status = h.pipeline.orchestrator.get_status(task.id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    let file = &status.files[0];
    assert_eq!(file.status, FileStatus::Completed);
    assert_eq!(file.records_count, 5);
    assert_eq!(file.imported_count, 2);
    let message = file.error_message.as_deref().unwrap();
    assert!(message.starts_with("3 rows skipped"), "{message}");
    assert!(message.contains("missing SNH"));
    assert!(message.contains("invalid year 'next'"));
}

#[tokio::test]
async fn test_reingesting_a_file_does_not_duplicate_rows() {
    let h = Harness::new(manual_cutover());
    let id = h.upload("term.csv", grades_csv("R", 30)).await;
    let task = h.pipeline.orchestrator.create_task(&[id]).await.unwrap();

    // a crashed attempt left partial rows behind for this file
    h.pipeline.orchestrator.activate_next().await.unwrap();
    let claimed = h.store.claim_files(task.id, 10, "crashed-worker").await.unwrap();
    let detail = claimed[0].clone();
    h.store
        .insert_staged(&detail.claim(), &[legacy_row("PARTIAL1"), legacy_row("PARTIAL2")])
        .await
        .unwrap();

    let ingestor = FileIngestor::new(h.store.clone(), h.pipeline.uploads.clone(), 7);
    let outcome = ingestor.ingest_file(&detail).await;
    assert_eq!(outcome.status, FileStatus::Completed);
    assert_eq!(outcome.imported, 30);
    assert_eq!(h.store.count_staged().await.unwrap(), 30);

    // the detail is terminal now; a second run reports the recorded counts
    let again = ingestor.ingest_file(&detail).await;
    assert_eq!(again, outcome);
    assert_eq!(h.store.count_staged().await.unwrap(), 30);
    let stored = h.store.get_file_detail(detail.id).await.unwrap().unwrap();
    assert_eq!(stored.imported_count, 30);
}

#[tokio::test]
async fn test_swap_rejected_while_files_are_unfinished() {
    let config = ImportConfig {
        max_files_per_sweep: 1,
        ..manual_cutover()
    };
    let h = Harness::new(config);
    let a = h.upload("a.csv", grades_csv("A", 5)).await;
    let b = h.upload("b.csv", grades_csv("B", 5)).await;
    let task = h.pipeline.orchestrator.create_task(&[a, b]).await.unwrap();

    h.pipeline.processor.process_queue().await.unwrap();

    let err = h.pipeline.cutover.swap(task.id).await.unwrap_err();
    assert!(
        matches!(err, SwapError::FilesNotTerminal { unfinished: 1, .. }),
        "{err:?}"
    );
    // a rejection leaves the task running
    let task_row = h.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task_row.status, TaskStatus::Running);

    let status = h.pipeline.orchestrator.get_status(task.id).await.unwrap().unwrap();
    assert_eq!(status.progress, 50);
    assert!(!status.ready_for_cutover);

    h.pipeline.processor.process_queue().await.unwrap();
    let status = h.pipeline.orchestrator.get_status(task.id).await.unwrap().unwrap();
    assert!(status.ready_for_cutover);

    let swap = h.pipeline.cutover.swap(task.id).await.unwrap();
    assert_eq!(swap.rows, 10);
}

#[tokio::test]
async fn test_second_swap_is_rejected() {
    let h = Harness::new(manual_cutover());
    let id = h.upload("term.csv", grades_csv("S", 12)).await;
    let task = h.pipeline.orchestrator.create_task(&[id]).await.unwrap();
    h.pipeline.processor.process_queue().await.unwrap();

    let staged_before: Vec<AcademicRecord> = h
        .store
        .staged_rows()
        .await
        .into_iter()
        .map(|(_, row)| row)
        .collect();

    let report = h.pipeline.cutover.swap(task.id).await.unwrap();
    assert_eq!(report.rows, 12);
    assert_eq!(h.store.production_rows().await, staged_before);

    let err = h.pipeline.cutover.swap(task.id).await.unwrap_err();
    assert!(matches!(
        err,
        SwapError::AlreadyTerminal {
            status: TaskStatus::Completed,
            ..
        }
    ));
    assert_eq!(h.store.production_rows().await.len(), 12);
}

#[tokio::test]
async fn test_failed_cutover_leaves_production_unchanged() {
    let h = Harness::new(manual_cutover());
    h.store.seed_production(vec![legacy_row("OLD1")]).await;
    let id = h.upload("term.csv", grades_csv("F", 8)).await;
    let task = h.pipeline.orchestrator.create_task(&[id]).await.unwrap();
    h.pipeline.processor.process_queue().await.unwrap();

    h.store.fail_next_cutover("disk full").await;
    let err = h.pipeline.cutover.swap(task.id).await.unwrap_err();
    assert!(matches!(err, SwapError::Cutover(_)));

    assert_eq!(h.store.production_rows().await, vec![legacy_row("OLD1")]);
    let task = h.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    let message = task.error_message.unwrap();
    assert!(message.starts_with("cutover failed: "), "{message}");
    assert!(message.contains("disk full"));
}

#[tokio::test]
async fn test_sweep_past_its_deadline_leaves_files_pending_for_the_next() {
    let config = ImportConfig {
        worker_concurrency: 2,
        sweep_deadline_secs: 0,
        ..ImportConfig::default()
    };
    let h = Harness::new(config);
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(h.upload(&format!("part{i}.csv"), grades_csv(&format!("P{i}"), 4)).await);
    }
    let task = h.pipeline.orchestrator.create_task(&ids).await.unwrap();

    let first = h.pipeline.processor.process_queue().await.unwrap();
    assert!(first.deadline_reached);
    assert_eq!(first.files_completed, 2);
    assert!(first.tasks_swapped.is_empty());

    let status = h.pipeline.orchestrator.get_status(task.id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Running);
    assert_eq!(status.progress, 40);
    let pending = status.files.iter().filter(|f| f.status == FileStatus::Pending).count();
    assert_eq!(pending, 3);

    let second = h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(second.files_completed, 2);
    let third = h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(third.files_completed, 1);
    assert_eq!(third.tasks_swapped, vec![task.id]);
    assert_eq!(h.store.production_rows().await.len(), 20);
}

#[tokio::test]
async fn test_sweep_within_deadline_claims_in_waves_until_done() {
    let config = ImportConfig {
        worker_concurrency: 1,
        ..ImportConfig::default()
    };
    let h = Harness::new(config);
    let a = h.upload("a.csv", grades_csv("A", 2)).await;
    let b = h.upload("b.csv", grades_csv("B", 2)).await;
    let c = h.upload("c.csv", grades_csv("C", 2)).await;
    let task = h.pipeline.orchestrator.create_task(&[a, b, c]).await.unwrap();

    let report = h.pipeline.processor.process_queue().await.unwrap();
    assert!(!report.deadline_reached);
    assert_eq!(report.files_completed, 3);
    assert_eq!(report.tasks_swapped, vec![task.id]);
}

#[tokio::test]
async fn test_tasks_run_one_at_a_time_in_creation_order() {
    let h = Harness::new(ImportConfig::default());
    let first = h.upload("first.csv", grades_csv("X", 4)).await;
    let second = h.upload("second.csv", grades_csv("Y", 6)).await;
    let task_one = h.pipeline.orchestrator.create_task(&[first]).await.unwrap();
    let task_two = h.pipeline.orchestrator.create_task(&[second]).await.unwrap();

    let report = h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(report.tasks_swapped, vec![task_one.id, task_two.id]);

    // each cutover replaces production wholesale; the later task wins
    let production = h.store.production_rows().await;
    assert_eq!(production.len(), 6);
    assert!(production.iter().all(|r| r.snh.starts_with('Y')));

    let history = h.pipeline.orchestrator.list_tasks(None, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|t| t.status == TaskStatus::Completed));
}

#[tokio::test]
async fn test_create_task_validates_input() {
    let h = Harness::new(ImportConfig::default());
    assert!(matches!(
        h.pipeline.orchestrator.create_task(&[]).await,
        Err(CreateTaskError::Empty)
    ));

    let missing = Uuid::new_v4();
    assert!(matches!(
        h.pipeline.orchestrator.create_task(&[missing]).await,
        Err(CreateTaskError::FileNotFound(id)) if id == missing
    ));

    let id = h.upload("once.csv", grades_csv("D", 1)).await;
    assert!(matches!(
        h.pipeline.orchestrator.create_task(&[id, id]).await,
        Err(CreateTaskError::DuplicateFile(_))
    ));

    // nothing was registered by the rejected calls
    assert!(h.store.list_tasks(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_task_from_uploaded_uses_every_waiting_upload() {
    let h = Harness::new(ImportConfig::default());
    assert!(matches!(
        h.pipeline.orchestrator.create_task_from_uploaded().await,
        Err(CreateTaskError::Empty)
    ));

    h.upload("a.csv", grades_csv("A", 2)).await;
    h.upload("b.csv", grades_csv("B", 3)).await;
    let task = h.pipeline.orchestrator.create_task_from_uploaded().await.unwrap();
    assert_eq!(task.total_files, 2);

    h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(h.store.production_rows().await.len(), 5);
}

#[tokio::test]
async fn test_slow_file_times_out_without_blocking_the_task() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(StallingStorage {
        inner: LocalFileStorage::new(dir.path()),
    });
    let config = ImportConfig {
        file_timeout_secs: 1,
        stale_after_secs: 60,
        ..ImportConfig::default()
    };
    let h = Harness::with_storage(dir, storage, config);
    let id = h.upload("slow.csv", grades_csv("T", 3)).await;
    let task = h.pipeline.orchestrator.create_task(&[id]).await.unwrap();

    let report = h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(report.files_timed_out, 1);
    assert_eq!(report.files_failed, 1);

    let status = h.pipeline.orchestrator.get_status(task.id).await.unwrap().unwrap();
    assert_eq!(status.files[0].status, FileStatus::Failed);
    assert_eq!(
        status.files[0].error_message.as_deref(),
        Some("timed out after 1s")
    );
    assert_eq!(status.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_stale_file_is_requeued_then_completed() {
    let h = Harness::new(ImportConfig::default());
    let id = h.upload("term.csv", grades_csv("Q", 9)).await;
    let task = h.pipeline.orchestrator.create_task(&[id]).await.unwrap();

    // a worker claimed the file and then died
    h.pipeline.orchestrator.activate_next().await.unwrap();
    let claimed = h.store.claim_files(task.id, 10, "dead-worker").await.unwrap();
    h.store
        .set_heartbeat(claimed[0].id, Utc::now() - ChronoDuration::hours(1))
        .await;

    let report = h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(report.files_requeued, 1);
    assert_eq!(report.files_abandoned, 0);
    assert_eq!(report.files_completed, 1);
    assert_eq!(report.tasks_swapped, vec![task.id]);

    let detail = h.store.get_file_detail(claimed[0].id).await.unwrap().unwrap();
    assert_eq!(detail.attempts, 2);
    assert_eq!(detail.imported_count, 9);
}

#[tokio::test]
async fn test_stalled_worker_cannot_write_after_its_file_is_reclaimed() {
    let h = Harness::new(manual_cutover());
    let id = h.upload("term.csv", grades_csv("W", 3)).await;
    let task = h.pipeline.orchestrator.create_task(&[id]).await.unwrap();

    // worker A claims, stages part of the file, then stalls
    h.pipeline.orchestrator.activate_next().await.unwrap();
    let stalled = h.store.claim_files(task.id, 1, "worker-a").await.unwrap().remove(0);
    h.store
        .insert_staged(&stalled.claim(), &[legacy_row("A1"), legacy_row("A2")])
        .await
        .unwrap();
    h.store
        .set_heartbeat(stalled.id, Utc::now() - ChronoDuration::hours(1))
        .await;

    // a sweep reclaims the file and loads it again, leaving it ready to swap
    let report = h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(report.files_requeued, 1);
    assert_eq!(report.files_completed, 1);

    // worker A wakes up
    assert!(h.store.insert_staged(&stalled.claim(), &[legacy_row("A3")]).await.is_err());
    let late = FileIngestor::new(h.store.clone(), h.pipeline.uploads.clone(), 200);
    late.ingest_file(&stalled).await;

    h.pipeline.cutover.swap(task.id).await.unwrap();
    let task = h.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.imported_records, 3);
    assert_eq!(h.store.production_rows().await.len(), 3);
}

#[tokio::test]
async fn test_stale_file_is_abandoned_after_max_attempts() {
    let config = ImportConfig {
        max_attempts: 1,
        ..ImportConfig::default()
    };
    let h = Harness::new(config);
    let id = h.upload("term.csv", grades_csv("Z", 9)).await;
    let task = h.pipeline.orchestrator.create_task(&[id]).await.unwrap();

    h.pipeline.orchestrator.activate_next().await.unwrap();
    let claimed = h.store.claim_files(task.id, 10, "dead-worker").await.unwrap();
    h.store
        .insert_staged(&claimed[0].claim(), &[legacy_row("HALF")])
        .await
        .unwrap();
    h.store
        .set_heartbeat(claimed[0].id, Utc::now() - ChronoDuration::hours(1))
        .await;

    let report = h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(report.files_abandoned, 1);
    assert_eq!(report.tasks_failed, vec![task.id]);
    assert_eq!(h.store.count_staged().await.unwrap(), 0);

    let detail = h.store.get_file_detail(claimed[0].id).await.unwrap().unwrap();
    assert_eq!(detail.status, FileStatus::Failed);
    assert_eq!(
        detail.error_message.as_deref(),
        Some("abandoned after 1 attempts without progress")
    );
}

#[tokio::test]
async fn test_clear_staging_resets_a_finished_task() {
    let h = Harness::new(manual_cutover());
    let id = h.upload("term.csv", grades_csv("C", 4)).await;
    let task = h.pipeline.orchestrator.create_task(&[id]).await.unwrap();
    h.pipeline.processor.process_queue().await.unwrap();

    // refused while the task is running
    assert!(h.pipeline.cutover.clear_staging(None).await.is_err());

    h.pipeline.cutover.swap(task.id).await.unwrap();

    let report = h.pipeline.cutover.clear_staging(Some(task.id)).await.unwrap();
    assert_eq!(report.reset_task_id, Some(task.id));

    let task_row = h.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(task_row.status, TaskStatus::Pending);
    let upload = h.pipeline.uploads.get(id).await.unwrap();
    assert_eq!(upload.status, UploadStatus::Uploaded);

    // the reset task loads again from scratch
    h.pipeline.processor.process_queue().await.unwrap();
    assert_eq!(h.store.count_staged().await.unwrap(), 4);

    // clearing twice with nothing named is harmless
    h.pipeline.cutover.swap(task.id).await.unwrap();
    h.pipeline.cutover.clear_staging(None).await.unwrap();
    h.pipeline.cutover.clear_staging(None).await.unwrap();
}

#[tokio::test]
async fn test_purge_expires_old_uploads_only() {
    let h = Harness::new(ImportConfig::default());
    let old = h.upload("old.csv", grades_csv("O", 1)).await;
    let fresh = h.upload("fresh.csv", grades_csv("N", 1)).await;
    h.store
        .set_uploaded_at(old, Utc::now() - ChronoDuration::days(10))
        .await;

    let report = h
        .pipeline
        .uploads
        .purge_older_than(h.pipeline.config.retention())
        .await
        .unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.failed, 0);

    assert_eq!(
        h.pipeline.uploads.get(old).await.unwrap().status,
        UploadStatus::Expired
    );
    let waiting = h.pipeline.uploads.list_uploaded().await.unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].id, fresh);

    // a task referencing an expired upload is rejected up front
    assert!(matches!(
        h.pipeline.orchestrator.create_task(&[old]).await,
        Err(CreateTaskError::FileNotUploaded { .. })
    ));
}
