//! Task orchestrator
//!
//! Owns the task lifecycle: registering files, reporting progress from the
//! persisted file details, and deciding when a task may be swapped in.
//!
//! ```text
//! pending -> running -> completed
//!                    \-> failed
//! ```
//!
//! Terminal tasks only move again through an explicit reset.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use super::schema::{SchemaError, SchemaGuard};
use super::types::{
    FileStatus, ImportFileDetail, ImportTask, TaskCompletion, TaskStatus, UploadStatus,
    UploadedFile,
};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum CreateTaskError {
    #[error("At least one file is required")]
    Empty,

    #[error("File {0} is listed more than once")]
    DuplicateFile(Uuid),

    #[error("File not found: {0}")]
    FileNotFound(Uuid),

    #[error("File {id} is {status}, not uploaded")]
    FileNotUploaded { id: Uuid, status: UploadStatus },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Whether a running task can be swapped in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Some files are still pending or processing
    InProgress { unfinished: usize },
    /// Every file is terminal and at least one staged rows
    Ready(TaskCompletion),
    /// Every file is terminal but nothing was staged; the task must fail
    NoRows(TaskCompletion),
}

/// Aggregate the terminal state of a task's files
pub fn assess(files: &[ImportFileDetail]) -> Readiness {
    let unfinished = files.iter().filter(|f| !f.status.is_terminal()).count();
    if unfinished > 0 {
        return Readiness::InProgress { unfinished };
    }

    let total_records = files.iter().map(|f| f.records_count).sum();
    let imported_records = files.iter().map(|f| f.imported_count).sum();
    let failed: Vec<&ImportFileDetail> = files
        .iter()
        .filter(|f| f.status == FileStatus::Failed)
        .collect();
    let failure_list = failed
        .iter()
        .map(|f| match &f.error_message {
            Some(message) => format!("{} ({})", f.file_name, message),
            None => f.file_name.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ");

    let ready = files
        .iter()
        .any(|f| f.status == FileStatus::Completed && f.imported_count > 0);

    let error_message = if ready {
        (!failed.is_empty())
            .then(|| format!("{} of {} files failed: {}", failed.len(), files.len(), failure_list))
    } else if failed.is_empty() {
        Some("no valid rows were imported".to_string())
    } else if failed.len() == files.len() {
        Some(format!("all {} files failed: {}", files.len(), failure_list))
    } else {
        Some(format!(
            "{} of {} files failed: {}; no valid rows were imported",
            failed.len(),
            files.len(),
            failure_list
        ))
    };

    let completion = TaskCompletion {
        total_records,
        imported_records,
        error_message,
    };
    if ready {
        Readiness::Ready(completion)
    } else {
        Readiness::NoRows(completion)
    }
}

/// round(100 * terminal / total), halves rounded up
pub fn progress_percent(terminal: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((200 * terminal + total) / (2 * total)) as u32
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file_detail_id: Uuid,
    pub file_id: Uuid,
    pub file_name: String,
    pub status: FileStatus,
    pub records_count: i64,
    pub imported_count: i64,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<&ImportFileDetail> for FileReport {
    fn from(detail: &ImportFileDetail) -> Self {
        Self {
            file_detail_id: detail.id,
            file_id: detail.file_id,
            file_name: detail.file_name.clone(),
            status: detail.status,
            records_count: detail.records_count,
            imported_count: detail.imported_count,
            error_message: detail.error_message.clone(),
            attempts: detail.attempts,
            processed_at: detail.processed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusReport {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub progress: u32,
    pub total_files: i32,
    pub processed_files: i32,
    pub total_records: i64,
    pub imported_records: i64,
    pub error_message: Option<String>,
    pub ready_for_cutover: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files: Vec<FileReport>,
}

pub struct TaskOrchestrator {
    store: Arc<dyn RecordStore>,
    schema: Arc<SchemaGuard>,
}

impl TaskOrchestrator {
    pub fn new(store: Arc<dyn RecordStore>, schema: Arc<SchemaGuard>) -> Self {
        Self { store, schema }
    }

    /// Register a pending task with one pending file detail per upload
    #[instrument(skip(self, file_ids), fields(files = file_ids.len()))]
    pub async fn create_task(&self, file_ids: &[Uuid]) -> Result<ImportTask, CreateTaskError> {
        if file_ids.is_empty() {
            return Err(CreateTaskError::Empty);
        }
        let mut seen = HashSet::with_capacity(file_ids.len());
        if let Some(dup) = file_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(CreateTaskError::DuplicateFile(*dup));
        }

        self.schema.ensure().await?;

        let mut uploads = Vec::with_capacity(file_ids.len());
        for id in file_ids {
            let upload = self
                .store
                .get_upload(*id)
                .await?
                .ok_or(CreateTaskError::FileNotFound(*id))?;
            if upload.status != UploadStatus::Uploaded {
                return Err(CreateTaskError::FileNotUploaded {
                    id: *id,
                    status: upload.status,
                });
            }
            uploads.push(upload);
        }

        self.register(&uploads).await
    }

    /// Register a task over every file currently in `uploaded` status
    pub async fn create_task_from_uploaded(&self) -> Result<ImportTask, CreateTaskError> {
        self.schema.ensure().await?;
        let uploads = self.store.list_uploads(UploadStatus::Uploaded).await?;
        if uploads.is_empty() {
            return Err(CreateTaskError::Empty);
        }
        self.register(&uploads).await
    }

    async fn register(&self, uploads: &[UploadedFile]) -> Result<ImportTask, CreateTaskError> {
        let task = ImportTask::new_pending(uploads.len() as i32);
        let files: Vec<ImportFileDetail> = uploads
            .iter()
            .enumerate()
            .map(|(position, upload)| ImportFileDetail::new_pending(task.id, upload, position as i32))
            .collect();

        self.store.create_task(&task, &files).await?;
        info!(task_id = %task.id, total_files = task.total_files, "Import task created");
        Ok(task)
    }

    pub async fn get_status(&self, task_id: Uuid) -> Result<Option<TaskStatusReport>, StoreError> {
        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(None);
        };
        let files = self.store.list_file_details(task_id).await?;

        let terminal = files.iter().filter(|f| f.status.is_terminal()).count();
        let (total_records, imported_records) = if task.status.is_terminal() {
            (task.total_records, task.imported_records)
        } else {
            (
                files.iter().map(|f| f.records_count).sum(),
                files.iter().map(|f| f.imported_count).sum(),
            )
        };
        let ready_for_cutover = task.status == TaskStatus::Running
            && matches!(assess(&files), Readiness::Ready(_));

        Ok(Some(TaskStatusReport {
            task_id: task.id,
            status: task.status,
            progress: progress_percent(terminal, task.total_files.max(0) as usize),
            total_files: task.total_files,
            processed_files: terminal as i32,
            total_records,
            imported_records,
            error_message: task.error_message,
            ready_for_cutover,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            files: files.iter().map(FileReport::from).collect(),
        }))
    }

    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> Result<Vec<ImportTask>, StoreError> {
        self.store.list_tasks(status, limit).await
    }

    /// The running task, or the oldest pending task once it has been started
    pub async fn activate_next(&self) -> Result<Option<ImportTask>, StoreError> {
        if let Some(task) = self.store.running_task().await? {
            return Ok(Some(task));
        }
        let Some(pending) = self.store.oldest_pending_task().await? else {
            return Ok(None);
        };
        if !self.store.begin_task(pending.id).await? {
            // another sweep got there first
            return Ok(self.store.running_task().await?);
        }
        info!(task_id = %pending.id, "Import task started, staging truncated");
        self.store.get_task(pending.id).await
    }

    pub async fn readiness(&self, task_id: Uuid) -> Result<Readiness, StoreError> {
        let files = self.store.list_file_details(task_id).await?;
        Ok(assess(&files))
    }

    /// Mark a running task failed without touching production
    pub async fn fail_task(
        &self,
        task_id: Uuid,
        completion: &TaskCompletion,
    ) -> Result<bool, StoreError> {
        let applied = self
            .store
            .finish_task(task_id, TaskStatus::Failed, completion)
            .await?;
        if applied {
            info!(
                task_id = %task_id,
                error = completion.error_message.as_deref().unwrap_or(""),
                "Import task failed"
            );
        }
        Ok(applied)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;

    fn detail(name: &str, status: FileStatus, imported: i64, error: Option<&str>) -> ImportFileDetail {
        ImportFileDetail {
            id: Uuid::new_v4(),
            task_id: Uuid::nil(),
            file_id: Uuid::new_v4(),
            file_name: name.to_string(),
            position: 0,
            status,
            records_count: imported + 2,
            imported_count: imported,
            error_message: error.map(str::to_string),
            attempts: 1,
            claimed_by: None,
            heartbeat_at: None,
            processed_at: None,
        }
    }

    fn upload(status: UploadStatus) -> UploadedFile {
        UploadedFile {
            id: Uuid::new_v4(),
            original_name: "grades.xlsx".to_string(),
            size_bytes: 10,
            checksum: String::new(),
            storage_key: "uploads/x.xlsx".to_string(),
            status,
            uploaded_at: Utc::now(),
        }
    }

    fn orchestrator(store: Arc<MemoryRecordStore>) -> TaskOrchestrator {
        let schema = Arc::new(SchemaGuard::new(store.clone()));
        TaskOrchestrator::new(store, schema)
    }

    #[test]
    fn test_progress_rounds_half_up() {
        assert_eq!(progress_percent(0, 3), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(1, 8), 13);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(0, 0), 0);
    }

    #[test]
    fn test_assess_mixed_results_is_ready_with_message() {
        let files = vec![
            detail("a.xlsx", FileStatus::Completed, 100, None),
            detail("b.xlsx", FileStatus::Completed, 50, None),
            detail("c.xlsx", FileStatus::Failed, 0, Some("Unreadable workbook")),
        ];
        match assess(&files) {
            Readiness::Ready(completion) => {
                assert_eq!(completion.imported_records, 150);
                assert_eq!(completion.total_records, 156);
                assert_eq!(
                    completion.error_message.as_deref(),
                    Some("1 of 3 files failed: c.xlsx (Unreadable workbook)")
                );
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn test_assess_all_failed_or_empty_is_no_rows() {
        let failed = vec![
            detail("a.xlsx", FileStatus::Failed, 0, Some("x")),
            detail("b.xlsx", FileStatus::Failed, 0, None),
        ];
        assert!(matches!(
            assess(&failed),
            Readiness::NoRows(TaskCompletion { error_message: Some(ref m), .. })
                if m == "all 2 files failed: a.xlsx (x); b.xlsx"
        ));

        let empty = vec![detail("a.xlsx", FileStatus::Completed, 0, None)];
        assert!(matches!(assess(&empty), Readiness::NoRows(_)));
    }

    #[test]
    fn test_assess_waits_for_unfinished_files() {
        let files = vec![
            detail("a.xlsx", FileStatus::Completed, 10, None),
            detail("b.xlsx", FileStatus::Processing, 0, None),
            detail("c.xlsx", FileStatus::Pending, 0, None),
        ];
        assert_eq!(assess(&files), Readiness::InProgress { unfinished: 2 });
    }

    #[tokio::test]
    async fn test_create_task_validates_input_without_mutation() {
        let store = Arc::new(MemoryRecordStore::new());
        let orchestrator = orchestrator(store.clone());
        let ok = upload(UploadStatus::Uploaded);
        let consumed = upload(UploadStatus::Consumed);
        store.insert_upload(&ok).await.unwrap();
        store.insert_upload(&consumed).await.unwrap();

        assert!(matches!(orchestrator.create_task(&[]).await, Err(CreateTaskError::Empty)));
        assert!(matches!(
            orchestrator.create_task(&[ok.id, ok.id]).await,
            Err(CreateTaskError::DuplicateFile(id)) if id == ok.id
        ));
        assert!(matches!(
            orchestrator.create_task(&[ok.id, Uuid::new_v4()]).await,
            Err(CreateTaskError::FileNotFound(_))
        ));
        assert!(matches!(
            orchestrator.create_task(&[consumed.id]).await,
            Err(CreateTaskError::FileNotUploaded { .. })
        ));
        assert!(store.list_tasks(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_task_and_report_status() {
        let store = Arc::new(MemoryRecordStore::new());
        let orchestrator = orchestrator(store.clone());
        let a = upload(UploadStatus::Uploaded);
        let b = upload(UploadStatus::Uploaded);
        store.insert_upload(&a).await.unwrap();
        store.insert_upload(&b).await.unwrap();

        let task = orchestrator.create_task(&[a.id, b.id]).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.total_files, 2);

        let report = orchestrator.get_status(task.id).await.unwrap().unwrap();
        assert_eq!(report.progress, 0);
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.files[0].file_id, a.id);
        assert!(!report.ready_for_cutover);

        assert!(orchestrator.get_status(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_task_from_uploaded_uses_every_upload() {
        let store = Arc::new(MemoryRecordStore::new());
        let orchestrator = orchestrator(store.clone());
        assert!(matches!(
            orchestrator.create_task_from_uploaded().await,
            Err(CreateTaskError::Empty)
        ));

        store.insert_upload(&upload(UploadStatus::Uploaded)).await.unwrap();
        store.insert_upload(&upload(UploadStatus::Uploaded)).await.unwrap();
        store.insert_upload(&upload(UploadStatus::Expired)).await.unwrap();

        let task = orchestrator.create_task_from_uploaded().await.unwrap();
        assert_eq!(task.total_files, 2);
    }

    #[tokio::test]
    async fn test_activate_next_runs_one_task_at_a_time() {
        let store = Arc::new(MemoryRecordStore::new());
        let orchestrator = orchestrator(store.clone());
        let a = upload(UploadStatus::Uploaded);
        let b = upload(UploadStatus::Uploaded);
        store.insert_upload(&a).await.unwrap();
        store.insert_upload(&b).await.unwrap();
        let first = orchestrator.create_task(&[a.id]).await.unwrap();
        let _second = orchestrator.create_task(&[b.id]).await.unwrap();

        let active = orchestrator.activate_next().await.unwrap().unwrap();
        assert_eq!(active.id, first.id);
        assert_eq!(active.status, TaskStatus::Running);

        // the running task keeps the slot
        let again = orchestrator.activate_next().await.unwrap().unwrap();
        assert_eq!(again.id, first.id);
    }
}
