//! Record store gateway
//!
//! Every read and write the pipeline makes against the datastore goes through
//! [`RecordStore`]. Two implementations exist:
//!
//! - [`PgRecordStore`]: PostgreSQL via sqlx, used in production
//! - [`MemoryRecordStore`]: a process-local store used by tests and by
//!   `DATABASE_URL=memory://` development runs
//!
//! Conditional transitions (`claim_files`, `complete_file`, `finish_task`, ...)
//! return whether they applied, so callers never overwrite a status someone
//! else already moved. Per-file writes carry a [`FileClaim`]; a worker whose
//! file was reclaimed can no longer touch that file's rows or status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseConfig;

use crate::import::types::{
    AcademicRecord, FileClaim, FileResult, ImportFileDetail, ImportTask, TaskCompletion, TaskStatus,
    UnknownStatus, UploadStatus, UploadedFile,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(#[from] UnknownStatus),

    #[error("Datastore unavailable: {0}")]
    Unavailable(String),

    /// The file was re-claimed (or finished) since this claim was taken
    #[error("Claim {} on file {} is no longer current", .0.attempt, .0.file_id)]
    ClaimLost(FileClaim),
}

/// Open the store `config` names: the in-process store for `memory://`,
/// otherwise a PostgreSQL pool
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn RecordStore>, StoreError> {
    if config.is_memory() {
        info!("Using in-memory record store");
        return Ok(Arc::new(MemoryRecordStore::new()));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;
    info!("Database connection pool established");

    Ok(Arc::new(PgRecordStore::new(pool)))
}

/// Result of [`RecordStore::reclaim_stale_files`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimOutcome {
    /// Stale files put back to `pending`
    pub requeued: u64,
    /// Stale files that ran out of attempts and were failed
    pub abandoned: u64,
}

/// Result of [`RecordStore::replace_production`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Production now holds exactly the staged rows; the task is completed
    Swapped { rows: u64 },
    /// No task with that id
    TaskMissing,
    /// The task was not `running` when the swap transaction locked it
    TaskNotRunning(TaskStatus),
    /// Files of the task were still pending or processing
    FilesNotTerminal(i64),
    /// Staging was empty; nothing was replaced
    NothingStaged,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    /// Create missing tables. Must be idempotent.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Column names of `table` as the datastore reports them
    async fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Cheap connectivity check
    async fn ping(&self) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Uploaded files
    // ------------------------------------------------------------------

    async fn insert_upload(&self, upload: &UploadedFile) -> Result<(), StoreError>;

    async fn get_upload(&self, id: Uuid) -> Result<Option<UploadedFile>, StoreError>;

    /// Uploads with the given status, oldest first
    async fn list_uploads(&self, status: UploadStatus) -> Result<Vec<UploadedFile>, StoreError>;

    async fn set_upload_status(&self, id: Uuid, status: UploadStatus) -> Result<bool, StoreError>;

    /// Non-expired uploads stored before `cutoff`
    async fn uploads_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UploadedFile>, StoreError>;

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Insert a task and its file details in one unit
    async fn create_task(
        &self,
        task: &ImportTask,
        files: &[ImportFileDetail],
    ) -> Result<(), StoreError>;

    async fn get_task(&self, id: Uuid) -> Result<Option<ImportTask>, StoreError>;

    /// Newest first
    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> Result<Vec<ImportTask>, StoreError>;

    async fn running_task(&self) -> Result<Option<ImportTask>, StoreError>;

    async fn oldest_pending_task(&self) -> Result<Option<ImportTask>, StoreError>;

    /// Move a pending task to `running` and truncate staging, atomically.
    /// Returns false if the task is not pending or another task is running.
    async fn begin_task(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Stamp a running task terminal. Returns false if it was not running.
    async fn finish_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        completion: &TaskCompletion,
    ) -> Result<bool, StoreError>;

    /// Return a non-running task and all its files to `pending`, restore its
    /// consumed uploads and truncate staging. Returns false if the task is
    /// running.
    async fn reset_task(&self, id: Uuid) -> Result<bool, StoreError>;

    // ------------------------------------------------------------------
    // File details
    // ------------------------------------------------------------------

    /// Ordered by position
    async fn list_file_details(&self, task_id: Uuid) -> Result<Vec<ImportFileDetail>, StoreError>;

    async fn get_file_detail(&self, id: Uuid) -> Result<Option<ImportFileDetail>, StoreError>;

    /// Atomically move up to `limit` pending files of a task to `processing`
    async fn claim_files(
        &self,
        task_id: Uuid,
        limit: i64,
        worker: &str,
    ) -> Result<Vec<ImportFileDetail>, StoreError>;

    /// Returns false once `claim` is no longer the file's current claim
    async fn heartbeat_file(&self, claim: &FileClaim) -> Result<bool, StoreError>;

    /// `processing` -> `completed`, only under the current claim
    async fn complete_file(&self, claim: &FileClaim, result: &FileResult)
        -> Result<bool, StoreError>;

    /// `processing` -> `failed` under the current claim; drops the file's
    /// staged rows
    async fn fail_file(&self, claim: &FileClaim, result: &FileResult) -> Result<bool, StoreError>;

    /// Requeue `processing` files whose heartbeat is older than `stale_before`,
    /// failing those already claimed `max_attempts` times
    async fn reclaim_stale_files(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<ReclaimOutcome, StoreError>;

    /// Files of a task still `pending` or `processing`
    async fn count_unfinished_files(&self, task_id: Uuid) -> Result<i64, StoreError>;

    // ------------------------------------------------------------------
    // Staging and production
    // ------------------------------------------------------------------

    /// Insert one batch of rows tagged with the claimed file's id. Fails
    /// with [`StoreError::ClaimLost`] unless `claim` is current.
    async fn insert_staged(
        &self,
        claim: &FileClaim,
        rows: &[AcademicRecord],
    ) -> Result<u64, StoreError>;

    /// Delete every staged row of the claimed file, under the same check as
    /// `insert_staged`
    async fn delete_staged(&self, claim: &FileClaim) -> Result<u64, StoreError>;

    async fn count_staged(&self) -> Result<i64, StoreError>;

    async fn truncate_staging(&self) -> Result<(), StoreError>;

    async fn count_production(&self) -> Result<i64, StoreError>;

    /// Replace production with staging and complete the task, all inside one
    /// transaction. Task status and unfinished files are re-checked under
    /// lock; on any error nothing is changed.
    async fn replace_production(
        &self,
        task_id: Uuid,
        completion: &TaskCompletion,
    ) -> Result<SwapOutcome, StoreError>;
}
