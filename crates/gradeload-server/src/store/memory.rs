//! In-process record store
//!
//! Holds every table behind one `tokio::sync::Mutex`, so each trait call is
//! atomic the same way a single SQL transaction is. Used by the test suite and
//! by `DATABASE_URL=memory://` runs; state is lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ReclaimOutcome, RecordStore, StoreError, SwapOutcome};
use crate::import::types::{
    AcademicRecord, FileClaim, FileResult, FileStatus, ImportFileDetail, ImportTask, TaskCompletion,
    TaskStatus, UploadStatus, UploadedFile, ORIGIN_COLUMN, RECORD_COLUMNS, STAGING_TABLE,
};

#[derive(Default)]
struct MemoryState {
    uploads: HashMap<Uuid, UploadedFile>,
    tasks: HashMap<Uuid, ImportTask>,
    files: HashMap<Uuid, ImportFileDetail>,
    staging: Vec<(Uuid, AcademicRecord)>,
    production: Vec<AcademicRecord>,
    cutover_fault: Option<String>,
    hidden_columns: Vec<(String, String)>,
}

impl MemoryState {
    fn hydrate(&self, task: &ImportTask) -> ImportTask {
        let processed = self
            .files
            .values()
            .filter(|f| f.task_id == task.id && f.status.is_terminal())
            .count();
        let mut task = task.clone();
        task.processed_files = processed as i32;
        task
    }

    fn unfinished(&self, task_id: Uuid) -> i64 {
        self.files
            .values()
            .filter(|f| f.task_id == task_id && !f.status.is_terminal())
            .count() as i64
    }

    fn holds(&self, claim: &FileClaim) -> bool {
        self.files.get(&claim.file_id).is_some_and(|f| {
            f.status == FileStatus::Processing && f.attempts == claim.attempt
        })
    }

    fn drop_staged(&mut self, origin: Uuid) -> u64 {
        let before = self.staging.len();
        self.staging.retain(|(tag, _)| *tag != origin);
        (before - self.staging.len()) as u64
    }
}

#[derive(Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
    schema_checks: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `replace_production` call fail after its checks pass,
    /// as a datastore error inside the swap transaction would.
    pub async fn fail_next_cutover(&self, message: impl Into<String>) {
        self.state.lock().await.cutover_fault = Some(message.into());
    }

    /// Leave `column` out of what `table_columns(table)` reports, simulating
    /// a table created by an older release
    pub async fn hide_column(&self, table: &str, column: &str) {
        self.state
            .lock()
            .await
            .hidden_columns
            .push((table.to_string(), column.to_string()));
    }

    /// Number of `ensure_schema` calls so far
    pub fn schema_checks(&self) -> usize {
        self.schema_checks.load(Ordering::SeqCst)
    }

    pub async fn production_rows(&self) -> Vec<AcademicRecord> {
        self.state.lock().await.production.clone()
    }

    /// Staged rows with their origin tag
    pub async fn staged_rows(&self) -> Vec<(Uuid, AcademicRecord)> {
        self.state.lock().await.staging.clone()
    }

    /// Put rows straight into production, standing in for a previous load
    pub async fn seed_production(&self, rows: Vec<AcademicRecord>) {
        self.state.lock().await.production = rows;
    }

    /// Stage rows under `origin` without any claim, standing in for rows a
    /// crashed run left behind
    pub async fn seed_staging(&self, origin: Uuid, rows: Vec<AcademicRecord>) {
        self.state
            .lock()
            .await
            .staging
            .extend(rows.into_iter().map(|row| (origin, row)));
    }

    /// Force a file's heartbeat, e.g. to age it past the stale threshold
    pub async fn set_heartbeat(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(file) = self.state.lock().await.files.get_mut(&id) {
            file.heartbeat_at = Some(at);
        }
    }

    /// Backdate an upload, e.g. to push it past the retention window
    pub async fn set_uploaded_at(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(upload) = self.state.lock().await.uploads.get_mut(&id) {
            upload.uploaded_at = at;
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.schema_checks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let mut columns: Vec<String> = RECORD_COLUMNS.iter().map(|c| c.to_string()).collect();
        if table == STAGING_TABLE {
            columns.push(ORIGIN_COLUMN.to_string());
        }
        let state = self.state.lock().await;
        columns.retain(|c| !state.hidden_columns.iter().any(|(t, h)| t == table && h == c));
        Ok(columns)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_upload(&self, upload: &UploadedFile) -> Result<(), StoreError> {
        self.state.lock().await.uploads.insert(upload.id, upload.clone());
        Ok(())
    }

    async fn get_upload(&self, id: Uuid) -> Result<Option<UploadedFile>, StoreError> {
        Ok(self.state.lock().await.uploads.get(&id).cloned())
    }

    async fn list_uploads(&self, status: UploadStatus) -> Result<Vec<UploadedFile>, StoreError> {
        let state = self.state.lock().await;
        let mut uploads: Vec<_> = state
            .uploads
            .values()
            .filter(|u| u.status == status)
            .cloned()
            .collect();
        uploads.sort_by_key(|u| u.uploaded_at);
        Ok(uploads)
    }

    async fn set_upload_status(&self, id: Uuid, status: UploadStatus) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(match state.uploads.get_mut(&id) {
            Some(upload) => {
                upload.status = status;
                true
            }
            None => false,
        })
    }

    async fn uploads_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UploadedFile>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .uploads
            .values()
            .filter(|u| u.status != UploadStatus::Expired && u.uploaded_at < cutoff)
            .cloned()
            .collect())
    }

    async fn create_task(
        &self,
        task: &ImportTask,
        files: &[ImportFileDetail],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.tasks.insert(task.id, task.clone());
        for file in files {
            state.files.insert(file.id, file.clone());
        }
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ImportTask>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&id).map(|t| state.hydrate(t)))
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> Result<Vec<ImportTask>, StoreError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<_> = state
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .map(|t| state.hydrate(t))
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(limit.max(0) as usize);
        Ok(tasks)
    }

    async fn running_task(&self) -> Result<Option<ImportTask>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .find(|t| t.status == TaskStatus::Running)
            .map(|t| state.hydrate(t)))
    }

    async fn oldest_pending_task(&self) -> Result<Option<ImportTask>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| t.created_at)
            .map(|t| state.hydrate(t)))
    }

    async fn begin_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.tasks.values().any(|t| t.status == TaskStatus::Running) {
            return Ok(false);
        }
        match state.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Running;
                task.started_at = Some(Utc::now());
            }
            _ => return Ok(false),
        }
        state.staging.clear();
        Ok(true)
    }

    async fn finish_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        completion: &TaskCompletion,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running => {
                task.status = status;
                task.total_records = completion.total_records;
                task.imported_records = completion.imported_records;
                task.error_message = completion.error_message.clone();
                task.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(&id) {
            Some(task) if task.status != TaskStatus::Running => {
                task.status = TaskStatus::Pending;
                task.total_records = 0;
                task.imported_records = 0;
                task.error_message = None;
                task.started_at = None;
                task.completed_at = None;
            }
            _ => return Ok(false),
        }

        let mut file_ids = Vec::new();
        for file in state.files.values_mut().filter(|f| f.task_id == id) {
            file.status = FileStatus::Pending;
            file.records_count = 0;
            file.imported_count = 0;
            file.error_message = None;
            file.attempts = 0;
            file.claimed_by = None;
            file.heartbeat_at = None;
            file.processed_at = None;
            file_ids.push(file.file_id);
        }
        for file_id in file_ids {
            if let Some(upload) = state.uploads.get_mut(&file_id) {
                if upload.status == UploadStatus::Consumed {
                    upload.status = UploadStatus::Uploaded;
                }
            }
        }
        state.staging.clear();
        Ok(true)
    }

    async fn list_file_details(&self, task_id: Uuid) -> Result<Vec<ImportFileDetail>, StoreError> {
        let state = self.state.lock().await;
        let mut files: Vec<_> = state
            .files
            .values()
            .filter(|f| f.task_id == task_id)
            .cloned()
            .collect();
        files.sort_by_key(|f| f.position);
        Ok(files)
    }

    async fn get_file_detail(&self, id: Uuid) -> Result<Option<ImportFileDetail>, StoreError> {
        Ok(self.state.lock().await.files.get(&id).cloned())
    }

    async fn claim_files(
        &self,
        task_id: Uuid,
        limit: i64,
        worker: &str,
    ) -> Result<Vec<ImportFileDetail>, StoreError> {
        let mut state = self.state.lock().await;
        let mut pending: Vec<_> = state
            .files
            .values()
            .filter(|f| f.task_id == task_id && f.status == FileStatus::Pending)
            .map(|f| (f.position, f.id))
            .collect();
        pending.sort();
        pending.truncate(limit.max(0) as usize);

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(pending.len());
        for (_, id) in pending {
            if let Some(file) = state.files.get_mut(&id) {
                file.status = FileStatus::Processing;
                file.attempts += 1;
                file.claimed_by = Some(worker.to_string());
                file.heartbeat_at = Some(now);
                claimed.push(file.clone());
            }
        }
        Ok(claimed)
    }

    async fn heartbeat_file(&self, claim: &FileClaim) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if !state.holds(claim) {
            return Ok(false);
        }
        if let Some(file) = state.files.get_mut(&claim.file_id) {
            file.heartbeat_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn complete_file(
        &self,
        claim: &FileClaim,
        result: &FileResult,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if !state.holds(claim) {
            return Ok(false);
        }
        if let Some(file) = state.files.get_mut(&claim.file_id) {
            file.status = FileStatus::Completed;
            file.records_count = result.records_count;
            file.imported_count = result.imported_count;
            file.error_message = result.error_message.clone();
            file.processed_at = Some(Utc::now());
            file.heartbeat_at = None;
        }
        Ok(true)
    }

    async fn fail_file(&self, claim: &FileClaim, result: &FileResult) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if !state.holds(claim) {
            return Ok(false);
        }
        if let Some(file) = state.files.get_mut(&claim.file_id) {
            file.status = FileStatus::Failed;
            file.records_count = result.records_count;
            file.imported_count = 0;
            file.error_message = result.error_message.clone();
            file.processed_at = Some(Utc::now());
            file.heartbeat_at = None;
        }
        state.drop_staged(claim.file_id);
        Ok(true)
    }

    async fn reclaim_stale_files(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<ReclaimOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let mut outcome = ReclaimOutcome::default();
        let mut abandoned = Vec::new();
        let now = Utc::now();

        for file in state.files.values_mut() {
            let stale = file.status == FileStatus::Processing
                && file.heartbeat_at.map_or(true, |at| at < stale_before);
            if !stale {
                continue;
            }
            file.claimed_by = None;
            file.heartbeat_at = None;
            if file.attempts >= max_attempts {
                file.status = FileStatus::Failed;
                file.imported_count = 0;
                file.error_message = Some(abandoned_message(file.attempts));
                file.processed_at = Some(now);
                abandoned.push(file.id);
                outcome.abandoned += 1;
            } else {
                file.status = FileStatus::Pending;
                outcome.requeued += 1;
            }
        }

        for id in abandoned {
            state.drop_staged(id);
        }
        Ok(outcome)
    }

    async fn count_unfinished_files(&self, task_id: Uuid) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.unfinished(task_id))
    }

    async fn insert_staged(
        &self,
        claim: &FileClaim,
        rows: &[AcademicRecord],
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        if !state.holds(claim) {
            return Err(StoreError::ClaimLost(*claim));
        }
        state
            .staging
            .extend(rows.iter().cloned().map(|row| (claim.file_id, row)));
        Ok(rows.len() as u64)
    }

    async fn delete_staged(&self, claim: &FileClaim) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        if !state.holds(claim) {
            return Err(StoreError::ClaimLost(*claim));
        }
        Ok(state.drop_staged(claim.file_id))
    }

    async fn count_staged(&self) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.staging.len() as i64)
    }

    async fn truncate_staging(&self) -> Result<(), StoreError> {
        self.state.lock().await.staging.clear();
        Ok(())
    }

    async fn count_production(&self) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.production.len() as i64)
    }

    async fn replace_production(
        &self,
        task_id: Uuid,
        completion: &TaskCompletion,
    ) -> Result<SwapOutcome, StoreError> {
        let mut state = self.state.lock().await;

        let status = match state.tasks.get(&task_id) {
            Some(task) => task.status,
            None => return Ok(SwapOutcome::TaskMissing),
        };
        if status != TaskStatus::Running {
            return Ok(SwapOutcome::TaskNotRunning(status));
        }
        let unfinished = state.unfinished(task_id);
        if unfinished > 0 {
            return Ok(SwapOutcome::FilesNotTerminal(unfinished));
        }
        if state.staging.is_empty() {
            return Ok(SwapOutcome::NothingStaged);
        }
        if let Some(message) = state.cutover_fault.take() {
            return Err(StoreError::Unavailable(message));
        }

        let rows: Vec<AcademicRecord> = state.staging.drain(..).map(|(_, row)| row).collect();
        let count = rows.len() as u64;
        state.production = rows;

        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.status = TaskStatus::Completed;
            task.total_records = completion.total_records;
            task.imported_records = completion.imported_records;
            task.error_message = completion.error_message.clone();
            task.completed_at = Some(Utc::now());
        }

        Ok(SwapOutcome::Swapped { rows: count })
    }
}

/// Message stamped on a file that kept going stale
pub(crate) fn abandoned_message(attempts: i32) -> String {
    format!("abandoned after {attempts} attempts without progress")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(snh: &str) -> AcademicRecord {
        AcademicRecord {
            snh: snh.to_string(),
            course_id: Some("MATH101".to_string()),
            ..Default::default()
        }
    }

    async fn running_task_with_file(store: &MemoryRecordStore) -> (Uuid, Uuid) {
        let task = ImportTask::new_pending(1);
        let upload = UploadedFile {
            id: Uuid::new_v4(),
            original_name: "a.csv".to_string(),
            size_bytes: 1,
            checksum: String::new(),
            storage_key: "uploads/a.csv".to_string(),
            status: UploadStatus::Uploaded,
            uploaded_at: Utc::now(),
        };
        let file = ImportFileDetail::new_pending(task.id, &upload, 0);
        store.create_task(&task, &[file.clone()]).await.unwrap();
        assert!(store.begin_task(task.id).await.unwrap());
        (task.id, file.id)
    }

    #[tokio::test]
    async fn test_begin_task_truncates_staging_and_is_exclusive() {
        let store = MemoryRecordStore::new();
        store.seed_staging(Uuid::new_v4(), vec![record("leftover")]).await;

        let (_, _) = running_task_with_file(&store).await;
        assert_eq!(store.count_staged().await.unwrap(), 0);

        let second = ImportTask::new_pending(0);
        store.create_task(&second, &[]).await.unwrap();
        assert!(!store.begin_task(second.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_file_drops_its_staged_rows_only() {
        let store = MemoryRecordStore::new();
        let (task_id, file_id) = running_task_with_file(&store).await;
        let other = Uuid::new_v4();

        let claim = store.claim_files(task_id, 10, "w1").await.unwrap()[0].claim();
        assert_eq!(claim.file_id, file_id);
        store.insert_staged(&claim, &[record("a"), record("b")]).await.unwrap();
        store.seed_staging(other, vec![record("c")]).await;

        let failed = store
            .fail_file(
                &claim,
                &FileResult {
                    error_message: Some("boom".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(failed);
        assert_eq!(store.staged_rows().await, vec![(other, record("c"))]);

        // terminal is sticky
        assert!(!store.complete_file(&claim, &FileResult::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_production_checks_before_swapping() {
        let store = MemoryRecordStore::new();
        store.seed_production(vec![record("old")]).await;
        let (task_id, file_id) = running_task_with_file(&store).await;

        let outcome = store
            .replace_production(task_id, &TaskCompletion::default())
            .await
            .unwrap();
        assert_eq!(outcome, SwapOutcome::FilesNotTerminal(1));

        let claim = store.claim_files(task_id, 1, "w1").await.unwrap()[0].claim();
        assert_eq!(claim.file_id, file_id);
        store.insert_staged(&claim, &[record("new")]).await.unwrap();
        store
            .complete_file(
                &claim,
                &FileResult {
                    records_count: 1,
                    imported_count: 1,
                    error_message: None,
                },
            )
            .await
            .unwrap();

        let outcome = store
            .replace_production(task_id, &TaskCompletion::default())
            .await
            .unwrap();
        assert_eq!(outcome, SwapOutcome::Swapped { rows: 1 });
        assert_eq!(store.production_rows().await, vec![record("new")]);
        assert_eq!(store.count_staged().await.unwrap(), 0);

        let again = store
            .replace_production(task_id, &TaskCompletion::default())
            .await
            .unwrap();
        assert_eq!(again, SwapOutcome::TaskNotRunning(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_superseded_claim_cannot_write() {
        let store = MemoryRecordStore::new();
        let (task_id, file_id) = running_task_with_file(&store).await;

        let first = store.claim_files(task_id, 1, "w1").await.unwrap()[0].claim();
        store.insert_staged(&first, &[record("a1"), record("a2")]).await.unwrap();
        store.set_heartbeat(file_id, Utc::now() - chrono::Duration::hours(1)).await;
        let reclaimed = store
            .reclaim_stale_files(Utc::now() - chrono::Duration::minutes(10), 3)
            .await
            .unwrap();
        assert_eq!(reclaimed.requeued, 1);

        // requeued but not yet re-claimed: the old claim is already dead
        assert!(!store.heartbeat_file(&first).await.unwrap());

        let second = store.claim_files(task_id, 1, "w2").await.unwrap()[0].claim();
        assert_eq!(second.attempt, first.attempt + 1);
        store.delete_staged(&second).await.unwrap();
        store.insert_staged(&second, &[record("b1")]).await.unwrap();

        assert!(matches!(
            store.insert_staged(&first, &[record("a3")]).await,
            Err(StoreError::ClaimLost(c)) if c == first
        ));
        assert!(matches!(
            store.delete_staged(&first).await,
            Err(StoreError::ClaimLost(_))
        ));
        let result = FileResult { records_count: 3, imported_count: 3, error_message: None };
        assert!(!store.complete_file(&first, &result).await.unwrap());
        assert!(!store.fail_file(&first, &result).await.unwrap());

        let result = FileResult { records_count: 1, imported_count: 1, error_message: None };
        assert!(store.complete_file(&second, &result).await.unwrap());
        assert_eq!(store.staged_rows().await, vec![(file_id, record("b1"))]);
    }
}
