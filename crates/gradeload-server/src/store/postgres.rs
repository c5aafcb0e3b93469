//! PostgreSQL record store
//!
//! Queries are built at runtime (`sqlx::query` / `query_as` with `.bind`) so the
//! crate compiles without a live database. Every multi-statement operation
//! runs in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{ReclaimOutcome, RecordStore, StoreError, SwapOutcome};
use crate::import::types::{
    AcademicRecord, FileClaim, FileResult, ImportFileDetail, ImportTask, TaskCompletion, TaskStatus,
    UploadStatus, UploadedFile, ORIGIN_COLUMN, PRODUCTION_TABLE, RECORD_COLUMNS, STAGING_TABLE,
};

/// Serializes concurrent schema creation across processes
const SCHEMA_LOCK_KEY: i64 = 0x6772_6164_656c_6f61;

const SCHEMA_TABLES: [&str; 5] = [
    PRODUCTION_TABLE,
    STAGING_TABLE,
    "uploaded_files",
    "import_tasks",
    "import_file_details",
];

const SCHEMA_STATEMENTS: [&str; 9] = [
    r#"
    CREATE TABLE IF NOT EXISTS academic_results (
        snh               TEXT NOT NULL,
        semester_offered  TEXT,
        current_major     TEXT,
        course_id         TEXT,
        course_name       TEXT,
        grade             TEXT,
        grade_remark      TEXT,
        course_type       TEXT,
        course_attribute  TEXT,
        hours             TEXT,
        credit            TEXT,
        offering_unit     TEXT,
        tags              TEXT,
        description       TEXT,
        exam_type         TEXT,
        assessment_method TEXT,
        year              INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS academic_results_staging (
        LIKE academic_results INCLUDING DEFAULTS
    )
    "#,
    "ALTER TABLE academic_results_staging ADD COLUMN IF NOT EXISTS import_file_id UUID NOT NULL",
    r#"
    CREATE INDEX IF NOT EXISTS academic_results_staging_origin_idx
        ON academic_results_staging (import_file_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS uploaded_files (
        id            UUID PRIMARY KEY,
        original_name TEXT NOT NULL,
        size_bytes    BIGINT NOT NULL,
        checksum      TEXT NOT NULL,
        storage_key   TEXT NOT NULL,
        status        TEXT NOT NULL DEFAULT 'uploaded'
                      CHECK (status IN ('uploaded', 'consumed', 'expired')),
        uploaded_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS import_tasks (
        id               UUID PRIMARY KEY,
        status           TEXT NOT NULL
                         CHECK (status IN ('pending', 'running', 'completed', 'failed')),
        total_files      INTEGER NOT NULL,
        total_records    BIGINT NOT NULL DEFAULT 0,
        imported_records BIGINT NOT NULL DEFAULT 0,
        error_message    TEXT,
        created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        started_at       TIMESTAMPTZ,
        completed_at     TIMESTAMPTZ
    )
    "#,
    // staging is shared, so at most one task may load at a time
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS import_tasks_single_running_idx
        ON import_tasks (status) WHERE status = 'running'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS import_file_details (
        id             UUID PRIMARY KEY,
        task_id        UUID NOT NULL REFERENCES import_tasks (id),
        file_id        UUID NOT NULL REFERENCES uploaded_files (id),
        file_name      TEXT NOT NULL,
        position       INTEGER NOT NULL,
        status         TEXT NOT NULL
                       CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
        records_count  BIGINT NOT NULL DEFAULT 0,
        imported_count BIGINT NOT NULL DEFAULT 0,
        error_message  TEXT,
        attempts       INTEGER NOT NULL DEFAULT 0,
        claimed_by     TEXT,
        heartbeat_at   TIMESTAMPTZ,
        processed_at   TIMESTAMPTZ,
        UNIQUE (task_id, file_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS import_file_details_task_status_idx
        ON import_file_details (task_id, status)
    "#,
];

const TASK_SELECT: &str = r#"
    SELECT t.id, t.status, t.total_files, t.total_records, t.imported_records,
           t.error_message, t.created_at, t.started_at, t.completed_at,
           (SELECT COUNT(*) FROM import_file_details d
             WHERE d.task_id = t.id AND d.status IN ('completed', 'failed')) AS processed_files
    FROM import_tasks t
"#;

const FILE_COLUMNS: &str = "id, task_id, file_id, file_name, position, status, records_count, \
     imported_count, error_message, attempts, claimed_by, heartbeat_at, processed_at";

const UPLOAD_COLUMNS: &str =
    "id, original_name, size_bytes, checksum, storage_key, status, uploaded_at";

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Share-lock the claimed file row for the rest of the transaction, so a
    /// reclaim cannot move it while this claim writes staging rows
    async fn lock_claim(conn: &mut PgConnection, claim: &FileClaim) -> Result<(), StoreError> {
        let held: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM import_file_details \
             WHERE id = $1 AND status = 'processing' AND attempts = $2 FOR SHARE",
        )
        .bind(claim.file_id)
        .bind(claim.attempt)
        .fetch_optional(&mut *conn)
        .await?;
        match held {
            Some(_) => Ok(()),
            None => Err(StoreError::ClaimLost(*claim)),
        }
    }

    async fn schema_present(&self) -> Result<bool, StoreError> {
        let missing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM UNNEST($1::text[]) AS t(name) WHERE to_regclass(t.name) IS NULL",
        )
        .bind(SCHEMA_TABLES.to_vec())
        .fetch_one(&self.pool)
        .await?;
        Ok(missing == 0)
    }
}

fn record_column_list() -> String {
    RECORD_COLUMNS.join(", ")
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self))]
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        if self.schema_present().await? {
            debug!("Import schema already present");
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("Import schema created");
        Ok(())
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let columns = sqlx::query_scalar(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        Ok(columns)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_upload(&self, upload: &UploadedFile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO uploaded_files (id, original_name, size_bytes, checksum, storage_key, status, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(upload.id)
        .bind(&upload.original_name)
        .bind(upload.size_bytes)
        .bind(&upload.checksum)
        .bind(&upload.storage_key)
        .bind(upload.status.as_str())
        .bind(upload.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_upload(&self, id: Uuid) -> Result<Option<UploadedFile>, StoreError> {
        let row = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploaded_files WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UploadedFile::try_from).transpose()
    }

    async fn list_uploads(&self, status: UploadStatus) -> Result<Vec<UploadedFile>, StoreError> {
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploaded_files WHERE status = $1 ORDER BY uploaded_at"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UploadedFile::try_from).collect()
    }

    async fn set_upload_status(&self, id: Uuid, status: UploadStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE uploaded_files SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn uploads_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UploadedFile>, StoreError> {
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploaded_files \
             WHERE status <> 'expired' AND uploaded_at < $1 ORDER BY uploaded_at"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UploadedFile::try_from).collect()
    }

    #[instrument(skip(self, task, files), fields(task_id = %task.id, files = files.len()))]
    async fn create_task(
        &self,
        task: &ImportTask,
        files: &[ImportFileDetail],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO import_tasks (id, status, total_files, total_records, imported_records, created_at)
            VALUES ($1, $2, $3, 0, 0, $4)
            "#,
        )
        .bind(task.id)
        .bind(task.status.as_str())
        .bind(task.total_files)
        .bind(task.created_at)
        .execute(&mut *tx)
        .await?;

        for file in files {
            sqlx::query(
                r#"
                INSERT INTO import_file_details (id, task_id, file_id, file_name, position, status)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(file.id)
            .bind(file.task_id)
            .bind(file.file_id)
            .bind(&file.file_name)
            .bind(file.position)
            .bind(file.status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<ImportTask>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!("{TASK_SELECT} WHERE t.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ImportTask::try_from).transpose()
    }

    async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> Result<Vec<ImportTask>, StoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "{TASK_SELECT} WHERE ($1::text IS NULL OR t.status = $1) \
             ORDER BY t.created_at DESC LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ImportTask::try_from).collect()
    }

    async fn running_task(&self) -> Result<Option<ImportTask>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "{TASK_SELECT} WHERE t.status = 'running' LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(ImportTask::try_from).transpose()
    }

    async fn oldest_pending_task(&self) -> Result<Option<ImportTask>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "{TASK_SELECT} WHERE t.status = 'pending' ORDER BY t.created_at LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(ImportTask::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn begin_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let started = sqlx::query(
            r#"
            UPDATE import_tasks
            SET status = 'running', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
              AND NOT EXISTS (SELECT 1 FROM import_tasks WHERE status = 'running')
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await;

        match started {
            Ok(result) if result.rows_affected() == 1 => {}
            Ok(_) => return Ok(false),
            // another process started a task between our check and update
            Err(e) if is_unique_violation(&e) => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        sqlx::query(&format!("TRUNCATE {STAGING_TABLE}"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn finish_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        completion: &TaskCompletion,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE import_tasks
            SET status = $2, total_records = $3, imported_records = $4,
                error_message = $5, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(completion.total_records)
        .bind(completion.imported_records)
        .bind(&completion.error_message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn reset_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let reset = sqlx::query(
            r#"
            UPDATE import_tasks
            SET status = 'pending', total_records = 0, imported_records = 0,
                error_message = NULL, started_at = NULL, completed_at = NULL
            WHERE id = $1 AND status <> 'running'
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if reset.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE import_file_details
            SET status = 'pending', records_count = 0, imported_count = 0, error_message = NULL,
                attempts = 0, claimed_by = NULL, heartbeat_at = NULL, processed_at = NULL
            WHERE task_id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE uploaded_files SET status = 'uploaded'
            WHERE status = 'consumed'
              AND id IN (SELECT file_id FROM import_file_details WHERE task_id = $1)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!("TRUNCATE {STAGING_TABLE}"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_file_details(&self, task_id: Uuid) -> Result<Vec<ImportFileDetail>, StoreError> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM import_file_details WHERE task_id = $1 ORDER BY position"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ImportFileDetail::try_from).collect()
    }

    async fn get_file_detail(&self, id: Uuid) -> Result<Option<ImportFileDetail>, StoreError> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM import_file_details WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ImportFileDetail::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn claim_files(
        &self,
        task_id: Uuid,
        limit: i64,
        worker: &str,
    ) -> Result<Vec<ImportFileDetail>, StoreError> {
        let mut rows = sqlx::query_as::<_, FileRow>(&format!(
            r#"
            UPDATE import_file_details
            SET status = 'processing', attempts = attempts + 1,
                claimed_by = $3, heartbeat_at = NOW()
            WHERE id IN (
                SELECT id FROM import_file_details
                WHERE task_id = $1 AND status = 'pending'
                ORDER BY position
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(task_id)
        .bind(limit)
        .bind(worker)
        .fetch_all(&self.pool)
        .await?;

        rows.sort_by_key(|r| r.position);
        rows.into_iter().map(ImportFileDetail::try_from).collect()
    }

    async fn heartbeat_file(&self, claim: &FileClaim) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE import_file_details SET heartbeat_at = NOW() \
             WHERE id = $1 AND status = 'processing' AND attempts = $2",
        )
        .bind(claim.file_id)
        .bind(claim.attempt)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn complete_file(
        &self,
        claim: &FileClaim,
        result: &FileResult,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE import_file_details
            SET status = 'completed', records_count = $3, imported_count = $4,
                error_message = $5, processed_at = NOW(), heartbeat_at = NULL
            WHERE id = $1 AND status = 'processing' AND attempts = $2
            "#,
        )
        .bind(claim.file_id)
        .bind(claim.attempt)
        .bind(result.records_count)
        .bind(result.imported_count)
        .bind(&result.error_message)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn fail_file(&self, claim: &FileClaim, result: &FileResult) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE import_file_details
            SET status = 'failed', records_count = $3, imported_count = 0,
                error_message = $4, processed_at = NOW(), heartbeat_at = NULL
            WHERE id = $1 AND status = 'processing' AND attempts = $2
            "#,
        )
        .bind(claim.file_id)
        .bind(claim.attempt)
        .bind(result.records_count)
        .bind(&result.error_message)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(&format!("DELETE FROM {STAGING_TABLE} WHERE {ORIGIN_COLUMN} = $1"))
            .bind(claim.file_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn reclaim_stale_files(
        &self,
        stale_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<ReclaimOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            UPDATE import_file_details
            SET status = CASE WHEN attempts >= $2 THEN 'failed' ELSE 'pending' END,
                imported_count = CASE WHEN attempts >= $2 THEN 0 ELSE imported_count END,
                error_message = CASE WHEN attempts >= $2
                    THEN 'abandoned after ' || attempts || ' attempts without progress'
                    ELSE error_message END,
                processed_at = CASE WHEN attempts >= $2 THEN NOW() ELSE processed_at END,
                claimed_by = NULL,
                heartbeat_at = NULL
            WHERE status = 'processing' AND (heartbeat_at IS NULL OR heartbeat_at < $1)
            RETURNING id, status
            "#,
        )
        .bind(stale_before)
        .bind(max_attempts)
        .fetch_all(&mut *tx)
        .await?;

        let abandoned: Vec<Uuid> = rows
            .iter()
            .filter(|(_, status)| status == "failed")
            .map(|(id, _)| *id)
            .collect();

        if !abandoned.is_empty() {
            sqlx::query(&format!(
                "DELETE FROM {STAGING_TABLE} WHERE {ORIGIN_COLUMN} = ANY($1)"
            ))
            .bind(&abandoned)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(ReclaimOutcome {
            requeued: (rows.len() - abandoned.len()) as u64,
            abandoned: abandoned.len() as u64,
        })
    }

    async fn count_unfinished_files(&self, task_id: Uuid) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM import_file_details \
             WHERE task_id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_staged(
        &self,
        claim: &FileClaim,
        rows: &[AcademicRecord],
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_claim(&mut tx, claim).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let origin = claim.file_id;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {STAGING_TABLE} ({ORIGIN_COLUMN}, {}) ",
            record_column_list()
        ));
        builder.push_values(rows, |mut b, row| {
            b.push_bind(origin)
                .push_bind(&row.snh)
                .push_bind(&row.semester_offered)
                .push_bind(&row.current_major)
                .push_bind(&row.course_id)
                .push_bind(&row.course_name)
                .push_bind(&row.grade)
                .push_bind(&row.grade_remark)
                .push_bind(&row.course_type)
                .push_bind(&row.course_attribute)
                .push_bind(&row.hours)
                .push_bind(&row.credit)
                .push_bind(&row.offering_unit)
                .push_bind(&row.tags)
                .push_bind(&row.description)
                .push_bind(&row.exam_type)
                .push_bind(&row.assessment_method)
                .push_bind(row.year);
        });

        let result = builder.build().execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn delete_staged(&self, claim: &FileClaim) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_claim(&mut tx, claim).await?;
        let result = sqlx::query(&format!(
            "DELETE FROM {STAGING_TABLE} WHERE {ORIGIN_COLUMN} = $1"
        ))
        .bind(claim.file_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn count_staged(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {STAGING_TABLE}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn truncate_staging(&self) -> Result<(), StoreError> {
        sqlx::query(&format!("TRUNCATE {STAGING_TABLE}"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_production(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {PRODUCTION_TABLE}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    #[instrument(skip(self, completion))]
    async fn replace_production(
        &self,
        task_id: Uuid,
        completion: &TaskCompletion,
    ) -> Result<SwapOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM import_tasks WHERE id = $1 FOR UPDATE")
                .bind(task_id)
                .fetch_optional(&mut *tx)
                .await?;
        let status: TaskStatus = match status {
            Some(s) => s.parse()?,
            None => return Ok(SwapOutcome::TaskMissing),
        };
        if status != TaskStatus::Running {
            return Ok(SwapOutcome::TaskNotRunning(status));
        }

        let unfinished: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM import_file_details \
             WHERE task_id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;
        if unfinished > 0 {
            return Ok(SwapOutcome::FilesNotTerminal(unfinished));
        }

        let staged: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {STAGING_TABLE}"))
            .fetch_one(&mut *tx)
            .await?;
        if staged == 0 {
            return Ok(SwapOutcome::NothingStaged);
        }

        let columns = record_column_list();
        sqlx::query(&format!("DELETE FROM {PRODUCTION_TABLE}"))
            .execute(&mut *tx)
            .await?;
        let copied = sqlx::query(&format!(
            "INSERT INTO {PRODUCTION_TABLE} ({columns}) SELECT {columns} FROM {STAGING_TABLE}"
        ))
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query(&format!("TRUNCATE {STAGING_TABLE}"))
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE import_tasks
            SET status = 'completed', total_records = $2, imported_records = $3,
                error_message = $4, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(completion.total_records)
        .bind(completion.imported_records)
        .bind(&completion.error_message)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(task_id = %task_id, rows = copied, "Production replaced from staging");
        Ok(SwapOutcome::Swapped { rows: copied })
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    status: String,
    total_files: i32,
    total_records: i64,
    imported_records: i64,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    processed_files: i64,
}

impl TryFrom<TaskRow> for ImportTask {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            status: row.status.parse()?,
            total_files: row.total_files,
            processed_files: row.processed_files as i32,
            total_records: row.total_records,
            imported_records: row.imported_records,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FileRow {
    id: Uuid,
    task_id: Uuid,
    file_id: Uuid,
    file_name: String,
    position: i32,
    status: String,
    records_count: i64,
    imported_count: i64,
    error_message: Option<String>,
    attempts: i32,
    claimed_by: Option<String>,
    heartbeat_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<FileRow> for ImportFileDetail {
    type Error = StoreError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            task_id: row.task_id,
            file_id: row.file_id,
            file_name: row.file_name,
            position: row.position,
            status: row.status.parse()?,
            records_count: row.records_count,
            imported_count: row.imported_count,
            error_message: row.error_message,
            attempts: row.attempts,
            claimed_by: row.claimed_by,
            heartbeat_at: row.heartbeat_at,
            processed_at: row.processed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UploadRow {
    id: Uuid,
    original_name: String,
    size_bytes: i64,
    checksum: String,
    storage_key: String,
    status: String,
    uploaded_at: DateTime<Utc>,
}

impl TryFrom<UploadRow> for UploadedFile {
    type Error = StoreError;

    fn try_from(row: UploadRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            original_name: row.original_name,
            size_bytes: row.size_bytes,
            checksum: row.checksum,
            storage_key: row.storage_key,
            status: row.status.parse()?,
            uploaded_at: row.uploaded_at,
        })
    }
}
