//! Shared fixtures for gradeload integration tests
//!
//! [`Harness`] wires an [`ImportPipeline`] over the in-memory record store and
//! a local file store in a temporary directory. [`TestPostgres`] starts a
//! throwaway PostgreSQL container for the tests that need the real store.

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_xlsxwriter::Workbook;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

use gradeload_server::import::{ImportConfig, ImportPipeline};
use gradeload_server::storage::{FileStorage, FileStorageError, LocalFileStorage};
use gradeload_server::store::MemoryRecordStore;

// ============================================================================
// In-memory pipeline
// ============================================================================

pub struct Harness {
    dir: TempDir,
    pub store: Arc<MemoryRecordStore>,
    pub pipeline: ImportPipeline,
}

impl Harness {
    pub fn new(config: ImportConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(LocalFileStorage::new(dir.path()));
        Self::with_storage(dir, storage, config)
    }

    pub fn with_storage(dir: TempDir, storage: Arc<dyn FileStorage>, config: ImportConfig) -> Self {
        let store = Arc::new(MemoryRecordStore::new());
        let pipeline = ImportPipeline::new(store.clone(), storage, config);
        Self {
            dir,
            store,
            pipeline,
        }
    }

    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub async fn upload(&self, name: &str, bytes: Vec<u8>) -> Uuid {
        self.pipeline.uploads.register(name, bytes).await.unwrap().id
    }
}

/// Defaults with automatic cutover switched off, so tests decide when to swap
pub fn manual_cutover() -> ImportConfig {
    ImportConfig {
        auto_cutover: false,
        sweeper_enabled: false,
        ..ImportConfig::default()
    }
}

/// A CSV with `rows` valid records, student numbers prefixed with `prefix`
pub fn grades_csv(prefix: &str, rows: usize) -> Vec<u8> {
    let mut out = String::from("SNH,Semester_Offered,Course_ID,Course_Name,Grade,Credit,Year\n");
    for i in 0..rows {
        out.push_str(&format!(
            "{prefix}{i:05},2023-2024-1,CS{:03},Course {},{},3,2023\n",
            i % 7,
            i % 7,
            55 + i % 45
        ));
    }
    out.into_bytes()
}

/// An .xlsx workbook with `rows` valid records
pub fn grades_xlsx(prefix: &str, rows: usize) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, header) in ["SNH", "Course_ID", "Course_Name", "Grade", "Year"]
        .iter()
        .enumerate()
    {
        sheet.write_string(0, col as u16, *header).unwrap();
    }
    for i in 0..rows {
        let row = (i + 1) as u32;
        sheet.write_string(row, 0, format!("{prefix}{i:05}")).unwrap();
        sheet.write_string(row, 1, "MA101").unwrap();
        sheet.write_string(row, 2, "Calculus").unwrap();
        sheet.write_number(row, 3, 70.0).unwrap();
        sheet.write_number(row, 4, 2024.0).unwrap();
    }
    workbook.save_to_buffer().unwrap()
}

/// File storage whose reads never finish, for exercising the per-file timeout
pub struct StallingStorage {
    pub inner: LocalFileStorage,
}

#[async_trait]
impl FileStorage for StallingStorage {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), FileStorageError> {
        self.inner.put(key, data).await
    }

    async fn get(&self, _key: &str) -> Result<Vec<u8>, FileStorageError> {
        std::future::pending().await
    }

    async fn remove(&self, key: &str) -> Result<(), FileStorageError> {
        self.inner.remove(key).await
    }

    fn describe(&self) -> String {
        format!("stalling({})", self.inner.describe())
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
