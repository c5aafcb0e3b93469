//! Bulk grade-import pipeline
//!
//! Uploaded spreadsheets are parsed into a staging table, one task at a time,
//! and promoted to the production table in a single transaction once every
//! file of the task is terminal.
//!
//! - [`schema`]: table existence and shape checks
//! - [`uploads`]: uploaded-file registry over [`crate::storage`]
//! - [`parser`]: spreadsheet to [`types::AcademicRecord`]
//! - [`ingestor`]: one file into staging
//! - [`orchestrator`]: task lifecycle and progress
//! - [`cutover`]: staging to production swap
//! - [`processor`]: bounded, resumable sweeps
//! - [`scheduler`]: periodic sweeps and retention purge

use std::sync::Arc;

use crate::storage::FileStorage;
use crate::store::RecordStore;

pub mod config;
pub mod cutover;
pub mod ingestor;
pub mod orchestrator;
pub mod parser;
pub mod processor;
pub mod scheduler;
pub mod schema;
pub mod types;
pub mod uploads;

pub use config::ImportConfig;
pub use cutover::CutoverController;
pub use ingestor::FileIngestor;
pub use orchestrator::TaskOrchestrator;
pub use processor::QueueProcessor;
pub use scheduler::Sweeper;
pub use schema::SchemaGuard;
pub use uploads::UploadRegistry;

/// Every pipeline component, wired over one record store and file storage
#[derive(Clone)]
pub struct ImportPipeline {
    pub store: Arc<dyn RecordStore>,
    pub schema: Arc<SchemaGuard>,
    pub uploads: Arc<UploadRegistry>,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub cutover: Arc<CutoverController>,
    pub processor: Arc<QueueProcessor>,
    pub config: ImportConfig,
}

impl ImportPipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        storage: Arc<dyn FileStorage>,
        config: ImportConfig,
    ) -> Self {
        let schema = Arc::new(SchemaGuard::new(store.clone()));
        let uploads = Arc::new(UploadRegistry::new(store.clone(), storage));
        let orchestrator = Arc::new(TaskOrchestrator::new(store.clone(), schema.clone()));
        let cutover = Arc::new(CutoverController::new(store.clone(), schema.clone()));
        let ingestor = Arc::new(FileIngestor::new(
            store.clone(),
            uploads.clone(),
            config.batch_size,
        ));
        let processor = Arc::new(QueueProcessor::new(
            store.clone(),
            schema.clone(),
            orchestrator.clone(),
            ingestor,
            cutover.clone(),
            config.clone(),
        ));

        Self {
            store,
            schema,
            uploads,
            orchestrator,
            cutover,
            processor,
            config,
        }
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.processor.clone(),
            self.uploads.clone(),
            self.config.clone(),
        )
    }
}
