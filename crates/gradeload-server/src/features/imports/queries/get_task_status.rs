//! Task progress with per-file detail

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::import::orchestrator::TaskStatusReport;
use crate::import::ImportPipeline;
use crate::store::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskStatusQuery {
    pub task_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum GetTaskStatusError {
    #[error("Import task {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GetTaskStatusError> for AppError {
    fn from(err: GetTaskStatusError) -> Self {
        match err {
            GetTaskStatusError::NotFound(_) => AppError::NotFound(err.to_string()),
            GetTaskStatusError::Store(e) => e.into(),
        }
    }
}

pub async fn handle(
    pipeline: ImportPipeline,
    query: GetTaskStatusQuery,
) -> Result<TaskStatusReport, GetTaskStatusError> {
    pipeline
        .orchestrator
        .get_status(query.task_id)
        .await?
        .ok_or(GetTaskStatusError::NotFound(query.task_id))
}
