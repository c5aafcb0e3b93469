//! Create an import task
//!
//! With `file_ids` the task covers exactly those uploads; without it the task
//! covers every upload still in `uploaded` status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::import::orchestrator::CreateTaskError;
use crate::import::types::TaskStatus;
use crate::import::ImportPipeline;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTaskCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub total_files: i32,
    pub created_at: DateTime<Utc>,
}

#[tracing::instrument(skip(pipeline))]
pub async fn handle(
    pipeline: ImportPipeline,
    command: CreateTaskCommand,
) -> Result<CreateTaskResponse, CreateTaskError> {
    let task = match command.file_ids {
        Some(ids) => pipeline.orchestrator.create_task(&ids).await?,
        None => pipeline.orchestrator.create_task_from_uploaded().await?,
    };

    Ok(CreateTaskResponse {
        task_id: task.id,
        status: task.status,
        total_files: task.total_files,
        created_at: task.created_at,
    })
}
