//! Promote a task's staged rows to production

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::import::cutover::{SwapError, SwapReport};
use crate::import::ImportPipeline;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapCommand {
    pub task_id: Uuid,
}

#[tracing::instrument(skip(pipeline))]
pub async fn handle(pipeline: ImportPipeline, command: SwapCommand) -> Result<SwapReport, SwapError> {
    pipeline.cutover.swap(command.task_id).await
}
