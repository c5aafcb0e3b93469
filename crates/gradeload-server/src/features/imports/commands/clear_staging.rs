//! Empty the staging table, optionally resetting a task to run again

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::import::cutover::{ClearReport, ClearStagingError};
use crate::import::ImportPipeline;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearStagingCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_task_id: Option<Uuid>,
}

#[tracing::instrument(skip(pipeline))]
pub async fn handle(
    pipeline: ImportPipeline,
    command: ClearStagingCommand,
) -> Result<ClearReport, ClearStagingError> {
    pipeline.cutover.clear_staging(command.reset_task_id).await
}
