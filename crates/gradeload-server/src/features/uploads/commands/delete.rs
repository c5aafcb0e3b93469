//! Remove an uploaded spreadsheet

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::import::types::UploadStatus;
use crate::import::uploads::UploadError;
use crate::import::ImportPipeline;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUploadCommand {
    pub file_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUploadResponse {
    pub file_id: Uuid,
    pub status: UploadStatus,
}

#[tracing::instrument(skip(pipeline))]
pub async fn handle(
    pipeline: ImportPipeline,
    command: DeleteUploadCommand,
) -> Result<DeleteUploadResponse, UploadError> {
    let upload = pipeline.uploads.delete(command.file_id).await?;
    Ok(DeleteUploadResponse {
        file_id: upload.id,
        status: upload.status,
    })
}
