//! Store an uploaded spreadsheet

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::import::uploads::UploadError;
use crate::import::ImportPipeline;

const MAX_FILE_NAME_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct UploadFileCommand {
    pub file_name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFileResponse {
    pub file_id: Uuid,
    pub file_name: String,
    pub size: i64,
    pub checksum: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadFileError {
    #[error("File name is required")]
    FileNameRequired,

    #[error("File name must be at most 255 characters")]
    FileNameLength,

    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl From<UploadFileError> for AppError {
    fn from(err: UploadFileError) -> Self {
        match err {
            UploadFileError::FileNameRequired | UploadFileError::FileNameLength => {
                AppError::BadRequest(err.to_string())
            }
            UploadFileError::Upload(e) => e.into(),
        }
    }
}

impl UploadFileCommand {
    pub fn validate(&self) -> Result<(), UploadFileError> {
        let name = self.file_name.trim();
        if name.is_empty() {
            return Err(UploadFileError::FileNameRequired);
        }
        if name.chars().count() > MAX_FILE_NAME_LEN {
            return Err(UploadFileError::FileNameLength);
        }
        Ok(())
    }
}

#[tracing::instrument(skip(pipeline, command), fields(file_name = %command.file_name, size = command.content.len()))]
pub async fn handle(
    pipeline: ImportPipeline,
    command: UploadFileCommand,
) -> Result<UploadFileResponse, UploadFileError> {
    command.validate()?;

    let upload = pipeline
        .uploads
        .register(command.file_name.trim(), command.content)
        .await?;

    Ok(UploadFileResponse {
        file_id: upload.id,
        file_name: upload.original_name,
        size: upload.size_bytes,
        checksum: upload.checksum,
    })
}
