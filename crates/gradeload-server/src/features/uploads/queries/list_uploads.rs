//! Uploads still waiting to be imported

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::import::types::UploadedFile;
use crate::import::uploads::UploadError;
use crate::import::ImportPipeline;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadListItem {
    pub file_id: Uuid,
    pub file_name: String,
    pub size: i64,
    pub uploaded_at: DateTime<Utc>,
}

impl From<UploadedFile> for UploadListItem {
    fn from(upload: UploadedFile) -> Self {
        Self {
            file_id: upload.id,
            file_name: upload.original_name,
            size: upload.size_bytes,
            uploaded_at: upload.uploaded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadListResponse {
    pub files: Vec<UploadListItem>,
    pub total_size: i64,
}

pub async fn handle(pipeline: ImportPipeline) -> Result<UploadListResponse, UploadError> {
    let files: Vec<UploadListItem> = pipeline
        .uploads
        .list_uploaded()
        .await?
        .into_iter()
        .map(UploadListItem::from)
        .collect();
    let total_size = files.iter().map(|f| f.size).sum();
    Ok(UploadListResponse { files, total_size })
}
