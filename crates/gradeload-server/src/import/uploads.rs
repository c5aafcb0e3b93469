//! Uploaded-file registry
//!
//! Pairs the blob in [`FileStorage`] with its [`UploadedFile`] metadata row.
//! This is the file-storage collaborator the ingestor and orchestrator use:
//! `get_file`, `list_uploaded` and `purge_older_than`.

use chrono::{DateTime, Utc};
use gradeload_common::checksum::{sha256_hex, verify_sha256};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::parser::{SheetFormat, SUPPORTED_EXTENSIONS};
use super::types::{UploadStatus, UploadedFile};
use crate::storage::{FileStorage, FileStorageError};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Unsupported file type '{0}', expected one of: {exts}", exts = SUPPORTED_EXTENSIONS.join(", "))]
    UnsupportedType(String),

    #[error("File is empty")]
    Empty,

    #[error("Upload not found: {0}")]
    NotFound(Uuid),

    #[error("Upload {id} is {status}, not uploaded")]
    NotUploaded { id: Uuid, status: UploadStatus },

    #[error("Stored bytes for upload {0} do not match their checksum")]
    Corrupted(Uuid),

    #[error(transparent)]
    Storage(#[from] FileStorageError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one retention purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub expired: usize,
    pub failed: usize,
}

pub struct UploadRegistry {
    store: Arc<dyn RecordStore>,
    storage: Arc<dyn FileStorage>,
}

impl UploadRegistry {
    pub fn new(store: Arc<dyn RecordStore>, storage: Arc<dyn FileStorage>) -> Self {
        Self { store, storage }
    }

    /// Store `data` and record it as `uploaded`
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn register(
        &self,
        original_name: &str,
        data: Vec<u8>,
    ) -> Result<UploadedFile, UploadError> {
        if SheetFormat::from_file_name(original_name).is_none() {
            return Err(UploadError::UnsupportedType(original_name.to_string()));
        }
        if data.is_empty() {
            return Err(UploadError::Empty);
        }

        let id = Uuid::new_v4();
        let extension = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let upload = UploadedFile {
            id,
            original_name: original_name.to_string(),
            size_bytes: data.len() as i64,
            checksum: sha256_hex(&data),
            storage_key: format!("uploads/{id}.{extension}"),
            status: UploadStatus::Uploaded,
            uploaded_at: Utc::now(),
        };

        self.storage.put(&upload.storage_key, data).await?;
        if let Err(e) = self.store.insert_upload(&upload).await {
            // do not leave an orphan blob behind
            let _ = self.storage.remove(&upload.storage_key).await;
            return Err(e.into());
        }

        info!(file_id = %upload.id, name = %upload.original_name, "File uploaded");
        Ok(upload)
    }

    pub async fn get(&self, id: Uuid) -> Result<UploadedFile, UploadError> {
        self.store
            .get_upload(id)
            .await?
            .ok_or(UploadError::NotFound(id))
    }

    /// Bytes of an upload that is still in `uploaded` status, checksum verified
    #[instrument(skip(self))]
    pub async fn get_file(&self, id: Uuid) -> Result<(UploadedFile, Vec<u8>), UploadError> {
        let upload = self.get(id).await?;
        if upload.status != UploadStatus::Uploaded {
            return Err(UploadError::NotUploaded {
                id,
                status: upload.status,
            });
        }

        let data = self.read_verified(&upload).await?;
        Ok((upload, data))
    }

    /// Bytes of any upload whose bytes are still kept, imported or not
    #[instrument(skip(self))]
    pub async fn download(&self, id: Uuid) -> Result<(UploadedFile, Vec<u8>), UploadError> {
        let upload = self.get(id).await?;
        if upload.status == UploadStatus::Expired {
            return Err(UploadError::NotFound(id));
        }
        let data = self.read_verified(&upload).await?;
        Ok((upload, data))
    }

    async fn read_verified(&self, upload: &UploadedFile) -> Result<Vec<u8>, UploadError> {
        let data = match self.storage.get(&upload.storage_key).await {
            Ok(data) => data,
            Err(FileStorageError::NotFound(_)) => return Err(UploadError::NotFound(upload.id)),
            Err(e) => return Err(e.into()),
        };
        verify_sha256(&data, &upload.checksum).map_err(|_| UploadError::Corrupted(upload.id))?;
        Ok(data)
    }

    pub async fn list_uploaded(&self) -> Result<Vec<UploadedFile>, UploadError> {
        Ok(self.store.list_uploads(UploadStatus::Uploaded).await?)
    }

    pub async fn mark_consumed(&self, id: Uuid) -> Result<(), UploadError> {
        self.store
            .set_upload_status(id, UploadStatus::Consumed)
            .await?;
        Ok(())
    }

    /// Remove the bytes and mark the upload `expired`
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<UploadedFile, UploadError> {
        let mut upload = self.get(id).await?;
        self.expire(&upload).await?;
        upload.status = UploadStatus::Expired;
        Ok(upload)
    }

    /// Expire every upload older than `age`, whatever task references it
    #[instrument(skip(self))]
    pub async fn purge_older_than(&self, age: chrono::Duration) -> Result<PurgeReport, UploadError> {
        let cutoff: DateTime<Utc> = Utc::now() - age;
        let mut report = PurgeReport::default();

        for upload in self.store.uploads_older_than(cutoff).await? {
            match self.expire(&upload).await {
                Ok(()) => report.expired += 1,
                Err(e) => {
                    warn!(file_id = %upload.id, error = %e, "Failed to purge upload");
                    report.failed += 1;
                }
            }
        }

        if report.expired > 0 || report.failed > 0 {
            info!(expired = report.expired, failed = report.failed, "Upload purge finished");
        }
        Ok(report)
    }

    async fn expire(&self, upload: &UploadedFile) -> Result<(), UploadError> {
        self.storage.remove(&upload.storage_key).await?;
        self.store
            .set_upload_status(upload.id, UploadStatus::Expired)
            .await?;
        Ok(())
    }
}
