//! File ingestor
//!
//! Loads one claimed file into staging. Every staged row carries the file
//! detail id, so a retry first deletes what an earlier attempt left behind.
//! Every write is made under the claim the sweep took, so a worker whose
//! file was reclaimed stops at its next write and leaves the file to the
//! new claimant. Errors never escape [`FileIngestor::ingest_file`]; they end
//! up in the file detail's status and message.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::parser::{parse_spreadsheet, ParseError};
use super::types::{FileClaim, FileResult, FileStatus, ImportFileDetail};
use super::uploads::{UploadError, UploadRegistry};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Error)]
enum IngestError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Parser task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IngestError {
    fn is_claim_lost(&self) -> bool {
        matches!(self, IngestError::Store(StoreError::ClaimLost(_)))
    }
}

/// Counts recorded for a file once `ingest_file` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub status: FileStatus,
    pub imported: i64,
    pub total: i64,
}

impl IngestOutcome {
    fn recorded(detail: &ImportFileDetail) -> Self {
        Self {
            status: detail.status,
            imported: detail.imported_count,
            total: detail.records_count,
        }
    }
}

pub struct FileIngestor {
    store: Arc<dyn RecordStore>,
    uploads: Arc<UploadRegistry>,
    batch_size: usize,
}

impl FileIngestor {
    pub fn new(store: Arc<dyn RecordStore>, uploads: Arc<UploadRegistry>, batch_size: usize) -> Self {
        Self {
            store,
            uploads,
            batch_size: batch_size.max(1),
        }
    }

    /// Parse the file and stage its valid rows.
    ///
    /// Only a detail still `processing` under the claim `detail` was taken
    /// with is loaded. Anything else is left alone and its recorded counts
    /// are returned.
    #[instrument(skip(self, detail), fields(file_detail_id = %detail.id, file = %detail.file_name))]
    pub async fn ingest_file(&self, detail: &ImportFileDetail) -> IngestOutcome {
        let current = match self.store.get_file_detail(detail.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                warn!("File detail vanished before ingestion");
                return IngestOutcome::recorded(detail);
            }
            Err(e) => {
                // still processing; a later sweep reclaims it
                error!(error = %e, "Could not read file detail");
                return IngestOutcome::recorded(detail);
            }
        };

        if current.status != FileStatus::Processing {
            debug!(status = %current.status, "File not claimed for processing, skipping");
            return IngestOutcome::recorded(&current);
        }
        if current.attempts != detail.attempts {
            debug!(
                claimed = detail.attempts,
                current = current.attempts,
                "File was claimed again since, skipping"
            );
            return IngestOutcome::recorded(&current);
        }

        let claim = detail.claim();
        match self.load(&current, &claim).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_claim_lost() => {
                warn!(attempt = claim.attempt, "Claim superseded during ingestion, stopping");
                self.reread(&current).await
            }
            Err(e) => {
                warn!(error = %e, "File ingestion failed");
                self.abandon(&current, e.to_string()).await;
                self.reread(&current).await
            }
        }
    }

    /// Fail a file still held under the claim `detail` was taken with and
    /// drop its staged rows
    pub async fn abandon(&self, detail: &ImportFileDetail, message: impl Into<String>) -> bool {
        let result = FileResult {
            error_message: Some(message.into()),
            ..Default::default()
        };
        match self.store.fail_file(&detail.claim(), &result).await {
            Ok(applied) => applied,
            Err(e) => {
                error!(file_detail_id = %detail.id, error = %e, "Could not mark file failed");
                false
            }
        }
    }

    async fn load(
        &self,
        detail: &ImportFileDetail,
        claim: &FileClaim,
    ) -> Result<IngestOutcome, IngestError> {
        let (upload, bytes) = self.uploads.get_file(detail.file_id).await?;

        let name = upload.original_name.clone();
        let sheet = tokio::task::spawn_blocking(move || parse_spreadsheet(&name, bytes)).await??;
        debug!(
            rows = sheet.total_rows,
            valid = sheet.records.len(),
            "Parsed spreadsheet"
        );

        self.store.delete_staged(claim).await?;

        let mut staged: i64 = 0;
        for batch in sheet.records.chunks(self.batch_size) {
            staged += self.store.insert_staged(claim, batch).await? as i64;
            if !self.store.heartbeat_file(claim).await? {
                return Err(StoreError::ClaimLost(*claim).into());
            }
        }

        let result = FileResult {
            records_count: sheet.total_rows as i64,
            imported_count: staged,
            error_message: sheet.error_summary(),
        };
        if !self.store.complete_file(claim, &result).await? {
            // reclaimed or failed by someone else while we were loading
            warn!("Claim no longer current at completion");
            return Ok(self.reread(detail).await);
        }

        if let Err(e) = self.uploads.mark_consumed(upload.id).await {
            warn!(file_id = %upload.id, error = %e, "Could not mark upload consumed");
        }

        info!(
            imported = staged,
            total = result.records_count,
            skipped = sheet.row_errors.len(),
            "File staged"
        );
        Ok(IngestOutcome {
            status: FileStatus::Completed,
            imported: staged,
            total: result.records_count,
        })
    }

    async fn reread(&self, detail: &ImportFileDetail) -> IngestOutcome {
        match self.store.get_file_detail(detail.id).await {
            Ok(Some(current)) => IngestOutcome::recorded(&current),
            _ => IngestOutcome::recorded(detail),
        }
    }
}
