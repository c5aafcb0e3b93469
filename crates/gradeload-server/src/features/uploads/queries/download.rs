//! Fetch the stored bytes of an upload

use uuid::Uuid;

use crate::import::parser::SheetFormat;
use crate::import::uploads::UploadError;
use crate::import::ImportPipeline;

#[derive(Debug, Clone)]
pub struct DownloadUploadQuery {
    pub file_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub content: Vec<u8>,
}

/// MIME type for a spreadsheet name, by extension
pub fn content_type_for(file_name: &str) -> &'static str {
    match SheetFormat::from_file_name(file_name) {
        Some(SheetFormat::Csv) => "text/csv",
        Some(SheetFormat::Workbook) => {
            let lower = file_name.to_ascii_lowercase();
            if lower.ends_with(".xls") {
                "application/vnd.ms-excel"
            } else if lower.ends_with(".ods") {
                "application/vnd.oasis.opendocument.spreadsheet"
            } else {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
        None => "application/octet-stream",
    }
}

pub async fn handle(
    pipeline: ImportPipeline,
    query: DownloadUploadQuery,
) -> Result<DownloadedFile, UploadError> {
    let (upload, content) = pipeline.uploads.download(query.file_id).await?;
    Ok(DownloadedFile {
        content_type: content_type_for(&upload.original_name),
        file_name: upload.original_name,
        content,
    })
}
