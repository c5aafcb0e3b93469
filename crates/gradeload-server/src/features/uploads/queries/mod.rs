//! Upload queries

pub mod download;
pub mod list_uploads;

pub use download::{DownloadUploadQuery, DownloadedFile};
pub use list_uploads::{UploadListItem, UploadListResponse};
