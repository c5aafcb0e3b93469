//! Upload commands

pub mod delete;
pub mod upload;

pub use delete::{DeleteUploadCommand, DeleteUploadResponse};
pub use upload::{UploadFileCommand, UploadFileError, UploadFileResponse};
