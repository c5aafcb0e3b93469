//! Blob storage for uploaded spreadsheets
//!
//! Upload metadata lives in the record store; the bytes live behind
//! [`FileStorage`], either on local disk or in an S3-compatible bucket.

use async_trait::async_trait;
use thiserror::Error;

pub mod config;
pub mod local;
pub mod s3;

pub use config::{S3Config, StorageBackend, StorageConfig};
pub use local::LocalFileStorage;
pub use s3::S3FileStorage;

#[derive(Debug, Error)]
pub enum FileStorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store `data` under `key`, replacing any previous object
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), FileStorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, FileStorageError>;

    /// Removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<(), FileStorageError>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}
