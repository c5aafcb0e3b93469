use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use super::{FileStorage, LocalFileStorage, S3FileStorage};

const DEFAULT_UPLOAD_DIR: &str = "./data/uploads";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Key prefix inside the bucket, may be empty
    pub prefix: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl S3Config {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "gradeload-uploads".to_string()),
            prefix: env::var("S3_PREFIX").unwrap_or_default(),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageBackend {
    Local { root: PathBuf },
    S3(S3Config),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

impl StorageConfig {
    /// Reads `UPLOAD_BACKEND` (`local` or `s3`), then `UPLOAD_DIR` or `S3_*`
    pub fn from_env() -> Result<Self> {
        let backend = env::var("UPLOAD_BACKEND").unwrap_or_else(|_| "local".to_string());
        let backend = match backend.to_lowercase().as_str() {
            "local" => StorageBackend::Local {
                root: env::var("UPLOAD_DIR")
                    .unwrap_or_else(|_| DEFAULT_UPLOAD_DIR.to_string())
                    .into(),
            },
            "s3" => StorageBackend::S3(S3Config::from_env()),
            other => bail!("UPLOAD_BACKEND must be 'local' or 's3', got '{}'", other),
        };
        Ok(Self { backend })
    }

    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::Local { root: root.into() },
        }
    }

    pub async fn init(&self) -> Result<Arc<dyn FileStorage>> {
        let storage: Arc<dyn FileStorage> = match &self.backend {
            StorageBackend::Local { root } => {
                tokio::fs::create_dir_all(root).await?;
                Arc::new(LocalFileStorage::new(root.clone()))
            }
            StorageBackend::S3(s3) => Arc::new(S3FileStorage::new(s3)),
        };
        Ok(storage)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::local(DEFAULT_UPLOAD_DIR)
    }
}
