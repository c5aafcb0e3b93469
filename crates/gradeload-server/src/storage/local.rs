use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};

use super::{FileStorage, FileStorageError};

/// Stores objects as files under a root directory
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys are relative paths made of normal components only
    fn path_for(&self, key: &str) -> Result<PathBuf, FileStorageError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(FileStorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), FileStorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // write then rename so readers never see a partial file
        let partial = path.with_extension("partial");
        tokio::fs::write(&partial, &data).await?;
        tokio::fs::rename(&partial, &path).await?;

        debug!(path = %path.display(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, FileStorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(FileStorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), FileStorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}
