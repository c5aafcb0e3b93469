use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{primitives::ByteStream, Client};
use tracing::{debug, info, instrument};

use super::{config::S3Config, FileStorage, FileStorageError};

/// Stores objects in an S3-compatible bucket (AWS or MinIO)
#[derive(Clone)]
pub struct S3FileStorage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3FileStorage {
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "gradeload-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!(bucket = %config.bucket, prefix = %config.prefix, "S3 storage client initialized");

        Self {
            client,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        }
    }

    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key)
        }
    }
}

#[async_trait]
impl FileStorage for S3FileStorage {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), FileStorageError> {
        let object_key = self.object_key(key);
        debug!("Uploading to s3://{}/{}", self.bucket, object_key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| FileStorageError::Backend(format!("put {object_key}: {e}")))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Vec<u8>, FileStorageError> {
        let object_key = self.object_key(key);

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    return Err(FileStorageError::NotFound(key.to_string()));
                }
                return Err(FileStorageError::Backend(format!("get {object_key}: {e}")));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| FileStorageError::Backend(format!("read {object_key}: {e}")))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, object_key);
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> Result<(), FileStorageError> {
        let object_key = self.object_key(key);

        // DeleteObject succeeds for missing keys
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| FileStorageError::Backend(format!("delete {object_key}: {e}")))?;

        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }
}
