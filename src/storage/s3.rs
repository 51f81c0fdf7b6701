use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{config::Credentials, error::DisplayErrorContext, primitives::ByteStream, Client};
use bytes::Bytes;
use std::time::Duration;

use super::{ObjectStore, StorageError};
use crate::config::StorageConfig;

const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

/// S3-compatible bucket (AWS, MinIO, ...)
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    upload_timeout: Duration,
}

impl S3ObjectStore {
    /// Build a client from configuration.
    ///
    /// Static credentials are used when both keys are set; otherwise the default
    /// AWS provider chain applies.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "scoring-gateway",
            ));
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        tracing::info!(
            bucket = %config.bucket,
            endpoint = config.endpoint.as_deref().unwrap_or("aws"),
            "Configured S3 object storage"
        );

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            upload_timeout: config.upload_timeout(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        let upload = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(PARQUET_CONTENT_TYPE)
            .body(ByteStream::from(body))
            .send();

        match tokio::time::timeout(self.upload_timeout, upload).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(StorageError::Upload {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            }),
            Err(_) => Err(StorageError::Upload {
                key: key.to_string(),
                message: format!("upload timed out after {:?}", self.upload_timeout),
            }),
        }
    }
}
