use crate::config::Config;
use crate::error::{DownloadError, LocatorError, UploadError};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::SdkConfig;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use bytes::Bytes;
use tracing::info;

/// Object storage as the pipeline sees it: named containers holding keyed blobs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Names of every container visible to the current credentials, in listing order.
    async fn list_containers(&self) -> Result<Vec<String>, LocatorError>;
    async fn get_object(&self, container: &str, key: &str) -> Result<Bytes, DownloadError>;
    async fn put_object(&self, container: &str, key: &str, body: Bytes)
        -> Result<(), UploadError>;
}

/// Loads the shared AWS configuration, falling back to the configured region
/// when the default provider chain has none.
pub async fn load_aws_config(config: &Config) -> SdkConfig {
    let region_provider =
        RegionProviderChain::default_provider().or_else(Region::new(config.aws_region.clone()));
    aws_config::from_env().region(region_provider).load().await
}

/// [`ObjectStore`] backed by Amazon S3 buckets.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(aws_config: &SdkConfig) -> Self {
        Self {
            client: S3Client::new(aws_config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_containers(&self) -> Result<Vec<String>, LocatorError> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| LocatorError::Unavailable(DisplayErrorContext(&e).to_string()))?;
        Ok(output
            .buckets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|bucket| bucket.name)
            .collect())
    }

    async fn get_object(&self, container: &str, key: &str) -> Result<Bytes, DownloadError> {
        let download_error = |message: String| DownloadError {
            container: container.to_string(),
            key: key.to_string(),
            message,
        };
        let output = self
            .client
            .get_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| download_error(DisplayErrorContext(&e).to_string()))?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| download_error(e.to_string()))?;
        let bytes = body.into_bytes();
        info!(
            "Downloaded from S3: bucket={}, key={}, bytes={}",
            container,
            key,
            bytes.len()
        );
        Ok(bytes)
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
    ) -> Result<(), UploadError> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| UploadError {
                container: container.to_string(),
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        info!(
            "Successfully uploaded file to S3: bucket={}, key={}, bytes={}",
            container, key, size
        );
        Ok(())
    }
}
