// B2 object storage client over the S3-compatible API

use crate::config::B2Config;
use crate::errors::StorageError;
use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Destination for uploaded documents
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, key: &str, data: &[u8], content_type: &str)
        -> Result<(), StorageError>;
}

/// B2 client wrapper
#[derive(Clone, Debug)]
pub struct B2Client {
    bucket: Arc<Bucket>,
}

impl B2Client {
    /// Create a new B2 client from configuration
    #[instrument(skip(config), fields(endpoint = %config.endpoint, bucket = %config.bucket_name))]
    pub fn new(config: &B2Config) -> Result<Self, StorageError> {
        // Region::Custom expects the endpoint without a scheme
        let endpoint = config
            .endpoint
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .to_string();

        let credentials = Credentials::new(
            Some(config.account_id.as_str()),
            Some(config.account_key.as_str()),
            None,
            None,
            None,
        )
        .map_err(|e| {
            error!(error = %e, "Failed to create B2 credentials");
            StorageError::B2Error(format!("Failed to create credentials: {}", e))
        })?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint,
        };

        let bucket = Bucket::new(&config.bucket_name, region, credentials)
            .map_err(|e| {
                error!(error = %e, "Failed to create B2 bucket handle");
                StorageError::B2Error(format!("Failed to create bucket: {}", e))
            })?
            .with_path_style();

        info!(
            bucket = %config.bucket_name,
            endpoint = %config.endpoint,
            "B2 client initialized successfully"
        );

        Ok(Self {
            bucket: Arc::from(bucket),
        })
    }

    pub fn bucket_name(&self) -> String {
        self.bucket.name()
    }
}

#[async_trait]
impl ObjectStore for B2Client {
    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        debug!("Storing object to B2");

        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(|e| {
                error!(error = %e, key = %key, "Failed to store object to B2");
                StorageError::B2Error(format!("Failed to put object '{}': {}", key, e))
            })?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            error!(status = status, key = %key, "B2 rejected object upload");
            return Err(StorageError::B2Error(format!(
                "Failed to put object '{}': status {}",
                key, status
            )));
        }

        debug!("Object stored successfully");
        Ok(())
    }
}
