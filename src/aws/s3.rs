use std::{fmt, sync::Arc, time::Duration};

use aws_config::SdkConfig;
use aws_sdk_s3::{error::DisplayErrorContext, presigning::PresigningConfig, Client};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::artifact::{ObjectStore, PresignError};

/// Provides a _sync_ [ObjectStore] on top of the S3 SDK client.
pub struct SyncS3Client {
    client: Client,
    runtime: Arc<Runtime>,
}

impl fmt::Debug for SyncS3Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncS3Client")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

impl SyncS3Client {
    pub fn new(runtime: Arc<Runtime>, config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
            runtime,
        }
    }
}

impl ObjectStore for SyncS3Client {
    fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, PresignError> {
        let presigning =
            PresigningConfig::expires_in(ttl).map_err(|err| PresignError(err.to_string()))?;

        let request = self
            .runtime
            .block_on(
                self.client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .presigned(presigning),
            )
            .map_err(|err| PresignError(DisplayErrorContext(&err).to_string()))?;

        debug!(bucket, key, ttl = ?ttl, "presigned object url");
        Ok(request.uri().to_string())
    }
}
