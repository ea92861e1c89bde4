//! Sync clients for the AWS services used to provision hybrid nodes.
//!
//! The SDK is async only, so each client holds a shared [Runtime] and blocks on every request.
use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use tokio::runtime::Runtime;

pub mod s3;
pub mod ssm;

pub use s3::SyncS3Client;
pub use ssm::SyncSsmClient;

/// Loads the default credential chain for `region`.
pub fn load_sdk_config(runtime: &Arc<Runtime>, region: &str) -> SdkConfig {
    runtime.block_on(
        aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load(),
    )
}
