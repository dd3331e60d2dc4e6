//! AWS collaborators backed by the AWS SDK.
//!
//! The agent is synchronous, so SDK calls are driven to completion on a
//! single current-thread tokio runtime shared by every client. Clients are
//! built per region from the default credential chain.

mod cloudwatch;
mod kms;

pub use cloudwatch::CloudWatchBackend;
pub use kms::KmsDecryptor;

use std::future::Future;
use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// Runtime and configuration loader shared by the AWS clients.
#[derive(Debug, Clone)]
pub struct AwsContext {
    runtime: Arc<Runtime>,
}

impl AwsContext {
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }

    /// Blocks the calling thread until `future` completes.
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Loads the shared SDK configuration for `region`.
    fn sdk_config(&self, region: &str) -> SdkConfig {
        debug!(region, "loading AWS configuration");
        self.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.to_string()))
                .load(),
        )
    }
}
