//! AWS client construction.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use chrono::{DateTime, Utc};

/// Hands out region-scoped AWS clients derived from one shared config.
///
/// The shared config is loaded once per process through the standard
/// credential discovery chain (environment, profile, instance metadata)
/// and is safe to clone across tasks.
#[derive(Debug, Clone)]
pub struct AwsClients {
    config: SdkConfig,
}

impl AwsClients {
    /// Load the shared config from the environment.
    pub async fn load() -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self { config }
    }

    pub fn from_config(config: SdkConfig) -> Self {
        Self { config }
    }

    /// An S3 client, optionally pinned to a region.
    pub fn s3(&self, region: Option<&str>) -> aws_sdk_s3::Client {
        match region {
            Some(region) => {
                let config = aws_sdk_s3::config::Builder::from(&self.config)
                    .region(Region::new(region.to_string()))
                    .build();
                aws_sdk_s3::Client::from_conf(config)
            }
            None => aws_sdk_s3::Client::new(&self.config),
        }
    }

    /// An ECR client pinned to the registry's region.
    pub fn ecr(&self, region: &str) -> aws_sdk_ecr::Client {
        let config = aws_sdk_ecr::config::Builder::from(&self.config)
            .region(Region::new(region.to_string()))
            .build();
        aws_sdk_ecr::Client::from_conf(config)
    }
}

/// Convert an AWS timestamp into `chrono` time.
pub fn to_utc(timestamp: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos()).unwrap_or_default()
}
