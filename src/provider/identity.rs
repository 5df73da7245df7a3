//! Host identity discovery through the EC2 instance metadata service.

use std::time::Duration;

use aws_config::imds::Client;
use tracing::info;

use crate::error::VolumeError;

use super::HostIdentity;

const IMDS_TIMEOUT: Duration = Duration::from_secs(2);
const IMDS_ATTEMPTS: u32 = 2;

const INSTANCE_ID_PATH: &str = "/latest/meta-data/instance-id";
const REGION_PATH: &str = "/latest/meta-data/placement/region";
const AVAILABILITY_ZONE_PATH: &str = "/latest/meta-data/placement/availability-zone";

/// Reads instance id, region, and availability zone from instance metadata.
///
/// # Errors
///
/// Returns [`VolumeError::Configuration`] when the metadata service cannot be
/// reached, which means the process is not running on an EC2 instance.
pub async fn detect_host_identity() -> Result<HostIdentity, VolumeError> {
    let client = Client::builder()
        .connect_timeout(IMDS_TIMEOUT)
        .read_timeout(IMDS_TIMEOUT)
        .max_attempts(IMDS_ATTEMPTS)
        .build();

    let identity = HostIdentity {
        instance_id: fetch(&client, INSTANCE_ID_PATH).await?,
        region: fetch(&client, REGION_PATH).await?,
        availability_zone: fetch(&client, AVAILABILITY_ZONE_PATH).await?,
    };

    info!(
        instance_id = %identity.instance_id,
        region = %identity.region,
        availability_zone = %identity.availability_zone,
        "auto-detected EC2 host identity"
    );
    Ok(identity)
}

async fn fetch(client: &Client, path: &str) -> Result<String, VolumeError> {
    let value = client.get(path).await.map_err(|err| {
        VolumeError::Configuration(format!(
            "not running on an EC2 instance: metadata {path} unavailable: {err}"
        ))
    })?;
    let text = value.as_ref().trim().to_owned();
    if text.is_empty() {
        return Err(VolumeError::Configuration(format!(
            "instance metadata {path} is empty"
        )));
    }
    Ok(text)
}
