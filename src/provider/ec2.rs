//! EC2 implementation of [`BlockStore`] backed by `aws-sdk-ec2`.

use aws_config::BehaviorVersion;
use aws_sdk_ec2::Client;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_ec2::types::{Filter, Tag, Volume};

use super::{
    AttachmentSnapshot, AttachmentState, BlockStore, NAME_TAG, ProviderError, ProviderFuture,
    VolumeFilter, VolumeSnapshot, VolumeState,
};

/// Error code EC2 returns when an attach names a device already in use.
const DEVICE_IN_USE_CODE: &str = "InvalidParameterValue";

/// Block store that talks to the EC2 API.
#[derive(Clone, Debug)]
pub struct Ec2BlockStore {
    client: Client,
}

impl Ec2BlockStore {
    /// Builds a client for `region`, optionally against an alternative endpoint.
    pub async fn connect(region: &str, endpoint_url: Option<&str>) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;

        let mut builder = aws_sdk_ec2::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    fn filter_for(filter: &VolumeFilter) -> Filter {
        match filter {
            VolumeFilter::NameTag(name) => Filter::builder()
                .name(format!("tag:{NAME_TAG}"))
                .values(name)
                .build(),
            VolumeFilter::HasNameTag => Filter::builder().name("tag-key").values(NAME_TAG).build(),
            VolumeFilter::AttachedTo(instance_id) => Filter::builder()
                .name("attachment.instance-id")
                .values(instance_id)
                .build(),
        }
    }
}

fn api_error<E>(err: &E) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    err.code().map_or_else(
        || ProviderError::Transport {
            message: DisplayErrorContext(err).to_string(),
        },
        |code| ProviderError::Api {
            code: code.to_owned(),
            message: err.message().unwrap_or_default().to_owned(),
        },
    )
}

fn snapshot_from(volume: &Volume) -> Result<VolumeSnapshot, ProviderError> {
    let volume_id = volume
        .volume_id()
        .ok_or_else(|| ProviderError::MalformedResponse {
            message: String::from("volume without an identifier"),
        })?
        .to_owned();

    let attachments = volume
        .attachments()
        .iter()
        .map(|attachment| AttachmentSnapshot {
            device: attachment.device().unwrap_or_default().to_owned(),
            instance_id: attachment.instance_id().unwrap_or_default().to_owned(),
            state: attachment.state().map_or_else(
                || AttachmentState::Unknown(String::new()),
                |state| AttachmentState::from(state.as_str()),
            ),
        })
        .collect();

    let tags = volume
        .tags()
        .iter()
        .filter_map(|tag| {
            let key = tag.key()?;
            Some((key.to_owned(), tag.value().unwrap_or_default().to_owned()))
        })
        .collect();

    Ok(VolumeSnapshot {
        volume_id,
        state: volume.state().map_or_else(
            || VolumeState::Unknown(String::new()),
            |state| VolumeState::from(state.as_str()),
        ),
        attachments,
        tags,
    })
}

impl BlockStore for Ec2BlockStore {
    fn create_volume<'a>(
        &'a self,
        availability_zone: &'a str,
        size_gib: u32,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let size = i32::try_from(size_gib).map_err(|_| ProviderError::Api {
                code: String::from("InvalidParameterValue"),
                message: format!("volume size {size_gib} GiB is out of range"),
            })?;
            let output = self
                .client
                .create_volume()
                .availability_zone(availability_zone)
                .size(size)
                .send()
                .await
                .map_err(|err| api_error(&err))?;

            output
                .volume_id()
                .map(str::to_owned)
                .ok_or_else(|| ProviderError::MalformedResponse {
                    message: String::from("create volume response without volume id"),
                })
        })
    }

    fn tag_volume<'a>(
        &'a self,
        volume_id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .create_tags()
                .resources(volume_id)
                .tags(Tag::builder().key(key).value(value).build())
                .send()
                .await
                .map_err(|err| api_error(&err))?;
            Ok(())
        })
    }

    fn describe_volumes<'a>(
        &'a self,
        filter: &'a VolumeFilter,
    ) -> ProviderFuture<'a, Vec<VolumeSnapshot>> {
        Box::pin(async move {
            let ec2_filter = Self::filter_for(filter);
            let mut snapshots = Vec::new();
            let mut next_token: Option<String> = None;

            loop {
                let output = self
                    .client
                    .describe_volumes()
                    .filters(ec2_filter.clone())
                    .set_next_token(next_token.take())
                    .send()
                    .await
                    .map_err(|err| api_error(&err))?;

                for volume in output.volumes() {
                    snapshots.push(snapshot_from(volume)?);
                }

                match output.next_token() {
                    Some(token) if !token.is_empty() => next_token = Some(token.to_owned()),
                    _ => break,
                }
            }

            Ok(snapshots)
        })
    }

    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        device: &'a str,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let result = self
                .client
                .attach_volume()
                .device(device)
                .instance_id(instance_id)
                .volume_id(volume_id)
                .send()
                .await;

            match result {
                Ok(_) => Ok(()),
                Err(err) if err.code() == Some(DEVICE_IN_USE_CODE) => {
                    Err(ProviderError::DeviceInUse {
                        device: device.to_owned(),
                        message: err.message().unwrap_or_default().to_owned(),
                    })
                }
                Err(err) => Err(api_error(&err)),
            }
        })
    }

    fn detach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .detach_volume()
                .instance_id(instance_id)
                .volume_id(volume_id)
                .send()
                .await
                .map_err(|err| api_error(&err))?;
            Ok(())
        })
    }
}
