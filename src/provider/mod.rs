//! Block-storage provider abstraction.
//!
//! The lifecycle only needs a handful of provider calls: create and tag a
//! volume, describe volumes by filter, and attach or detach a volume. The
//! [`BlockStore`] trait captures exactly those so the orchestration logic can
//! be exercised against an in-memory store.

use std::future::Future;
use std::pin::Pin;

mod ec2;
mod error;
mod identity;
mod types;

pub use ec2::Ec2BlockStore;
pub use error::ProviderError;
pub use identity::detect_host_identity;
pub use types::{
    AttachmentSnapshot, AttachmentState, HostIdentity, NAME_TAG, VolumeFilter, VolumeSnapshot,
    VolumeState,
};

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Minimal interface implemented by block-storage providers.
pub trait BlockStore: Send + Sync {
    /// Creates a volume of `size_gib` in the availability zone and returns its id.
    fn create_volume<'a>(
        &'a self,
        availability_zone: &'a str,
        size_gib: u32,
    ) -> ProviderFuture<'a, String>;

    /// Applies a single tag to a volume.
    fn tag_volume<'a>(
        &'a self,
        volume_id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> ProviderFuture<'a, ()>;

    /// Lists volumes matching the filter.
    fn describe_volumes<'a>(
        &'a self,
        filter: &'a VolumeFilter,
    ) -> ProviderFuture<'a, Vec<VolumeSnapshot>>;

    /// Requests attachment of a volume to an instance under `device`.
    ///
    /// Implementations report an occupied device name as
    /// [`ProviderError::DeviceInUse`].
    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        device: &'a str,
    ) -> ProviderFuture<'a, ()>;

    /// Requests detachment of a volume from an instance.
    fn detach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, ()>;
}
