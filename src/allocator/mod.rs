//! Device slot allocation and attach/detach sequencing.
//!
//! [`DeviceAllocator::attach`] picks the first free slot in `f..=p`, asks the
//! provider to attach the volume there, waits for the attachment to settle,
//! and resolves which local alias the kernel created. Slot selection and the
//! attach request run under a process-wide lock so two volumes never race for
//! the same nominally free slot.

mod slot;

use std::collections::BTreeSet;

use camino::Utf8PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::VolumeError;
use crate::poller::{self, PollPolicy};
use crate::provider::{AttachmentState, BlockStore, VolumeFilter};
use crate::registry::Registry;

pub use slot::DeviceSlot;

/// Claims device slots and attaches volumes to this host.
#[derive(Debug)]
pub struct DeviceAllocator<S: ?Sized> {
    registry: Registry<S>,
    instance_id: String,
    policy: PollPolicy,
    slot_lock: Mutex<()>,
}

impl<S: BlockStore + ?Sized> DeviceAllocator<S> {
    /// Creates an allocator attaching volumes to `instance_id`.
    #[must_use]
    pub fn new(registry: Registry<S>, instance_id: impl Into<String>, policy: PollPolicy) -> Self {
        Self {
            registry,
            instance_id: instance_id.into(),
            policy,
            slot_lock: Mutex::new(()),
        }
    }

    /// Attaches volume `name` to this host and returns its local device path.
    ///
    /// A volume already attached here is returned without a new attach call.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::DeviceExhausted`] when every slot is taken,
    /// [`VolumeError::DeviceMissingAfterAttach`] when no local alias appears,
    /// [`VolumeError::StateTransitionTimeout`] when the provider does not
    /// settle, and provider errors other than an occupied device name.
    pub async fn attach(&self, name: &str) -> Result<Utf8PathBuf, VolumeError> {
        let volume = self.registry.find_by_name(name).await?;
        if let Some(attachment) = volume.sole_attachment()
            && attachment.instance_id == self.instance_id
            && attachment.state == AttachmentState::Attached
        {
            let slot = DeviceSlot::from_device_name(&attachment.device).ok_or_else(|| {
                VolumeError::UnrecognizedDevice {
                    device: attachment.device.clone(),
                }
            })?;
            let device = self.local_device(slot).ok_or_else(|| {
                VolumeError::DeviceMissingAfterAttach {
                    device: attachment.device.clone(),
                }
            })?;
            debug!(volume = name, %device, "volume already attached to this host");
            return Ok(device);
        }

        let settled = self
            .policy
            .wait_until(&self.registry, name, poller::available)
            .await?;

        let slot_guard = self.slot_lock.lock().await;
        let claimed = self.provider_claimed_slots().await?;
        for slot in DeviceSlot::all() {
            if claimed.contains(&slot) || self.is_locally_present(slot) {
                continue;
            }

            let device = slot.provider_device();
            match self
                .registry
                .store()
                .attach_volume(&settled.volume_id, &self.instance_id, &device)
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_device_in_use() => {
                    debug!(volume = name, %device, "provider reports device in use, trying next slot");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            self.policy
                .wait_until(&self.registry, name, poller::attached)
                .await?;
            drop(slot_guard);
            info!(volume = name, instance_id = %self.instance_id, %device, "attached volume");

            if let Some(local) = self.local_device(slot) {
                debug!(volume = name, %local, "resolved local device");
                return Ok(local);
            }
            if let Err(err) = self.detach(name).await {
                warn!(volume = name, error = %err, "detach after missing device failed");
            }
            return Err(VolumeError::DeviceMissingAfterAttach { device });
        }

        Err(VolumeError::DeviceExhausted)
    }

    /// Detaches volume `name` from this host and waits until it is released.
    ///
    /// A volume without attachments is left untouched.
    ///
    /// # Errors
    ///
    /// Returns provider errors from the detach request and
    /// [`VolumeError::StateTransitionTimeout`] when the attachment lingers.
    pub async fn detach(&self, name: &str) -> Result<(), VolumeError> {
        let volume = self.registry.find_by_name(name).await?;
        if volume.attachments.is_empty() {
            debug!(volume = name, "volume has no attachment, nothing to detach");
            return Ok(());
        }

        self.registry
            .store()
            .detach_volume(&volume.volume_id, &self.instance_id)
            .await?;
        self.policy
            .wait_until(&self.registry, name, poller::detached)
            .await?;
        info!(volume = name, instance_id = %self.instance_id, "detached volume");
        Ok(())
    }

    async fn provider_claimed_slots(&self) -> Result<BTreeSet<DeviceSlot>, VolumeError> {
        let filter = VolumeFilter::AttachedTo(self.instance_id.clone());
        let volumes = self.registry.store().describe_volumes(&filter).await?;
        Ok(volumes
            .iter()
            .flat_map(|volume| volume.attachments.iter())
            .filter(|attachment| attachment.instance_id == self.instance_id)
            .filter_map(|attachment| DeviceSlot::from_device_name(&attachment.device))
            .collect())
    }

    fn is_locally_present(&self, slot: DeviceSlot) -> bool {
        let layout = self.registry.layout();
        slot.aliases().iter().any(|alias| layout.device_exists(alias))
    }

    fn local_device(&self, slot: DeviceSlot) -> Option<Utf8PathBuf> {
        let layout = self.registry.layout();
        slot.aliases()
            .into_iter()
            .find(|alias| layout.device_exists(alias))
            .map(|alias| layout.device_path(&alias))
    }
}
