//! Volume lifecycle orchestration.
//!
//! [`VolumeDriver`] composes the registry, the device allocator, and the host
//! utilities into the operations the volume plugin protocol exposes. Every
//! mutating operation holds the per-name lock for its whole duration.
//! Compensating detaches after a failed format or mount are best effort: their
//! errors are logged and the original failure is returned.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::allocator::DeviceAllocator;
use crate::error::VolumeError;
use crate::host::{CommandRunner, HostCommands, HostTools};
use crate::layout::HostLayout;
use crate::locks::NameLocks;
use crate::poller::PollPolicy;
use crate::provider::{BlockStore, HostIdentity, NAME_TAG};
use crate::registry::{Registry, VolumeEntry};

/// Option key carrying the requested size in GiB.
pub const SIZE_OPTION: &str = "size";

/// Splits `name[/subpath]` at the first separator.
///
/// The subpath keeps its leading `/` so it can be appended to a mount point.
#[must_use]
pub fn parse_path(path: &str) -> (&str, &str) {
    path.find('/').map_or((path, ""), |index| path.split_at(index))
}

/// Returns `true` when `name` maps to a directory directly below the mount root.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !(name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']))
}

fn validate_name(name: &str) -> Result<(), VolumeError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(VolumeError::InvalidName {
            name: name.to_owned(),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SizeRejection {
    Unparsable,
    OutOfRange(i64),
}

fn parse_size(raw: &str) -> Result<u32, SizeRejection> {
    let parsed = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| SizeRejection::Unparsable)?;
    u32::try_from(parsed).map_err(|_| SizeRejection::OutOfRange(parsed))
}

fn requested_size(name: &str, options: &BTreeMap<String, String>) -> u32 {
    let Some(raw) = options.get(SIZE_OPTION) else {
        warn!(volume = name, "no size option given, requesting 0 GiB");
        return 0;
    };
    match parse_size(raw) {
        Ok(size) => size,
        Err(SizeRejection::Unparsable) => {
            warn!(volume = name, size = %raw, "unparsable size option, requesting 0 GiB");
            0
        }
        Err(SizeRejection::OutOfRange(size)) => {
            warn!(volume = name, size, "size option out of range, requesting 0 GiB");
            0
        }
    }
}

/// Visibility of volumes across hosts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope {
    /// Volumes are visible from every host of the cluster.
    Global,
    /// Volumes are visible only on the host that created them.
    Local,
}

impl fmt::Display for Scope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Global => "global",
            Self::Local => "local",
        })
    }
}

/// Static driver capabilities.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Capabilities {
    /// Volume visibility.
    pub scope: Scope,
}

/// Static settings for a [`VolumeDriver`].
#[derive(Clone, Debug)]
pub struct DriverSettings {
    /// Identity of this host.
    pub identity: HostIdentity,
    /// Mount root and device directory.
    pub layout: HostLayout,
    /// Filesystem utilities.
    pub commands: HostCommands,
    /// Retry policy for provider transitions.
    pub poll: PollPolicy,
}

/// Drives named volumes through create, mount, unmount, and release.
#[derive(Debug)]
pub struct VolumeDriver<S: ?Sized, R> {
    registry: Registry<S>,
    allocator: DeviceAllocator<S>,
    host: HostTools<R>,
    availability_zone: String,
    locks: NameLocks,
}

impl<S, R> VolumeDriver<S, R>
where
    S: BlockStore + ?Sized,
    R: CommandRunner,
{
    /// Wires a driver around a block store and a command runner.
    #[must_use]
    pub fn new(store: Arc<S>, runner: R, settings: DriverSettings) -> Self {
        let DriverSettings {
            identity,
            layout,
            commands,
            poll,
        } = settings;
        let registry = Registry::new(store, layout);
        let allocator = DeviceAllocator::new(registry.clone(), identity.instance_id, poll);
        Self {
            registry,
            allocator,
            host: HostTools::new(runner, commands),
            availability_zone: identity.availability_zone,
            locks: NameLocks::new(),
        }
    }

    /// Host layout used by this driver.
    #[must_use]
    pub const fn layout(&self) -> &HostLayout {
        self.registry.layout()
    }

    /// Creates a volume tagged `name` and formats it.
    ///
    /// The volume is attached, formatted, and detached again, leaving it
    /// available. The `size` option is read as GiB; a missing, unparsable,
    /// negative, or oversized value requests a zero-sized volume.
    ///
    /// # Errors
    ///
    /// Returns provider, allocation, and format failures. A format failure
    /// is returned even when the compensating detach also fails.
    pub async fn create(
        &self,
        name: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<(), VolumeError> {
        validate_name(name)?;
        let _guard = self.locks.acquire(name).await;

        let size = requested_size(name, options);
        let store = self.registry.store();
        let volume_id = store.create_volume(&self.availability_zone, size).await?;
        info!(volume = name, %volume_id, size_gib = size, "created provider volume");
        store.tag_volume(&volume_id, NAME_TAG, name).await?;

        let device = self.allocator.attach(name).await?;
        if let Err(err) = self.host.format(&device) {
            self.detach_best_effort(name, "format").await;
            return Err(err);
        }
        self.allocator.detach(name).await?;
        info!(volume = name, %volume_id, "volume formatted and released");
        Ok(())
    }

    /// Mounts the volume named by `path` and returns its mount point.
    ///
    /// An already mounted volume is returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidName`] for unusable names, plus any
    /// allocation or mount failure.
    pub async fn mount(&self, path: &str) -> Result<Utf8PathBuf, VolumeError> {
        let (name, subpath) = parse_path(path);
        validate_name(name)?;
        let _guard = self.locks.acquire(name).await;

        let layout = self.layout();
        let mount_point = layout.mount_point(name);
        if layout.has_mount_dir(name) && self.host.is_mountpoint(&mount_point)? {
            debug!(volume = name, %mount_point, "volume already mounted");
            return Ok(with_subpath(&mount_point, subpath));
        }

        layout.ensure_mount_dir(name)?;
        let device = match self.allocator.attach(name).await {
            Ok(device) => device,
            Err(err) => {
                self.discard_mount_dir(name);
                return Err(err);
            }
        };
        if let Err(err) = self.host.mount(&device, &mount_point) {
            self.detach_best_effort(name, "mount").await;
            self.discard_mount_dir(name);
            return Err(err);
        }

        info!(volume = name, %device, %mount_point, "mounted volume");
        Ok(with_subpath(&mount_point, subpath))
    }

    /// Returns the mount point of the volume named by `path`, subpath
    /// included, if that directory exists.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotMounted`] when the mount directory or the
    /// requested subdirectory is absent.
    pub fn path(&self, path: &str) -> Result<Utf8PathBuf, VolumeError> {
        let (name, subpath) = parse_path(path);
        validate_name(name)?;
        if !self.layout().has_mount_subdir(name, subpath) {
            return Err(VolumeError::NotMounted {
                name: name.to_owned(),
            });
        }
        Ok(with_subpath(&self.layout().mount_point(name), subpath))
    }

    /// Unmounts the volume named by `path`, removes its mount directory, and
    /// detaches it.
    ///
    /// # Errors
    ///
    /// A failing unmount aborts before the directory is removed or the
    /// volume detached. Directory and detach failures are returned as well.
    pub async fn unmount(&self, path: &str) -> Result<(), VolumeError> {
        let (name, _) = parse_path(path);
        validate_name(name)?;
        let _guard = self.locks.acquire(name).await;

        let mount_point = self.layout().mount_point(name);
        self.host.unmount(&mount_point)?;
        self.layout().remove_mount_dir(name)?;
        self.allocator.detach(name).await?;
        info!(volume = name, %mount_point, "unmounted volume");
        Ok(())
    }

    /// Releases the volume named by `path`; identical to [`Self::unmount`].
    ///
    /// # Errors
    ///
    /// See [`Self::unmount`].
    pub async fn remove(&self, path: &str) -> Result<(), VolumeError> {
        self.unmount(path).await
    }

    /// Describes the volume tagged `name`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotFound`] when no volume carries the name.
    pub async fn get(&self, name: &str) -> Result<VolumeEntry, VolumeError> {
        self.registry.describe(name).await
    }

    /// Lists every named volume.
    ///
    /// # Errors
    ///
    /// Returns the provider failure when the listing call fails.
    pub async fn list(&self) -> Result<Vec<VolumeEntry>, VolumeError> {
        self.registry.list().await
    }

    /// Static driver capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: Scope::Global,
        }
    }

    async fn detach_best_effort(&self, name: &str, failed_step: &str) {
        if let Err(err) = self.allocator.detach(name).await {
            warn!(volume = name, failed_step, error = %err, "compensating detach failed");
        }
    }

    fn discard_mount_dir(&self, name: &str) {
        if let Err(err) = self.layout().remove_mount_dir(name) {
            warn!(volume = name, error = %err, "failed to remove mount directory");
        }
    }
}

fn with_subpath(mount_point: &Utf8Path, subpath: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{mount_point}{subpath}"))
}
