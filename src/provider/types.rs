//! Provider-side volume state as observed through describe calls.

use std::collections::BTreeMap;
use std::fmt;

/// Tag key that carries a volume's logical name.
pub const NAME_TAG: &str = "Name";

/// Availability state of a provider volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeState {
    /// The volume is still being provisioned.
    Creating,
    /// The volume exists and has no attachment.
    Available,
    /// The volume is attached to an instance.
    InUse,
    /// Deletion has been requested.
    Deleting,
    /// The volume has been deleted.
    Deleted,
    /// The provider reports the volume as impaired.
    Error,
    /// State string this crate does not model.
    Unknown(String),
}

impl From<&str> for VolumeState {
    fn from(value: &str) -> Self {
        match value {
            "creating" => Self::Creating,
            "available" => Self::Available,
            "in-use" => Self::InUse,
            "deleting" => Self::Deleting,
            "deleted" => Self::Deleted,
            "error" => Self::Error,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::InUse => "in-use",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
            Self::Unknown(other) => other.as_str(),
        };
        formatter.write_str(text)
    }
}

/// State of a single volume attachment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttachmentState {
    /// Attach request accepted, not yet complete.
    Attaching,
    /// The device is attached.
    Attached,
    /// Detach request accepted, not yet complete.
    Detaching,
    /// The attachment has been released.
    Detached,
    /// The device is busy.
    Busy,
    /// State string this crate does not model.
    Unknown(String),
}

impl From<&str> for AttachmentState {
    fn from(value: &str) -> Self {
        match value {
            "attaching" => Self::Attaching,
            "attached" => Self::Attached,
            "detaching" => Self::Detaching,
            "detached" => Self::Detached,
            "busy" => Self::Busy,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

impl fmt::Display for AttachmentState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Attaching => "attaching",
            Self::Attached => "attached",
            Self::Detaching => "detaching",
            Self::Detached => "detached",
            Self::Busy => "busy",
            Self::Unknown(other) => other.as_str(),
        };
        formatter.write_str(text)
    }
}

/// Binding of a volume to an instance device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachmentSnapshot {
    /// Device name used in the attach request (for example `/dev/sdf`).
    pub device: String,
    /// Instance owning the attachment.
    pub instance_id: String,
    /// Current attachment state.
    pub state: AttachmentState,
}

/// Point-in-time view of a provider volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeSnapshot {
    /// Provider-assigned identifier.
    pub volume_id: String,
    /// Availability state.
    pub state: VolumeState,
    /// Current attachments; the lifecycle keeps this at zero or one.
    pub attachments: Vec<AttachmentSnapshot>,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
}

impl VolumeSnapshot {
    /// Returns the logical name carried by the name tag.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.tags.get(NAME_TAG).map(String::as_str)
    }

    /// Returns the only attachment when exactly one exists.
    #[must_use]
    pub fn sole_attachment(&self) -> Option<&AttachmentSnapshot> {
        match self.attachments.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// Selection criteria for describe calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeFilter {
    /// Volumes whose name tag equals the value.
    NameTag(String),
    /// Volumes carrying a name tag with any value.
    HasNameTag,
    /// Volumes attached to the given instance.
    AttachedTo(String),
}

impl VolumeFilter {
    /// Evaluates the filter against a snapshot.
    #[must_use]
    pub fn matches(&self, volume: &VolumeSnapshot) -> bool {
        match self {
            Self::NameTag(name) => volume.name() == Some(name.as_str()),
            Self::HasNameTag => volume.tags.contains_key(NAME_TAG),
            Self::AttachedTo(instance_id) => volume
                .attachments
                .iter()
                .any(|attachment| &attachment.instance_id == instance_id),
        }
    }
}

/// Identity of the host the plugin runs on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostIdentity {
    /// Instance identifier used as attachment owner.
    pub instance_id: String,
    /// Region hosting the instance.
    pub region: String,
    /// Availability zone new volumes are created in.
    pub availability_zone: String,
}
