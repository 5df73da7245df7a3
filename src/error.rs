//! Error taxonomy for the volume lifecycle.
//!
//! Every lifecycle operation returns [`VolumeError`]. The plugin adapter
//! flattens these into plain strings, so the messages are written for the
//! operator reading `docker volume` output.

use thiserror::Error;

use crate::provider::ProviderError;

/// Errors raised while driving a volume through its lifecycle.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeError {
    /// Raised at startup when the host is not a usable provider machine.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Raised when no provider volume carries the requested name tag.
    #[error("volume {name} not found")]
    NotFound {
        /// Logical volume name used for the lookup.
        name: String,
    },
    /// Raised when the expected mount directory does not exist.
    #[error("volume {name} is not mounted")]
    NotMounted {
        /// Logical volume name.
        name: String,
    },
    /// Raised when a volume name cannot be mapped to a mount directory.
    #[error("invalid volume name '{name}'")]
    InvalidName {
        /// Name as supplied by the caller.
        name: String,
    },
    /// Raised when every candidate device slot is taken.
    #[error("no devices available for attach: /dev/sd[f-p] taken")]
    DeviceExhausted,
    /// Raised when the poller runs out of attempts.
    #[error("volume {name} did not settle after {attempts} attempts: {reason}")]
    StateTransitionTimeout {
        /// Logical volume name.
        name: String,
        /// Attempts spent before giving up.
        attempts: u32,
        /// Failure reason reported by the condition on the last attempt.
        reason: String,
    },
    /// Raised when the provider confirms an attachment but no local device node appears.
    #[error("device {device} is missing after attach")]
    DeviceMissingAfterAttach {
        /// Provider-side device name of the claimed slot.
        device: String,
    },
    /// Raised when an existing attachment names a device outside `/dev/(sd|xvd)[f-p]`.
    #[error("unable to map attached device {device} to a local slot")]
    UnrecognizedDevice {
        /// Device name reported by the provider.
        device: String,
    },
    /// Raised when an OS utility exits unsuccessfully.
    #[error("{program} exited with status {status_text}: {output}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Combined stdout and stderr captured from the process.
        output: String,
    },
    /// Raised when an OS utility cannot be started at all.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when local filesystem manipulation fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: String,
        /// Human-readable error message.
        message: String,
    },
    /// Pass-through failure from the block-storage API.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl VolumeError {
    pub(crate) fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
