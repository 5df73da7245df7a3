//! Bounded-retry waiting on asynchronous provider state.
//!
//! Attach, detach, and availability changes complete asynchronously on the
//! provider side. [`PollPolicy::wait_until`] re-reads the volume through the
//! registry on every attempt and evaluates a condition against the fresh
//! snapshot until it holds or the attempt budget runs out.

use std::time::Duration;

use tracing::debug;

use crate::error::VolumeError;
use crate::provider::{AttachmentState, BlockStore, VolumeSnapshot, VolumeState};
use crate::registry::Registry;

/// Attempts made before a wait gives up.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 12;

/// Sleep between two attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Retry policy for provider state transitions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Maximum number of condition evaluations.
    pub attempts: u32,
    /// Fixed delay between evaluations.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollPolicy {
    /// Waits until `condition` accepts the current state of volume `name`.
    ///
    /// The condition returns `Err(reason)` while the volume has not settled;
    /// the last reason is reported when the budget is exhausted. Returns the
    /// snapshot that satisfied the condition.
    ///
    /// # Errors
    ///
    /// Returns lookup errors such as [`VolumeError::NotFound`] immediately
    /// and [`VolumeError::StateTransitionTimeout`] once every attempt failed.
    pub async fn wait_until<S, C>(
        &self,
        registry: &Registry<S>,
        name: &str,
        condition: C,
    ) -> Result<VolumeSnapshot, VolumeError>
    where
        S: BlockStore + ?Sized,
        C: Fn(&VolumeSnapshot) -> Result<(), String>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let volume = registry.find_by_name(name).await?;
            let reason = match condition(&volume) {
                Ok(()) => return Ok(volume),
                Err(reason) => reason,
            };

            if attempt >= attempts {
                return Err(VolumeError::StateTransitionTimeout {
                    name: name.to_owned(),
                    attempts,
                    reason,
                });
            }

            debug!(volume = name, attempt, %reason, "waiting for volume state transition");
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Holds when the volume has exactly one attachment in the attached state.
///
/// # Errors
///
/// Returns the reason the volume is not yet attached.
pub fn attached(volume: &VolumeSnapshot) -> Result<(), String> {
    let Some(attachment) = volume.sole_attachment() else {
        return Err(format!(
            "Volume state transition failed: expected 1 attachment, got {}",
            volume.attachments.len()
        ));
    };
    if attachment.state == AttachmentState::Attached {
        return Ok(());
    }
    Err(format!(
        "Volume state transition failed: seeking {}, current is {}",
        AttachmentState::Attached,
        attachment.state
    ))
}

/// Holds when the volume has no attachments left.
///
/// # Errors
///
/// Returns the reason the volume is still attached.
pub fn detached(volume: &VolumeSnapshot) -> Result<(), String> {
    if volume.attachments.is_empty() {
        return Ok(());
    }
    Err(String::from(
        "Volume state transition failed: still has attachments",
    ))
}

/// Holds when the provider reports the volume as available.
///
/// # Errors
///
/// Returns the reason the volume is not yet available.
pub fn available(volume: &VolumeSnapshot) -> Result<(), String> {
    if volume.state == VolumeState::Available {
        return Ok(());
    }
    Err(format!(
        "Volume state transition failed: seeking {}, current is {}",
        VolumeState::Available,
        volume.state
    ))
}
