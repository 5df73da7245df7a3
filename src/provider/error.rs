//! Error types for block-storage providers.

use thiserror::Error;

/// Errors raised by a [`BlockStore`](super::BlockStore) implementation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// The provider refused an attach because the device name is already in
    /// use on the instance. The allocator treats this as "slot taken".
    #[error("device {device} already in use: {message}")]
    DeviceInUse {
        /// Device name named in the attach request.
        device: String,
        /// Message returned by the provider.
        message: String,
    },
    /// Error reply from the provider API.
    #[error("provider error {code}: {message}")]
    Api {
        /// Provider-specific error code.
        code: String,
        /// Message returned by the provider.
        message: String,
    },
    /// The request never produced an API reply (network, credentials, timeouts).
    #[error("provider request failed: {message}")]
    Transport {
        /// Error chain rendered as text.
        message: String,
    },
    /// The reply was missing data the caller relies on.
    #[error("malformed provider response: {message}")]
    MalformedResponse {
        /// Description of the missing or invalid field.
        message: String,
    },
}

impl ProviderError {
    /// Returns `true` when the error signals an occupied device name.
    #[must_use]
    pub const fn is_device_in_use(&self) -> bool {
        matches!(self, Self::DeviceInUse { .. })
    }
}
