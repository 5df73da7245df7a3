//! Core library for the blocker Docker volume plugin.
//!
//! Named volumes are backed by EBS volumes tagged with their logical name.
//! The crate exposes a provider abstraction with an EC2 implementation, a
//! registry that resolves names to provider volumes, a device slot allocator
//! that attaches volumes to this host, and a lifecycle driver that formats,
//! mounts, and releases them. The plugin module serves the Docker volume
//! plugin protocol over a Unix socket.

pub mod allocator;
pub mod config;
pub mod driver;
pub mod error;
pub mod host;
pub mod layout;
pub mod locks;
pub mod plugin;
pub mod poller;
pub mod provider;
pub mod registry;
pub mod test_support;

pub use allocator::{DeviceAllocator, DeviceSlot};
pub use config::{BlockerConfig, ConfigError};
pub use driver::{Capabilities, DriverSettings, Scope, VolumeDriver};
pub use error::VolumeError;
pub use host::{CommandOutput, CommandRunner, HostCommands, HostTools, ProcessCommandRunner};
pub use layout::HostLayout;
pub use plugin::{Endpoint, PluginError, PluginHandler, PluginServer, shutdown_signal};
pub use poller::PollPolicy;
pub use provider::{BlockStore, Ec2BlockStore, HostIdentity, ProviderError, detect_host_identity};
pub use registry::{Registry, VolumeEntry};
