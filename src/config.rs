//! Configuration loading via `ortho-config`.
//!
//! [`BlockerConfig`] merges defaults, `blocker.toml` discovered on the usual
//! paths (or named by `BLOCKER_CONFIG_PATH`), and `BLOCKER_*` environment
//! variables.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::host::HostCommands;
use crate::layout::{DEFAULT_DEVICE_DIR, DEFAULT_MOUNT_ROOT, HostLayout};

/// Default location of the plugin socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/blocker.sock";

/// Plugin settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BLOCKER",
    discovery(
        app_name = "blocker",
        env_var = "BLOCKER_CONFIG_PATH",
        config_file_name = "blocker.toml",
        dotfile_name = ".blocker.toml",
        project_file_name = "blocker.toml"
    )
)]
pub struct BlockerConfig {
    /// Unix socket the plugin listens on.
    #[ortho_config(default = DEFAULT_SOCKET_PATH.to_owned())]
    pub socket_path: String,
    /// Directory holding one mount point per volume.
    #[ortho_config(default = DEFAULT_MOUNT_ROOT.to_owned())]
    pub mount_root: String,
    /// Directory where block devices appear.
    #[ortho_config(default = DEFAULT_DEVICE_DIR.to_owned())]
    pub device_dir: String,
    /// Filesystem created on new volumes.
    #[ortho_config(default = "ext4".to_owned())]
    pub filesystem_type: String,
    /// Path to the `mkfs` executable.
    #[ortho_config(default = "mkfs".to_owned())]
    pub mkfs_bin: String,
    /// Path to the `mount` executable.
    #[ortho_config(default = "mount".to_owned())]
    pub mount_bin: String,
    /// Path to the `umount` executable.
    #[ortho_config(default = "umount".to_owned())]
    pub umount_bin: String,
    /// Path to the `mountpoint` executable.
    #[ortho_config(default = "mountpoint".to_owned())]
    pub mountpoint_bin: String,
    /// Log filter used when `RUST_LOG` is unset.
    #[ortho_config(default = "info".to_owned())]
    pub log_filter: String,
    /// Alternative EC2 endpoint, for API-compatible services.
    pub endpoint_url: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl BlockerConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to blocker.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("blocker")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages name
    /// the environment variable and TOML key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.socket_path,
                FieldMetadata::new("plugin socket path", "BLOCKER_SOCKET_PATH", "socket_path"),
            ),
            (
                &self.mount_root,
                FieldMetadata::new("mount root", "BLOCKER_MOUNT_ROOT", "mount_root"),
            ),
            (
                &self.device_dir,
                FieldMetadata::new("device directory", "BLOCKER_DEVICE_DIR", "device_dir"),
            ),
            (
                &self.filesystem_type,
                FieldMetadata::new(
                    "filesystem type",
                    "BLOCKER_FILESYSTEM_TYPE",
                    "filesystem_type",
                ),
            ),
            (
                &self.mkfs_bin,
                FieldMetadata::new("mkfs executable", "BLOCKER_MKFS_BIN", "mkfs_bin"),
            ),
            (
                &self.mount_bin,
                FieldMetadata::new("mount executable", "BLOCKER_MOUNT_BIN", "mount_bin"),
            ),
            (
                &self.umount_bin,
                FieldMetadata::new("umount executable", "BLOCKER_UMOUNT_BIN", "umount_bin"),
            ),
            (
                &self.mountpoint_bin,
                FieldMetadata::new(
                    "mountpoint executable",
                    "BLOCKER_MOUNTPOINT_BIN",
                    "mountpoint_bin",
                ),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }

        if let Some(endpoint) = &self.endpoint_url
            && endpoint.trim().is_empty()
        {
            return Err(ConfigError::MissingField(String::from(
                "EC2 endpoint override is empty: unset BLOCKER_ENDPOINT_URL or give endpoint_url a value in blocker.toml",
            )));
        }
        Ok(())
    }

    /// Unix socket path as a path value.
    #[must_use]
    pub fn socket_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.socket_path)
    }

    /// Host layout described by this configuration.
    #[must_use]
    pub fn layout(&self) -> HostLayout {
        HostLayout::new(&self.mount_root, &self.device_dir)
    }

    /// Filesystem utilities described by this configuration.
    #[must_use]
    pub fn host_commands(&self) -> HostCommands {
        HostCommands {
            filesystem_type: self.filesystem_type.clone(),
            mkfs_bin: self.mkfs_bin.clone(),
            mount_bin: self.mount_bin.clone(),
            umount_bin: self.umount_bin.clone(),
            mountpoint_bin: self.mountpoint_bin.clone(),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
