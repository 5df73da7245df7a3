//! Host utilities invoked around the provider calls.
//!
//! Formatting, mounting, and mount-point probing are delegated to the usual
//! system binaries. Commands go through [`CommandRunner`] so the lifecycle can
//! be exercised without touching real block devices.

use std::ffi::OsString;
use std::process::Command;

use camino::Utf8Path;
use tracing::debug;

use crate::error::VolumeError;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_owned(),
            (false, true) => stdout.to_owned(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, VolumeError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, VolumeError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| VolumeError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Binaries and filesystem type used by [`HostTools`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostCommands {
    /// Filesystem created on fresh volumes.
    pub filesystem_type: String,
    /// Filesystem creation binary.
    pub mkfs_bin: String,
    /// Mount binary.
    pub mount_bin: String,
    /// Unmount binary.
    pub umount_bin: String,
    /// Binary that reports whether a path is a mount point.
    pub mountpoint_bin: String,
}

impl Default for HostCommands {
    fn default() -> Self {
        Self {
            filesystem_type: String::from("ext4"),
            mkfs_bin: String::from("mkfs"),
            mount_bin: String::from("mount"),
            umount_bin: String::from("umount"),
            mountpoint_bin: String::from("mountpoint"),
        }
    }
}

/// Formats, mounts, and unmounts block devices on the host.
#[derive(Clone, Debug)]
pub struct HostTools<R> {
    runner: R,
    commands: HostCommands,
}

impl<R: CommandRunner> HostTools<R> {
    /// Creates the helper around a command runner.
    #[must_use]
    pub const fn new(runner: R, commands: HostCommands) -> Self {
        Self { runner, commands }
    }

    /// Returns the configured commands.
    #[must_use]
    pub const fn commands(&self) -> &HostCommands {
        &self.commands
    }

    /// Creates a filesystem on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::CommandFailure`] when `mkfs` exits non-zero.
    pub fn format(&self, device: &Utf8Path) -> Result<(), VolumeError> {
        let args = vec![
            OsString::from("-t"),
            OsString::from(&self.commands.filesystem_type),
            OsString::from(device.as_str()),
        ];
        self.run_checked(&self.commands.mkfs_bin, &args)
    }

    /// Mounts `device` at `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::CommandFailure`] when `mount` exits non-zero.
    pub fn mount(&self, device: &Utf8Path, mount_point: &Utf8Path) -> Result<(), VolumeError> {
        let args = vec![
            OsString::from(device.as_str()),
            OsString::from(mount_point.as_str()),
        ];
        self.run_checked(&self.commands.mount_bin, &args)
    }

    /// Unmounts whatever is mounted at `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::CommandFailure`] when `umount` exits non-zero.
    pub fn unmount(&self, mount_point: &Utf8Path) -> Result<(), VolumeError> {
        let args = vec![OsString::from(mount_point.as_str())];
        self.run_checked(&self.commands.umount_bin, &args)
    }

    /// Returns `true` when `path` is an active mount point.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Spawn`] when the mountpoint check cannot be started.
    pub fn is_mountpoint(&self, path: &Utf8Path) -> Result<bool, VolumeError> {
        let args = vec![OsString::from("-q"), OsString::from(path.as_str())];
        let output = self.runner.run(&self.commands.mountpoint_bin, &args)?;
        Ok(output.is_success())
    }

    fn run_checked(&self, program: &str, args: &[OsString]) -> Result<(), VolumeError> {
        debug!(program, ?args, "running host command");
        let output = self.runner.run(program, args)?;
        if output.is_success() {
            return Ok(());
        }

        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(VolumeError::CommandFailure {
            program: program.to_owned(),
            status_text,
            output: output.combined(),
        })
    }
}
