//! Host-local paths: the mount root and the device directory.
//!
//! Both directories are accessed through `cap-std` handles so lookups for a
//! volume name or a device node cannot escape their directory.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use crate::error::VolumeError;

/// Default directory holding one mount point per volume.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt/blocker";

/// Default directory where the kernel exposes block devices.
pub const DEFAULT_DEVICE_DIR: &str = "/dev";

/// Mount root and device directory of the current host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostLayout {
    mount_root: Utf8PathBuf,
    device_dir: Utf8PathBuf,
}

impl Default for HostLayout {
    fn default() -> Self {
        Self::new(DEFAULT_MOUNT_ROOT, DEFAULT_DEVICE_DIR)
    }
}

impl HostLayout {
    /// Creates a layout from explicit directories.
    #[must_use]
    pub fn new(mount_root: impl Into<Utf8PathBuf>, device_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
            device_dir: device_dir.into(),
        }
    }

    /// Directory under which volumes are mounted.
    #[must_use]
    pub fn mount_root(&self) -> &Utf8Path {
        &self.mount_root
    }

    /// Directory containing device nodes.
    #[must_use]
    pub fn device_dir(&self) -> &Utf8Path {
        &self.device_dir
    }

    /// Mount point for a volume: `<mount-root>/<name>`.
    #[must_use]
    pub fn mount_point(&self, name: &str) -> Utf8PathBuf {
        self.mount_root.join(name)
    }

    /// Local path of a device node in the device directory.
    #[must_use]
    pub fn device_path(&self, file_name: &str) -> Utf8PathBuf {
        self.device_dir.join(file_name)
    }

    /// Returns `true` when the device node exists. Symlinks count even when
    /// dangling, matching `lstat` semantics.
    #[must_use]
    pub fn device_exists(&self, file_name: &str) -> bool {
        Dir::open_ambient_dir(&self.device_dir, ambient_authority())
            .is_ok_and(|dir| dir.symlink_metadata(file_name).is_ok())
    }

    /// Returns `true` when `<mount-root>/<name>` exists and is a directory.
    #[must_use]
    pub fn has_mount_dir(&self, name: &str) -> bool {
        self.is_dir_below_root(name)
    }

    /// Returns `true` when `<mount-root>/<name><subpath>` exists and is a
    /// directory. `subpath` is empty or starts with `/`.
    #[must_use]
    pub fn has_mount_subdir(&self, name: &str, subpath: &str) -> bool {
        self.is_dir_below_root(&format!("{name}{subpath}"))
    }

    /// Creates the mount root and the volume's mount directory.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Io`] when either directory cannot be created or
    /// the mount point exists but is not a directory.
    pub fn ensure_mount_dir(&self, name: &str) -> Result<Utf8PathBuf, VolumeError> {
        Dir::create_ambient_dir_all(&self.mount_root, ambient_authority())
            .map_err(|err| VolumeError::io(self.mount_root.as_str(), &err))?;
        let root = self.open_mount_root()?;
        let mount_point = self.mount_point(name);
        root.create_dir_all(name)
            .map_err(|err| VolumeError::io(mount_point.as_str(), &err))?;

        let is_dir = root
            .metadata(name)
            .map_err(|err| VolumeError::io(mount_point.as_str(), &err))?
            .is_dir();
        if !is_dir {
            return Err(VolumeError::Io {
                path: mount_point.into_string(),
                message: String::from("mount point is not a directory"),
            });
        }
        Ok(mount_point)
    }

    /// Removes the (empty) mount directory of a volume.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Io`] when the directory cannot be removed.
    pub fn remove_mount_dir(&self, name: &str) -> Result<(), VolumeError> {
        let root = self.open_mount_root()?;
        root.remove_dir(name)
            .map_err(|err| VolumeError::io(self.mount_point(name).as_str(), &err))
    }

    fn is_dir_below_root(&self, relative: &str) -> bool {
        Dir::open_ambient_dir(&self.mount_root, ambient_authority())
            .is_ok_and(|dir| dir.metadata(relative).is_ok_and(|meta| meta.is_dir()))
    }

    fn open_mount_root(&self) -> Result<Dir, VolumeError> {
        Dir::open_ambient_dir(&self.mount_root, ambient_authority())
            .map_err(|err| VolumeError::io(self.mount_root.as_str(), &err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(tmp: &TempDir) -> HostLayout {
        let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()));
        HostLayout::new(base.join("mnt"), base.join("dev"))
    }

    #[test]
    fn mount_point_joins_root_and_name() {
        let layout = HostLayout::default();
        assert_eq!(layout.mount_point("vol1"), "/mnt/blocker/vol1");
        assert_eq!(layout.device_path("xvdf"), "/dev/xvdf");
    }

    #[test]
    fn ensure_mount_dir_creates_root_and_directory() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let layout = layout(&tmp);
        assert!(!layout.has_mount_dir("vol1"));

        let created = layout
            .ensure_mount_dir("vol1")
            .unwrap_or_else(|err| panic!("ensure mount dir: {err}"));
        assert_eq!(created, layout.mount_point("vol1"));
        assert!(layout.has_mount_dir("vol1"));

        layout
            .remove_mount_dir("vol1")
            .unwrap_or_else(|err| panic!("remove mount dir: {err}"));
        assert!(!layout.has_mount_dir("vol1"));
    }

    #[test]
    fn ensure_mount_dir_rejects_regular_file() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let layout = layout(&tmp);
        std::fs::create_dir_all(layout.mount_root())
            .unwrap_or_else(|err| panic!("mkdir: {err}"));
        std::fs::write(layout.mount_point("vol1"), b"")
            .unwrap_or_else(|err| panic!("write: {err}"));

        let err = layout
            .ensure_mount_dir("vol1")
            .expect_err("file in place of directory should fail");
        assert!(matches!(err, VolumeError::Io { .. }), "unexpected: {err}");
        assert!(!layout.has_mount_dir("vol1"));
    }

    #[test]
    fn mount_subdir_must_be_a_directory_below_the_mount_point() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let layout = layout(&tmp);
        let mount_point = layout
            .ensure_mount_dir("vol1")
            .unwrap_or_else(|err| panic!("ensure mount dir: {err}"));
        std::fs::create_dir(mount_point.join("data")).unwrap_or_else(|err| panic!("mkdir: {err}"));
        std::fs::write(mount_point.join("notes"), b"").unwrap_or_else(|err| panic!("write: {err}"));

        assert!(layout.has_mount_subdir("vol1", ""));
        assert!(layout.has_mount_subdir("vol1", "/data"));
        assert!(!layout.has_mount_subdir("vol1", "/missing"));
        assert!(!layout.has_mount_subdir("vol1", "/notes"));
        assert!(!layout.has_mount_subdir("vol1", "/../../outside"));
    }

    #[test]
    fn device_exists_checks_device_directory() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let layout = layout(&tmp);
        assert!(!layout.device_exists("sdf"), "missing device dir means no device");

        std::fs::create_dir_all(layout.device_dir()).unwrap_or_else(|err| panic!("mkdir: {err}"));
        std::fs::write(layout.device_path("xvdf"), b"")
            .unwrap_or_else(|err| panic!("write: {err}"));
        assert!(layout.device_exists("xvdf"));
        assert!(!layout.device_exists("sdf"));
    }
}
