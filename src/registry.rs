//! Name-based lookup of provider volumes.
//!
//! A volume's identity is the value of its `Name` tag. The registry never
//! caches: every call is a fresh describe against the block store.

use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::warn;

use crate::error::VolumeError;
use crate::layout::HostLayout;
use crate::provider::{BlockStore, VolumeFilter, VolumeSnapshot};

/// Listing entry: a named volume and its mount point when mounted here.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeEntry {
    /// Logical name taken from the name tag.
    pub name: String,
    /// Provider-assigned identifier.
    pub volume_id: String,
    /// Local mount directory, present only while mounted.
    pub mountpoint: Option<Utf8PathBuf>,
}

/// Read-only view of provider volumes keyed by logical name.
#[derive(Debug)]
pub struct Registry<S: ?Sized> {
    store: Arc<S>,
    layout: HostLayout,
}

impl<S: ?Sized> Clone for Registry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            layout: self.layout.clone(),
        }
    }
}

impl<S: BlockStore + ?Sized> Registry<S> {
    /// Creates a registry over `store`, annotating mounts under `layout`.
    #[must_use]
    pub const fn new(store: Arc<S>, layout: HostLayout) -> Self {
        Self { store, layout }
    }

    /// Underlying block store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Host layout used for mount annotations.
    #[must_use]
    pub const fn layout(&self) -> &HostLayout {
        &self.layout
    }

    /// Fetches the current state of the volume tagged `name`.
    ///
    /// When several volumes share the tag the first one reported by the
    /// provider is used and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotFound`] when no volume carries the tag, or
    /// the provider failure when the describe call fails.
    pub async fn find_by_name(&self, name: &str) -> Result<VolumeSnapshot, VolumeError> {
        let filter = VolumeFilter::NameTag(name.to_owned());
        let mut volumes = self.store.describe_volumes(&filter).await?;
        if volumes.len() > 1 {
            let ids: Vec<&str> = volumes.iter().map(|v| v.volume_id.as_str()).collect();
            warn!(volume = name, ?ids, "several volumes share this name, using the first");
        }
        if volumes.is_empty() {
            return Err(VolumeError::NotFound {
                name: name.to_owned(),
            });
        }
        Ok(volumes.swap_remove(0))
    }

    /// Describes one volume as a listing entry.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Registry::find_by_name`].
    pub async fn describe(&self, name: &str) -> Result<VolumeEntry, VolumeError> {
        let volume = self.find_by_name(name).await?;
        Ok(VolumeEntry {
            name: name.to_owned(),
            volume_id: volume.volume_id,
            mountpoint: self.mountpoint_of(name),
        })
    }

    /// Lists every volume carrying a name tag.
    ///
    /// # Errors
    ///
    /// Returns the provider failure when the describe call fails.
    pub async fn list(&self) -> Result<Vec<VolumeEntry>, VolumeError> {
        let volumes = self.store.describe_volumes(&VolumeFilter::HasNameTag).await?;
        Ok(volumes
            .into_iter()
            .filter_map(|volume| {
                let name = volume.name()?.to_owned();
                let mountpoint = self.mountpoint_of(&name);
                Some(VolumeEntry {
                    name,
                    volume_id: volume.volume_id,
                    mountpoint,
                })
            })
            .collect())
    }

    fn mountpoint_of(&self, name: &str) -> Option<Utf8PathBuf> {
        if !crate::driver::is_valid_name(name) {
            return None;
        }
        self.layout
            .has_mount_dir(name)
            .then(|| self.layout.mount_point(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::VolumeState;
    use crate::test_support::MemoryBlockStore;
    use tempfile::TempDir;

    fn setup(tmp: &TempDir) -> (Arc<MemoryBlockStore>, Registry<MemoryBlockStore>) {
        let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()));
        let layout = HostLayout::new(base.join("mnt"), base.join("dev"));
        let store = Arc::new(MemoryBlockStore::new(layout.device_dir()));
        let registry = Registry::new(Arc::clone(&store), layout);
        (store, registry)
    }

    #[tokio::test]
    async fn find_by_name_matches_tag_value() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let (store, registry) = setup(&tmp);
        let id = store.insert_volume("vol1", VolumeState::Available, Vec::new());
        store.insert_volume("vol2", VolumeState::Available, Vec::new());

        let volume = registry
            .find_by_name("vol1")
            .await
            .unwrap_or_else(|err| panic!("lookup: {err}"));
        assert_eq!(volume.volume_id, id);

        let err = registry
            .find_by_name("vol3")
            .await
            .expect_err("unknown name");
        assert_eq!(
            err,
            VolumeError::NotFound {
                name: String::from("vol3")
            }
        );
    }

    #[tokio::test]
    async fn duplicate_names_resolve_to_first_match() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let (store, registry) = setup(&tmp);
        let first = store.insert_volume("dup", VolumeState::Available, Vec::new());
        store.insert_volume("dup", VolumeState::Available, Vec::new());

        let volume = registry
            .find_by_name("dup")
            .await
            .unwrap_or_else(|err| panic!("lookup: {err}"));
        assert_eq!(volume.volume_id, first);
    }

    #[tokio::test]
    async fn list_reports_name_tag_and_mountpoint() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let (store, registry) = setup(&tmp);
        store.insert_volume("vol1", VolumeState::Available, Vec::new());
        store.insert_volume("vol2", VolumeState::InUse, Vec::new());
        store.insert_untagged_volume();
        registry
            .layout()
            .ensure_mount_dir("vol2")
            .unwrap_or_else(|err| panic!("mkdir: {err}"));

        let mut entries = registry
            .list()
            .await
            .unwrap_or_else(|err| panic!("list: {err}"));
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2, "untagged volumes are not listed");
        assert_eq!(entries[0].name, "vol1");
        assert_eq!(entries[0].mountpoint, None);
        assert_eq!(entries[1].name, "vol2");
        assert_eq!(
            entries[1].mountpoint,
            Some(registry.layout().mount_point("vol2"))
        );
    }

    #[tokio::test]
    async fn list_skips_mount_lookup_for_unusable_names() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let (store, registry) = setup(&tmp);
        store.insert_volume("..", VolumeState::Available, Vec::new());

        let entries = registry
            .list()
            .await
            .unwrap_or_else(|err| panic!("list: {err}"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mountpoint, None);
    }
}
