//! Shared fixtures for lifecycle BDD scenarios.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use blocker::provider::HostIdentity;
use blocker::test_support::{
    MemoryBlockStore, SimulatedHost, TEST_AVAILABILITY_ZONE, TEST_INSTANCE_ID,
};
use blocker::{DriverSettings, HostCommands, HostLayout, PollPolicy, VolumeDriver, VolumeError};
use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// Outcome of the last `When` step: a mount point or an error.
pub type Outcome = Result<Option<Utf8PathBuf>, VolumeError>;

pub struct LifecycleWorld {
    _tmp: TempDir,
    pub runtime: Runtime,
    pub mount_root: Utf8PathBuf,
    pub store: Arc<MemoryBlockStore>,
    pub host: SimulatedHost,
    pub driver: VolumeDriver<MemoryBlockStore, SimulatedHost>,
    pub outcome: RefCell<Option<Outcome>>,
}

impl LifecycleWorld {
    pub fn record(&self, outcome: Outcome) {
        self.outcome.replace(Some(outcome));
    }
}

#[fixture]
pub fn lifecycle_world() -> LifecycleWorld {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()));
    let mount_root = base.join("mnt");
    let layout = HostLayout::new(mount_root.clone(), base.join("dev"));
    std::fs::create_dir_all(layout.device_dir())
        .unwrap_or_else(|err| panic!("create device dir: {err}"));

    let store = Arc::new(MemoryBlockStore::new(layout.device_dir()));
    let host = SimulatedHost::new();
    let settings = DriverSettings {
        identity: HostIdentity {
            instance_id: TEST_INSTANCE_ID.to_owned(),
            region: String::from("us-east-1"),
            availability_zone: TEST_AVAILABILITY_ZONE.to_owned(),
        },
        layout,
        commands: HostCommands::default(),
        poll: PollPolicy {
            attempts: 12,
            interval: Duration::from_millis(1),
        },
    };
    let driver = VolumeDriver::new(Arc::clone(&store), host.clone(), settings);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap_or_else(|err| panic!("runtime: {err}"));

    LifecycleWorld {
        _tmp: tmp,
        runtime,
        mount_root,
        store,
        host,
        driver,
        outcome: RefCell::new(None),
    }
}
