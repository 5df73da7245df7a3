//! Test support utilities shared across unit and integration tests.
//!
//! [`MemoryBlockStore`] simulates a provider whose attach and detach requests
//! complete a few describe calls later, materialising device nodes in a
//! directory chosen by the test. [`SimulatedHost`] stands in for `mkfs`,
//! `mount`, `umount`, and `mountpoint`. [`ScriptedRunner`] replays queued
//! command outputs in FIFO order.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::allocator::DeviceSlot;
use crate::error::VolumeError;
use crate::host::{CommandOutput, CommandRunner};
use crate::provider::{
    AttachmentSnapshot, AttachmentState, BlockStore, NAME_TAG, ProviderError, ProviderFuture,
    VolumeFilter, VolumeSnapshot, VolumeState,
};

/// Instance id used by the simulated provider for this host.
pub const TEST_INSTANCE_ID: &str = "i-0123456789abcdef0";

/// Availability zone used by the simulated provider.
pub const TEST_AVAILABILITY_ZONE: &str = "us-east-1a";

/// Local alias the simulated kernel creates for an attached slot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DeviceNaming {
    /// Devices appear as `xvd<letter>`.
    #[default]
    Xvd,
    /// Devices appear as `sd<letter>`.
    Sd,
    /// No device node appears at all.
    Missing,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Pending {
    Create,
    Attach,
    Detach,
}

#[derive(Debug)]
struct SimVolume {
    snapshot: VolumeSnapshot,
    pending: Option<(Pending, u32)>,
}

#[derive(Debug, Default)]
struct StoreState {
    volumes: Vec<SimVolume>,
    next_id: u32,
    calls: Vec<String>,
    rejected_devices: BTreeSet<String>,
    failures: HashMap<&'static str, VecDeque<ProviderError>>,
    settle_after: u32,
    naming: DeviceNaming,
    shared_devices: bool,
    yield_calls: bool,
}

/// In-memory block store with delayed state transitions.
#[derive(Clone, Debug)]
pub struct MemoryBlockStore {
    state: Arc<Mutex<StoreState>>,
    device_dir: Utf8PathBuf,
}

impl MemoryBlockStore {
    /// Creates an empty store that materialises device nodes in `device_dir`.
    #[must_use]
    pub fn new(device_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                settle_after: 1,
                ..StoreState::default()
            })),
            device_dir: device_dir.into(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of describe calls after which a create, attach, or detach settles.
    pub fn set_settle_after(&self, describes: u32) {
        self.lock().settle_after = describes.max(1);
    }

    /// Chooses which local alias appears when an attachment settles.
    pub fn set_device_naming(&self, naming: DeviceNaming) {
        self.lock().naming = naming;
    }

    /// Accepts attach requests for a device another volume on the same
    /// instance already uses, leaving slot exclusivity to the caller.
    pub fn allow_shared_devices(&self) {
        self.lock().shared_devices = true;
    }

    /// Makes every call yield to the scheduler once before it takes effect.
    pub fn yield_between_calls(&self) {
        self.lock().yield_calls = true;
    }

    /// Makes every attach naming `device` fail as already in use.
    pub fn reject_device(&self, device: &str) {
        self.lock().rejected_devices.insert(device.to_owned());
    }

    /// Queues `err` as the result of the next call to `operation`
    /// (`create`, `tag`, `describe`, `attach`, or `detach`).
    pub fn fail_next(&self, operation: &'static str, err: ProviderError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(err);
    }

    /// Inserts a settled volume tagged `name` and returns its id.
    pub fn insert_volume(
        &self,
        name: &str,
        state: VolumeState,
        attachments: Vec<AttachmentSnapshot>,
    ) -> String {
        let mut tags = BTreeMap::new();
        tags.insert(NAME_TAG.to_owned(), name.to_owned());
        self.insert(state, attachments, tags)
    }

    /// Inserts an available volume without any tag and returns its id.
    pub fn insert_untagged_volume(&self) -> String {
        self.insert(VolumeState::Available, Vec::new(), BTreeMap::new())
    }

    fn insert(
        &self,
        state: VolumeState,
        attachments: Vec<AttachmentSnapshot>,
        tags: BTreeMap<String, String>,
    ) -> String {
        let mut guard = self.lock();
        guard.next_id += 1;
        let volume_id = format!("vol-{:08x}", guard.next_id);
        guard.volumes.push(SimVolume {
            snapshot: VolumeSnapshot {
                volume_id: volume_id.clone(),
                state,
                attachments,
                tags,
            },
            pending: None,
        });
        volume_id
    }

    /// Current snapshot of volume tagged `name`, without advancing transitions.
    #[must_use]
    pub fn volume(&self, name: &str) -> Option<VolumeSnapshot> {
        self.lock()
            .volumes
            .iter()
            .find(|volume| volume.snapshot.name() == Some(name))
            .map(|volume| volume.snapshot.clone())
    }

    /// Recorded mutating calls such as `attach vol-00000001 /dev/sdf`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Recorded calls starting with `operation`.
    #[must_use]
    pub fn calls_to(&self, operation: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .collect()
    }

    fn take_failure(state: &mut StoreState, operation: &'static str) -> Option<ProviderError> {
        state.failures.get_mut(operation)?.pop_front()
    }

    fn advance(&self, state: &mut StoreState) {
        let naming = state.naming;
        for volume in &mut state.volumes {
            let Some((kind, remaining)) = volume.pending else {
                continue;
            };
            if remaining > 1 {
                volume.pending = Some((kind, remaining - 1));
                continue;
            }
            volume.pending = None;
            match kind {
                Pending::Create => volume.snapshot.state = VolumeState::Available,
                Pending::Attach => {
                    if let Some(attachment) = volume.snapshot.attachments.first_mut() {
                        attachment.state = AttachmentState::Attached;
                        self.materialise(&attachment.device, naming);
                    }
                }
                Pending::Detach => {
                    for attachment in volume.snapshot.attachments.drain(..) {
                        self.remove_device(&attachment.device);
                    }
                    volume.snapshot.state = VolumeState::Available;
                }
            }
        }
    }

    fn materialise(&self, device: &str, naming: DeviceNaming) {
        let Some(slot) = DeviceSlot::from_device_name(device) else {
            return;
        };
        let [sd, xvd] = slot.aliases();
        let alias = match naming {
            DeviceNaming::Xvd => xvd,
            DeviceNaming::Sd => sd,
            DeviceNaming::Missing => return,
        };
        if let Ok(dir) = Dir::open_ambient_dir(&self.device_dir, ambient_authority()) {
            dir.write(&alias, b"").ok();
        }
    }

    fn remove_device(&self, device: &str) {
        let Some(slot) = DeviceSlot::from_device_name(device) else {
            return;
        };
        if let Ok(dir) = Dir::open_ambient_dir(&self.device_dir, ambient_authority()) {
            for alias in slot.aliases() {
                dir.remove_file(&alias).ok();
            }
        }
    }

    fn create(&self, availability_zone: &str, size_gib: u32) -> Result<String, ProviderError> {
        let mut state = self.lock();
        state
            .calls
            .push(format!("create {availability_zone} {size_gib}"));
        if let Some(err) = Self::take_failure(&mut state, "create") {
            return Err(err);
        }
        state.next_id += 1;
        let volume_id = format!("vol-{:08x}", state.next_id);
        let settle = state.settle_after;
        state.volumes.push(SimVolume {
            snapshot: VolumeSnapshot {
                volume_id: volume_id.clone(),
                state: VolumeState::Creating,
                attachments: Vec::new(),
                tags: BTreeMap::new(),
            },
            pending: Some((Pending::Create, settle)),
        });
        Ok(volume_id)
    }

    fn tag(&self, volume_id: &str, key: &str, value: &str) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.calls.push(format!("tag {volume_id} {key}={value}"));
        if let Some(err) = Self::take_failure(&mut state, "tag") {
            return Err(err);
        }
        let volume = find_mut(&mut state, volume_id)?;
        volume
            .snapshot
            .tags
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn describe(&self, filter: &VolumeFilter) -> Result<Vec<VolumeSnapshot>, ProviderError> {
        let mut state = self.lock();
        if let Some(err) = Self::take_failure(&mut state, "describe") {
            return Err(err);
        }
        self.advance(&mut state);
        Ok(state
            .volumes
            .iter()
            .map(|volume| &volume.snapshot)
            .filter(|snapshot| filter.matches(snapshot))
            .cloned()
            .collect())
    }

    fn attach(&self, volume_id: &str, instance_id: &str, device: &str) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state
            .calls
            .push(format!("attach {volume_id} {device}"));
        if let Some(err) = Self::take_failure(&mut state, "attach") {
            return Err(err);
        }

        let device_shared = state.volumes.iter().any(|volume| {
            volume.snapshot.attachments.iter().any(|attachment| {
                attachment.instance_id == instance_id && attachment.device == device
            })
        });
        let device_taken =
            state.rejected_devices.contains(device) || (device_shared && !state.shared_devices);
        if device_taken {
            return Err(ProviderError::DeviceInUse {
                device: device.to_owned(),
                message: format!("Invalid value '{device}' for unixDevice. Attachment point {device} is already in use"),
            });
        }

        let settle = state.settle_after;
        let volume = find_mut(&mut state, volume_id)?;
        if volume.snapshot.state != VolumeState::Available {
            return Err(incorrect_state(volume_id, &volume.snapshot.state));
        }
        volume.snapshot.state = VolumeState::InUse;
        volume.snapshot.attachments = vec![AttachmentSnapshot {
            device: device.to_owned(),
            instance_id: instance_id.to_owned(),
            state: AttachmentState::Attaching,
        }];
        volume.pending = Some((Pending::Attach, settle));
        Ok(())
    }

    fn detach(&self, volume_id: &str, instance_id: &str) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.calls.push(format!("detach {volume_id}"));
        if let Some(err) = Self::take_failure(&mut state, "detach") {
            return Err(err);
        }

        let settle = state.settle_after;
        let volume = find_mut(&mut state, volume_id)?;
        let Some(attachment) = volume
            .snapshot
            .attachments
            .iter_mut()
            .find(|attachment| attachment.instance_id == instance_id)
        else {
            return Err(incorrect_state(volume_id, &volume.snapshot.state));
        };
        attachment.state = AttachmentState::Detaching;
        volume.pending = Some((Pending::Detach, settle));
        Ok(())
    }
}

fn find_mut<'a>(state: &'a mut StoreState, volume_id: &str) -> Result<&'a mut SimVolume, ProviderError> {
    state
        .volumes
        .iter_mut()
        .find(|volume| volume.snapshot.volume_id == volume_id)
        .ok_or_else(|| ProviderError::Api {
            code: String::from("InvalidVolume.NotFound"),
            message: format!("The volume '{volume_id}' does not exist."),
        })
}

fn incorrect_state(volume_id: &str, state: &VolumeState) -> ProviderError {
    ProviderError::Api {
        code: String::from("IncorrectState"),
        message: format!("Volume '{volume_id}' is '{state}'."),
    }
}

impl MemoryBlockStore {
    fn respond<'a, T, F>(&'a self, call: F) -> ProviderFuture<'a, T>
    where
        T: Send + 'a,
        F: FnOnce() -> Result<T, ProviderError> + Send + 'a,
    {
        let yield_first = self.lock().yield_calls;
        Box::pin(async move {
            if yield_first {
                tokio::task::yield_now().await;
            }
            call()
        })
    }
}

impl BlockStore for MemoryBlockStore {
    fn create_volume<'a>(
        &'a self,
        availability_zone: &'a str,
        size_gib: u32,
    ) -> ProviderFuture<'a, String> {
        self.respond(move || self.create(availability_zone, size_gib))
    }

    fn tag_volume<'a>(
        &'a self,
        volume_id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> ProviderFuture<'a, ()> {
        self.respond(move || self.tag(volume_id, key, value))
    }

    fn describe_volumes<'a>(
        &'a self,
        filter: &'a VolumeFilter,
    ) -> ProviderFuture<'a, Vec<VolumeSnapshot>> {
        self.respond(move || self.describe(filter))
    }

    fn attach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        device: &'a str,
    ) -> ProviderFuture<'a, ()> {
        self.respond(move || self.attach(volume_id, instance_id, device))
    }

    fn detach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, ()> {
        self.respond(move || self.detach(volume_id, instance_id))
    }
}

/// Records a single invocation made through a test runner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    fn arg(&self, index: usize) -> String {
        self.args
            .get(index)
            .map(|arg| arg.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct HostState {
    formatted: BTreeSet<String>,
    mounts: BTreeMap<String, String>,
    failing: BTreeSet<String>,
    invocations: Vec<CommandInvocation>,
}

/// Command runner that simulates filesystem utilities in memory.
///
/// `mkfs` records the device as formatted, `mount` and `umount` maintain a
/// mount table, and `mountpoint -q` consults it. Programs registered with
/// [`SimulatedHost::fail_program`] exit with status 32.
#[derive(Clone, Debug, Default)]
pub struct SimulatedHost {
    state: Arc<Mutex<HostState>>,
}

impl SimulatedHost {
    /// Creates a host with an empty mount table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every run of `program` fail.
    pub fn fail_program(&self, program: &str) {
        self.lock().failing.insert(program.to_owned());
    }

    /// Lets `program` succeed again.
    pub fn clear_failure(&self, program: &str) {
        self.lock().failing.remove(program);
    }

    /// Marks `mount_point` as mounted from `device`.
    pub fn add_mount(&self, device: &str, mount_point: &str) {
        self.lock()
            .mounts
            .insert(mount_point.to_owned(), device.to_owned());
    }

    /// Device mounted at `mount_point`, if any.
    #[must_use]
    pub fn mounted_device(&self, mount_point: &str) -> Option<String> {
        self.lock().mounts.get(mount_point).cloned()
    }

    /// Returns `true` when `device` has been formatted.
    #[must_use]
    pub fn is_formatted(&self, device: &str) -> bool {
        self.lock().formatted.contains(device)
    }

    /// All invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.lock().invocations.clone()
    }

    /// Invocations of `program`.
    #[must_use]
    pub fn invocations_of(&self, program: &str) -> Vec<CommandInvocation> {
        self.invocations()
            .into_iter()
            .filter(|call| call.program == program)
            .collect()
    }
}

fn exit(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_owned(),
    }
}

impl CommandRunner for SimulatedHost {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, VolumeError> {
        let invocation = CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        };
        let mut state = self.lock();
        state.invocations.push(invocation.clone());
        if state.failing.contains(program) {
            return Ok(exit(32, &format!("{program}: simulated failure")));
        }

        let output = match program {
            "mkfs" => {
                state.formatted.insert(invocation.arg(2));
                exit(0, "")
            }
            "mount" => {
                let mount_point = invocation.arg(1);
                if state.mounts.contains_key(&mount_point) {
                    exit(32, "mount: already mounted")
                } else {
                    state.mounts.insert(mount_point, invocation.arg(0));
                    exit(0, "")
                }
            }
            "umount" => match state.mounts.remove(&invocation.arg(0)) {
                Some(_) => exit(0, ""),
                None => exit(32, "umount: not mounted"),
            },
            "mountpoint" => {
                if state.mounts.contains_key(&invocation.arg(1)) {
                    exit(0, "")
                } else {
                    exit(1, "")
                }
            }
            _ => {
                return Err(VolumeError::Spawn {
                    program: program.to_owned(),
                    message: String::from("No such file or directory"),
                });
            }
        };
        Ok(output)
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, VolumeError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| VolumeError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)], removed: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs
                    .iter()
                    .map(|(key, _)| *key)
                    .chain(removed.iter().copied())
                    .all(|key| seen.insert(key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len() + removed.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
        }
        for key in removed {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
