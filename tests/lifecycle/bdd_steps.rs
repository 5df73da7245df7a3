//! BDD step definitions for the volume lifecycle.

use std::collections::BTreeMap;

use blocker::VolumeError;
use blocker::driver::SIZE_OPTION;
use blocker::provider::AttachmentState;
use blocker::test_support::TEST_INSTANCE_ID;
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::LifecycleWorld;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("lifecycle operation failed: {0}")]
    Lifecycle(#[from] VolumeError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a host with an empty provider")]
fn empty_provider(lifecycle_world: &LifecycleWorld) -> Result<(), StepError> {
    if lifecycle_world.store.calls().is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "provider should start without calls",
        )))
    }
}

#[given("volume \"{name}\" has been created")]
fn volume_created(lifecycle_world: &LifecycleWorld, name: String) -> Result<(), StepError> {
    let options = BTreeMap::from([(String::from(SIZE_OPTION), String::from("10"))]);
    lifecycle_world
        .runtime
        .block_on(lifecycle_world.driver.create(&name, &options))?;
    Ok(())
}

#[given("volume \"{name}\" has been mounted")]
fn volume_mounted(lifecycle_world: &LifecycleWorld, name: String) -> Result<(), StepError> {
    lifecycle_world
        .runtime
        .block_on(lifecycle_world.driver.mount(&name))?;
    Ok(())
}

#[given("the mount utility fails")]
fn mount_utility_fails(lifecycle_world: &LifecycleWorld) {
    lifecycle_world.host.fail_program("mount");
}

#[when("I mount \"{name}\"")]
fn mount(lifecycle_world: &LifecycleWorld, name: String) {
    let result = lifecycle_world
        .runtime
        .block_on(lifecycle_world.driver.mount(&name));
    lifecycle_world.record(result.map(Some));
}

#[when("I unmount \"{name}\"")]
fn unmount(lifecycle_world: &LifecycleWorld, name: String) {
    let result = lifecycle_world
        .runtime
        .block_on(lifecycle_world.driver.unmount(&name));
    lifecycle_world.record(result.map(|()| None));
}

#[then("the request succeeds")]
fn request_succeeds(lifecycle_world: &LifecycleWorld) -> Result<(), StepError> {
    match &*lifecycle_world.outcome.borrow() {
        Some(Ok(_)) => Ok(()),
        Some(Err(err)) => Err(StepError::Assertion(format!(
            "expected success, got: {err}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the request fails mentioning \"{message}\"")]
fn request_fails(lifecycle_world: &LifecycleWorld, message: String) -> Result<(), StepError> {
    match &*lifecycle_world.outcome.borrow() {
        Some(Err(err)) if err.to_string().contains(&message) => Ok(()),
        Some(Err(err)) => Err(StepError::Assertion(format!(
            "expected error mentioning {message:?}, got: {err}"
        ))),
        Some(Ok(_)) => Err(StepError::Assertion(String::from(
            "expected failure, got success",
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the mount point is the mount root entry for \"{name}\"")]
fn mount_point_matches(lifecycle_world: &LifecycleWorld, name: String) -> Result<(), StepError> {
    let expected = lifecycle_world.mount_root.join(&name);
    match &*lifecycle_world.outcome.borrow() {
        Some(Ok(Some(mount_point))) if *mount_point == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected mount point {expected}, got {other:?}"
        ))),
    }?;
    if lifecycle_world
        .host
        .mounted_device(expected.as_str())
        .is_some()
    {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "nothing is mounted at {expected}"
        )))
    }
}

#[then("volume \"{name}\" is attached to this host")]
fn volume_attached(lifecycle_world: &LifecycleWorld, name: String) -> Result<(), StepError> {
    let volume = lifecycle_world
        .store
        .volume(&name)
        .ok_or_else(|| StepError::Assertion(format!("volume {name} does not exist")))?;
    match volume.sole_attachment() {
        Some(attachment)
            if attachment.instance_id == TEST_INSTANCE_ID
                && attachment.state == AttachmentState::Attached =>
        {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected one attachment to {TEST_INSTANCE_ID}, got {other:?}"
        ))),
    }
}

#[then("volume \"{name}\" is detached")]
fn volume_detached(lifecycle_world: &LifecycleWorld, name: String) -> Result<(), StepError> {
    let volume = lifecycle_world
        .store
        .volume(&name)
        .ok_or_else(|| StepError::Assertion(format!("volume {name} does not exist")))?;
    if volume.attachments.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no attachments, got {:?}",
            volume.attachments
        )))
    }
}

#[then("the path of \"{name}\" is reported as not mounted")]
fn path_not_mounted(lifecycle_world: &LifecycleWorld, name: String) -> Result<(), StepError> {
    match lifecycle_world.driver.path(&name) {
        Err(VolumeError::NotMounted { name: reported }) if reported == name => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected NotMounted for {name}, got {other:?}"
        ))),
    }
}

#[then("no mount directory exists for \"{name}\"")]
fn no_mount_directory(lifecycle_world: &LifecycleWorld, name: String) -> Result<(), StepError> {
    let path = lifecycle_world.mount_root.join(&name);
    if path.exists() {
        Err(StepError::Assertion(format!("{path} should not exist")))
    } else {
        Ok(())
    }
}
