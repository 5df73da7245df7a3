//! BDD scenarios for the volume lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleWorld, lifecycle_world};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Mount a created volume"
)]
fn scenario_mount_created_volume(lifecycle_world: LifecycleWorld) {
    drop(lifecycle_world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Unmount releases the volume"
)]
fn scenario_unmount_releases_volume(lifecycle_world: LifecycleWorld) {
    drop(lifecycle_world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "A failed mount leaves nothing behind"
)]
fn scenario_failed_mount_cleans_up(lifecycle_world: LifecycleWorld) {
    drop(lifecycle_world);
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Mounting an unknown volume"
)]
fn scenario_mount_unknown_volume(lifecycle_world: LifecycleWorld) {
    drop(lifecycle_world);
}
