//! Unit tests for configuration loading and validation.

use blocker::config::{ConfigError, DEFAULT_SOCKET_PATH};
use blocker::layout::{DEFAULT_DEVICE_DIR, DEFAULT_MOUNT_ROOT};
use blocker::BlockerConfig;
use blocker::test_support::EnvGuard;
use rstest::*;
use tempfile::TempDir;

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};

const CONFIG_VARS: [&str; 11] = [
    "BLOCKER_CONFIG_PATH",
    "BLOCKER_SOCKET_PATH",
    "BLOCKER_MOUNT_ROOT",
    "BLOCKER_DEVICE_DIR",
    "BLOCKER_FILESYSTEM_TYPE",
    "BLOCKER_MKFS_BIN",
    "BLOCKER_MOUNT_BIN",
    "BLOCKER_UMOUNT_BIN",
    "BLOCKER_MOUNTPOINT_BIN",
    "BLOCKER_LOG_FILTER",
    "BLOCKER_ENDPOINT_URL",
];

fn cleared_except(set: &[&str]) -> Vec<&'static str> {
    CONFIG_VARS
        .iter()
        .copied()
        .filter(|key| !set.contains(key))
        .collect()
}

fn default_config() -> BlockerConfig {
    BlockerConfig {
        socket_path: String::from(DEFAULT_SOCKET_PATH),
        mount_root: String::from(DEFAULT_MOUNT_ROOT),
        device_dir: String::from(DEFAULT_DEVICE_DIR),
        filesystem_type: String::from("ext4"),
        mkfs_bin: String::from("mkfs"),
        mount_bin: String::from("mount"),
        umount_bin: String::from("umount"),
        mountpoint_bin: String::from("mountpoint"),
        log_filter: String::from("info"),
        endpoint_url: None,
    }
}

#[fixture]
fn valid_config() -> BlockerConfig {
    default_config()
}

#[rstest]
fn valid_config_passes_validation(valid_config: BlockerConfig) {
    valid_config
        .validate()
        .unwrap_or_else(|err| panic!("valid config should pass: {err}"));
}

#[rstest]
#[case::socket(|cfg: &mut BlockerConfig| cfg.socket_path.clear(), "BLOCKER_SOCKET_PATH", "socket_path")]
#[case::mount_root(|cfg: &mut BlockerConfig| cfg.mount_root.clear(), "BLOCKER_MOUNT_ROOT", "mount_root")]
#[case::device_dir(|cfg: &mut BlockerConfig| cfg.device_dir = String::from("  "), "BLOCKER_DEVICE_DIR", "device_dir")]
#[case::filesystem(|cfg: &mut BlockerConfig| cfg.filesystem_type.clear(), "BLOCKER_FILESYSTEM_TYPE", "filesystem_type")]
#[case::mkfs(|cfg: &mut BlockerConfig| cfg.mkfs_bin.clear(), "BLOCKER_MKFS_BIN", "mkfs_bin")]
#[case::mount(|cfg: &mut BlockerConfig| cfg.mount_bin.clear(), "BLOCKER_MOUNT_BIN", "mount_bin")]
#[case::umount(|cfg: &mut BlockerConfig| cfg.umount_bin.clear(), "BLOCKER_UMOUNT_BIN", "umount_bin")]
#[case::mountpoint(|cfg: &mut BlockerConfig| cfg.mountpoint_bin.clear(), "BLOCKER_MOUNTPOINT_BIN", "mountpoint_bin")]
fn validation_errors_are_actionable(
    valid_config: BlockerConfig,
    #[case] mutate: fn(&mut BlockerConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("blocker.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn empty_endpoint_override_is_rejected(valid_config: BlockerConfig) {
    let cfg = BlockerConfig {
        endpoint_url: Some(String::from(" ")),
        ..valid_config
    };

    let error = cfg.validate().expect_err("empty endpoint should fail");
    assert!(
        error.to_string().contains("BLOCKER_ENDPOINT_URL"),
        "unexpected error: {error}"
    );
}

#[rstest]
fn derived_values_follow_fields(valid_config: BlockerConfig) {
    let cfg = BlockerConfig {
        mount_root: String::from("/srv/volumes"),
        mkfs_bin: String::from("/sbin/mkfs"),
        filesystem_type: String::from("xfs"),
        ..valid_config
    };

    assert_eq!(cfg.socket_path().as_str(), DEFAULT_SOCKET_PATH);
    assert_eq!(cfg.layout().mount_point("vol1").as_str(), "/srv/volumes/vol1");
    assert_eq!(cfg.layout().device_dir().as_str(), DEFAULT_DEVICE_DIR);
    let commands = cfg.host_commands();
    assert_eq!(commands.mkfs_bin, "/sbin/mkfs");
    assert_eq!(commands.filesystem_type, "xfs");
}

#[tokio::test]
async fn load_applies_defaults() {
    let _guard = EnvGuard::set_vars(&[], &CONFIG_VARS).await;
    let cfg = BlockerConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("defaults should load: {err}"));

    assert_eq!(cfg, default_config());
}

#[tokio::test]
async fn load_reads_environment_overrides() {
    let set = [
        ("BLOCKER_SOCKET_PATH", "/run/docker/plugins/ebs.sock"),
        ("BLOCKER_MOUNT_ROOT", "/srv/volumes"),
        ("BLOCKER_ENDPOINT_URL", "http://localhost:4566"),
    ];
    let keys: Vec<&str> = set.iter().map(|(key, _)| *key).collect();
    let _guard = EnvGuard::set_vars(&set, &cleared_except(&keys)).await;

    let cfg = BlockerConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("environment should load: {err}"));

    assert_eq!(cfg.socket_path, "/run/docker/plugins/ebs.sock");
    assert_eq!(cfg.mount_root, "/srv/volumes");
    assert_eq!(cfg.endpoint_url.as_deref(), Some("http://localhost:4566"));
    assert_eq!(cfg.device_dir, DEFAULT_DEVICE_DIR);
}

#[tokio::test]
async fn load_reads_config_file_named_by_env() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let tmp_root =
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap_or_else(|non_utf8_path| {
            panic!("temp dir should be utf8: {}", non_utf8_path.display())
        });
    Dir::open_ambient_dir(&tmp_root, ambient_authority())
        .unwrap_or_else(|err| panic!("open temp dir: {err}"))
        .write(
            "blocker.toml",
            "mount_root = \"/data/blocker\"\nfilesystem_type = \"xfs\"\n",
        )
        .unwrap_or_else(|err| panic!("write config: {err}"));
    let config_path = tmp_root.join("blocker.toml");

    let set = [("BLOCKER_CONFIG_PATH", config_path.as_str())];
    let _guard = EnvGuard::set_vars(&set, &cleared_except(&["BLOCKER_CONFIG_PATH"])).await;

    let cfg = BlockerConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config file should load: {err}"));

    assert_eq!(cfg.mount_root, "/data/blocker");
    assert_eq!(cfg.filesystem_type, "xfs");
    assert_eq!(cfg.socket_path, DEFAULT_SOCKET_PATH);
}
