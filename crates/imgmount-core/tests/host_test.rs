//! Tests against the real host tools.
//!
//! These need root, loop device support, and the test images under the
//! directory named by `IMGMOUNT_TEST_DATA`:
//! - `image_without_partitions.img`: a filesystem containing `testfile.txt`
//! - `image_with_partitions.img`: two ext4 partitions of at least 100 MB
//!
//! Run with `cargo test -p imgmount-core --test host_test -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;

use imgmount_common::config::ImgmountConfig;
use imgmount_common::types::DeviceState;
use imgmount_core::BlockDevice;
use imgmount_core::tools::ensure_available;

fn test_data(name: &str) -> PathBuf {
    let dir = std::env::var("IMGMOUNT_TEST_DATA").expect("IMGMOUNT_TEST_DATA must be set");
    PathBuf::from(dir).join(name)
}

fn config(mount_root: &tempfile::TempDir, lock_dir: &tempfile::TempDir) -> ImgmountConfig {
    ImgmountConfig {
        mount_root: mount_root.path().to_path_buf(),
        lock_dir: lock_dir.path().to_path_buf(),
        privilege_tool: None,
        ..ImgmountConfig::default()
    }
}

#[test]
#[ignore = "requires root and test images"]
fn host_has_required_tools() {
    ensure_available(&imgmount_core::command::Tools::system(None)).expect("tools");
}

#[test]
#[ignore = "requires root and test images"]
fn mounts_unpartitioned_image_and_reads_file() {
    let mount_root = tempfile::tempdir().unwrap();
    let lock_dir = tempfile::tempdir().unwrap();
    let mut device = BlockDevice::open(
        test_data("image_without_partitions.img"),
        config(&mount_root, &lock_dir),
    )
    .expect("open");
    assert!(device.device_node().unwrap().starts_with("/dev/loop"));
    assert!(device.partitions().is_empty());

    let mountpoints = device.mount(None).expect("mount").to_vec();
    for folder in &mountpoints {
        assert!(folder.join("testfile.txt").is_file());
    }

    device.teardown().expect("teardown");
    assert_eq!(device.state(), DeviceState::Released);
    for folder in &mountpoints {
        assert!(!folder.exists());
    }
}

#[test]
#[ignore = "requires root and test images"]
fn discovers_partitions_of_partitioned_image() {
    let mount_root = tempfile::tempdir().unwrap();
    let lock_dir = tempfile::tempdir().unwrap();
    let mut device = BlockDevice::open(
        test_data("image_with_partitions.img"),
        config(&mount_root, &lock_dir),
    )
    .expect("open");

    let node = device.device_node().unwrap().to_owned();
    assert_eq!(
        device.partitions(),
        [format!("{node}p1"), format!("{node}p2")]
    );
    assert_eq!(device.mount(None).expect("mount").len(), 2);
    device.teardown().expect("teardown");
}

#[test]
#[ignore = "requires root"]
fn missing_image_fails_setup() {
    let mount_root = tempfile::tempdir().unwrap();
    let lock_dir = tempfile::tempdir().unwrap();
    assert!(BlockDevice::open("imagedoesnotexist", config(&mount_root, &lock_dir)).is_err());
}
