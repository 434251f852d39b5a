//! Read-only mounting of device nodes.
//!
//! Forensic sources must never be written to. Journaled filesystems would
//! replay their journal or log on mount even with `ro`, so recovery is
//! disabled explicitly for them.

use std::path::{Path, PathBuf};

use imgmount_common::error::{ImgmountError, Result};

use crate::command::{Tools, path_arg};
use crate::probe;

/// Mount options for a filesystem type.
#[must_use]
pub fn mount_options(fs_type: &str) -> &'static str {
    match fs_type {
        "ext2" | "ext3" | "ext4" => "ro,noload",
        "xfs" => "ro,norecovery",
        _ => "ro",
    }
}

/// Picks the device nodes to mount.
///
/// A requested partition must be one of `partitions`. Without a request,
/// every partition is mounted, or the whole device if there are none.
///
/// # Errors
///
/// Returns [`ImgmountError::PartitionNotFound`] for an unknown request.
pub fn select_targets(
    device: &str,
    partitions: &[String],
    requested: Option<&str>,
) -> Result<Vec<String>> {
    match requested.filter(|r| !r.is_empty()) {
        Some(name) if partitions.iter().any(|p| p == name) => Ok(vec![name.to_owned()]),
        Some(name) => Err(ImgmountError::PartitionNotFound {
            name: name.to_owned(),
        }),
        None if partitions.is_empty() => Ok(vec![device.to_owned()]),
        None => Ok(partitions.to_vec()),
    }
}

/// Generates a fresh mountpoint path under `mount_root`.
#[must_use]
pub fn fresh_mountpoint(mount_root: &Path) -> PathBuf {
    mount_root.join(uuid::Uuid::new_v4().simple().to_string())
}

/// Mounts `target` read-only on a new directory under `mount_root` and
/// returns that directory.
///
/// On failure nothing is recorded and the empty directory is removed.
///
/// # Errors
///
/// Returns an error if probing, directory creation, or `mount` fails.
pub fn mount_target(tools: &Tools, target: &str, mount_root: &Path) -> Result<PathBuf> {
    tracing::info!(device = target, "trying to mount");
    let fs_type = probe::probe_fs_type(tools, target)?;
    let options = mount_options(&fs_type);

    let mountpoint = fresh_mountpoint(mount_root);
    std::fs::create_dir_all(&mountpoint).map_err(|e| ImgmountError::io(&mountpoint, e))?;
    let dir = path_arg(&mountpoint)?;

    let args = ["-o", options, target, dir.as_str()].map(str::to_owned);
    if let Err(e) = tools.run("mount", &args, Some(target)) {
        let _ = std::fs::remove_dir(&mountpoint);
        return Err(e);
    }

    tracing::info!(device = target, mountpoint = %mountpoint.display(), fs_type = %fs_type, options, "mounted");
    Ok(mountpoint)
}

/// Unmounts `mountpoint` and removes its directory.
///
/// # Errors
///
/// Returns `umount`'s stderr on failure. A directory that cannot be removed
/// after a successful unmount is only logged.
pub fn unmount(tools: &Tools, mountpoint: &Path) -> Result<()> {
    let dir = path_arg(mountpoint)?;
    let _ = tools.run("umount", std::slice::from_ref(&dir), Some(dir.as_str()))?;
    if let Err(e) = std::fs::remove_dir(mountpoint) {
        tracing::warn!(mountpoint = %mountpoint.display(), error = %e, "could not remove mountpoint directory");
    }
    tracing::info!(mountpoint = %mountpoint.display(), "unmounted");
    Ok(())
}
