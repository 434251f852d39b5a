//! Mapping image files to kernel block devices.

use imgmount_common::constants::LOOP_DEVICE_PREFIX;
use imgmount_common::error::{ImgmountError, Result};
use imgmount_common::types::BackendKind;

use crate::allocator::NbdAllocator;
use crate::command::Tools;
use crate::lock::Lease;

/// An image attached to a block device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Backend used.
    pub backend: BackendKind,
    /// Device node, e.g. `/dev/loop0` or `/dev/nbd2`.
    pub device: String,
    /// Lease held on the device (NBD only).
    pub lease: Option<Lease>,
}

/// Parses `losetup --show` output: the single allocated loop device node.
///
/// # Errors
///
/// Returns [`ImgmountError::Parse`] for anything but one `/dev/loopN` line.
pub fn parse_losetup_device(output: &str) -> Result<String> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    match (lines.next(), lines.next()) {
        (Some(device), None) if is_loop_device(device) => Ok(device.to_owned()),
        _ => Err(ImgmountError::Parse {
            tool: "losetup",
            message: format!("expected a single loop device node, got {:?}", output.trim()),
        }),
    }
}

fn is_loop_device(node: &str) -> bool {
    node.strip_prefix(LOOP_DEVICE_PREFIX)
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Attaches `image` to the first free loop device with partition scanning.
///
/// # Errors
///
/// Returns an error carrying `losetup`'s stderr if no device could be set
/// up, or a parse error if its output is not a device node.
pub fn attach_loop(tools: &Tools, image: &str) -> Result<Attachment> {
    let args = ["--find", "--partscan", "--show", image].map(str::to_owned);
    let stdout = tools.run("losetup", &args, Some(image))?;
    let device = parse_losetup_device(&stdout)?;
    tracing::info!(image, device = %device, "attached loop device");
    Ok(Attachment {
        backend: BackendKind::Loop,
        device,
        lease: None,
    })
}

/// Claims an NBD device and exports `image` on it read-only.
///
/// If the export fails, the claim is released before the error is
/// returned.
///
/// # Errors
///
/// Returns [`ImgmountError::NoFreeDevice`] if the pool is exhausted, a lock
/// store error if it is unreachable, or `qemu-nbd`'s stderr on export
/// failure.
pub fn attach_nbd(tools: &Tools, allocator: &NbdAllocator, image: &str) -> Result<Attachment> {
    let claim = allocator.claim()?;
    let args = ["--read-only", "--connect", claim.device.as_str(), image].map(str::to_owned);

    if let Err(e) = tools.run("qemu-nbd", &args, Some(image)) {
        tracing::error!(image, device = %claim.device, error = %e, "qemu-nbd export failed");
        if let Err(release_err) = allocator.release(&claim.lease) {
            tracing::error!(lock = %claim.lease.name, error = %release_err, "failed to release NBD lease after export failure");
        }
        return Err(e);
    }

    tracing::info!(image, device = %claim.device, "attached NBD device");
    Ok(Attachment {
        backend: BackendKind::Nbd,
        device: claim.device,
        lease: Some(claim.lease),
    })
}

/// Detaches `device` from its backing image.
///
/// # Errors
///
/// Returns the detach tool's stderr on failure.
pub fn detach(tools: &Tools, backend: BackendKind, device: &str) -> Result<()> {
    match backend {
        BackendKind::Loop => {
            let args = ["--detach", device].map(str::to_owned);
            let _ = tools.run("losetup", &args, Some(device))?;
        }
        BackendKind::Nbd => {
            let args = ["--disconnect", device].map(str::to_owned);
            let _ = tools.run("qemu-nbd", &args, Some(device))?;
        }
    }
    tracing::info!(device, backend = %backend, "detached block device");
    Ok(())
}
