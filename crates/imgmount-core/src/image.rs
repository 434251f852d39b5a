//! Disk image classification.
//!
//! Copy-on-write virtual disk formats cannot be attached to a loop device
//! and are exported through `qemu-nbd` instead.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use imgmount_common::constants::{NBD_IMAGE_EXTENSIONS, QCOW_MAGIC};
use imgmount_common::error::{ImgmountError, Result};
use imgmount_common::types::BackendKind;

/// Picks the backend for an image from its (display) name alone.
#[must_use]
pub fn backend_for_name(name: &str) -> BackendKind {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension {
        Some(ext) if NBD_IMAGE_EXTENSIONS.contains(&ext.as_str()) => BackendKind::Nbd,
        _ => BackendKind::Loop,
    }
}

/// Returns whether `header` starts with the qcow magic.
#[must_use]
pub fn has_qcow_magic(header: &[u8]) -> bool {
    header.starts_with(&QCOW_MAGIC)
}

/// Validates that `path` is a readable regular file and picks its backend.
///
/// The extension of `display_name` (or of `path` when absent) decides
/// first. A qcow header routes to NBD regardless of the name.
///
/// # Errors
///
/// Returns [`ImgmountError::InvalidImage`] if the path does not exist, is
/// not a regular file, or cannot be read.
pub fn classify_image(path: &Path, display_name: Option<&str>) -> Result<BackendKind> {
    let invalid = |message: String| ImgmountError::InvalidImage {
        path: path.to_path_buf(),
        message,
    };

    let metadata = std::fs::metadata(path).map_err(|e| invalid(e.to_string()))?;
    if !metadata.is_file() {
        return Err(invalid("not a regular file".into()));
    }

    let mut header = [0u8; QCOW_MAGIC.len()];
    let mut file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    let read = file.read(&mut header).map_err(|e| invalid(e.to_string()))?;

    let name = display_name
        .map(str::to_owned)
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    let backend = if has_qcow_magic(&header[..read]) {
        BackendKind::Nbd
    } else {
        backend_for_name(&name)
    };
    tracing::debug!(image = %path.display(), name = %name, backend = %backend, "classified image");
    Ok(backend)
}
