//! Domain primitive types used across the imgmount workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kernel mechanism used to expose an image as a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Loopback device (`losetup`), for raw images.
    Loop,
    /// Network block device (`qemu-nbd`), for copy-on-write virtual disks.
    Nbd,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loop => write!(f, "loop"),
            Self::Nbd => write!(f, "nbd"),
        }
    }
}

/// Lifecycle state of a block device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    /// Handle exists but no kernel device is attached yet.
    Unattached,
    /// Image is attached and partitions have been inspected.
    Attached,
    /// At least one mountpoint is active.
    Mounted,
    /// Every resource has been released.
    Released,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unattached => write!(f, "unattached"),
            Self::Attached => write!(f, "attached"),
            Self::Mounted => write!(f, "mounted"),
            Self::Released => write!(f, "released"),
        }
    }
}

/// Name of a distributed lock: `<host>-<device node>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockName(String);

impl LockName {
    /// Creates a lock name from a raw string.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Lock name claiming `device` on `host`.
    #[must_use]
    pub fn for_device(host: &str, device: &str) -> Self {
        Self(format!("{host}-{device}"))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form of the name, usable as a file stem.
    #[must_use]
    pub fn file_stem(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_name_joins_host_and_device() {
        let name = LockName::for_device("worker-1", "/dev/nbd3");
        assert_eq!(name.as_str(), "worker-1-/dev/nbd3");
        assert_eq!(name.file_stem(), "worker-1-_dev_nbd3");
    }

    #[test]
    fn backend_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&BackendKind::Nbd).unwrap(), "\"nbd\"");
        assert_eq!(BackendKind::Loop.to_string(), "loop");
    }
}
