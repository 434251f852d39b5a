//! Configuration model for the block-device manager.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! `IMGMOUNT_*` environment variables. The CLI applies its flags last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{ImgmountError, Result};

/// Root configuration for imgmount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImgmountConfig {
    /// Directory under which fresh mountpoints are created.
    pub mount_root: PathBuf,
    /// Host identity used to scope NBD lock names. `None` uses the hostname.
    pub host_override: Option<String>,
    /// Shared directory holding NBD lease files.
    pub lock_dir: PathBuf,
    /// Number of NBD devices in the pool (`/dev/nbd0` onwards).
    pub max_nbd_devices: u32,
    /// Lifetime of an NBD lease, in seconds.
    pub lock_timeout_secs: u64,
    /// Tool prefixed to privileged commands, e.g. `sudo`.
    pub privilege_tool: Option<String>,
    /// Partitions below this size in bytes are ignored.
    pub min_partition_size: u64,
}

impl Default for ImgmountConfig {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from(constants::DEFAULT_MOUNT_ROOT),
            host_override: None,
            lock_dir: PathBuf::from(constants::DEFAULT_LOCK_DIR),
            max_nbd_devices: constants::DEFAULT_MAX_NBD_DEVICES,
            lock_timeout_secs: constants::DEFAULT_LOCK_TIMEOUT_SECS,
            privilege_tool: Some(constants::DEFAULT_PRIVILEGE_TOOL.to_owned()),
            min_partition_size: constants::MIN_PARTITION_SIZE,
        }
    }
}

impl ImgmountConfig {
    /// Loads a JSON configuration file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ImgmountError::io(path, e))?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Builds a configuration from defaults overlaid with the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlays `IMGMOUNT_*` variables resolved through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(constants::ENV_MOUNT_ROOT) {
            self.mount_root = PathBuf::from(root);
        }
        if let Some(host) = lookup(constants::ENV_HOSTNAME).filter(|h| !h.trim().is_empty()) {
            self.host_override = Some(host.trim().to_owned());
        }
        if let Some(dir) = lookup(constants::ENV_LOCK_DIR) {
            self.lock_dir = PathBuf::from(dir);
        }
        if let Some(count) = lookup(constants::ENV_NBD_DEVICES) {
            self.max_nbd_devices = parse_number(constants::ENV_NBD_DEVICES, &count)?;
        }
        if let Some(secs) = lookup(constants::ENV_LOCK_TIMEOUT) {
            self.lock_timeout_secs = parse_number(constants::ENV_LOCK_TIMEOUT, &secs)?;
        }
        if let Some(tool) = lookup(constants::ENV_PRIVILEGE_TOOL) {
            let tool = tool.trim();
            self.privilege_tool = (!tool.is_empty()).then(|| tool.to_owned());
        }
        Ok(())
    }

    /// Checks the configuration for values the manager cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ImgmountError::Config`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.max_nbd_devices == 0 {
            return Err(ImgmountError::Config {
                message: "max_nbd_devices must be at least 1".into(),
            });
        }
        if self.lock_timeout_secs == 0 {
            return Err(ImgmountError::Config {
                message: "lock_timeout_secs must be at least 1".into(),
            });
        }
        if !self.mount_root.is_absolute() {
            return Err(ImgmountError::Config {
                message: format!(
                    "mount_root must be an absolute path, got {}",
                    self.mount_root.display()
                ),
            });
        }
        Ok(())
    }

    /// Lease lifetime as a [`Duration`].
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ImgmountError::Config {
        message: format!("{key} must be a non-negative integer, got {value:?}"),
    })
}
