//! Host-wide allocation of NBD devices.
//!
//! NBD devices are a small fixed pool (`/dev/nbd0` .. `/dev/nbdN-1`) shared
//! by every worker process on a host. A device is claimed by taking a lease
//! named `<host>-/dev/nbd<index>` in the shared [`LockStore`]. The first free
//! index wins; there is no fairness between concurrent claimants.

use std::sync::Arc;
use std::time::Duration;

use imgmount_common::config::ImgmountConfig;
use imgmount_common::constants::NBD_DEVICE_PREFIX;
use imgmount_common::error::{ImgmountError, Result};
use imgmount_common::types::LockName;

use crate::lock::{Lease, LockStore};

/// An exclusively claimed NBD device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NbdClaim {
    /// Pool index of the device.
    pub index: u32,
    /// Device node, e.g. `/dev/nbd3`.
    pub device: String,
    /// Lease proving the claim.
    pub lease: Lease,
}

/// Device node of NBD pool index `index`.
#[must_use]
pub fn nbd_device(index: u32) -> String {
    format!("{NBD_DEVICE_PREFIX}{index}")
}

/// Resolves the host identity scoping lock names: the override when set,
/// the machine hostname otherwise.
///
/// # Errors
///
/// Returns [`ImgmountError::Config`] if the hostname cannot be determined.
pub fn resolve_host(host_override: Option<&str>) -> Result<String> {
    if let Some(host) = host_override.map(str::trim).filter(|h| !h.is_empty()) {
        return Ok(host.to_owned());
    }
    let hostname = nix::unistd::gethostname().map_err(|e| ImgmountError::Config {
        message: format!("cannot determine hostname: {e}"),
    })?;
    hostname.into_string().map_err(|raw| ImgmountError::Config {
        message: format!("hostname {raw:?} is not valid UTF-8"),
    })
}

/// Hands out NBD devices from a bounded pool.
#[derive(Clone)]
pub struct NbdAllocator {
    store: Arc<dyn LockStore>,
    host: String,
    pool_size: u32,
    ttl: Duration,
}

impl std::fmt::Debug for NbdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NbdAllocator")
            .field("store", &self.store.location())
            .field("host", &self.host)
            .field("pool_size", &self.pool_size)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl NbdAllocator {
    /// Creates an allocator over `pool_size` devices on `host`.
    #[must_use]
    pub fn new(
        store: Arc<dyn LockStore>,
        host: impl Into<String>,
        pool_size: u32,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            host: host.into(),
            pool_size,
            ttl,
        }
    }

    /// Creates an allocator from configuration, resolving the host identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the hostname cannot be determined.
    pub fn from_config(store: Arc<dyn LockStore>, config: &ImgmountConfig) -> Result<Self> {
        let host = resolve_host(config.host_override.as_deref())?;
        Ok(Self::new(
            store,
            host,
            config.max_nbd_devices,
            config.lock_timeout(),
        ))
    }

    /// Host identity scoping the lock names.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Lock name guarding pool index `index`.
    #[must_use]
    pub fn lock_name(&self, index: u32) -> LockName {
        LockName::for_device(&self.host, &nbd_device(index))
    }

    /// Claims the lowest free device index.
    ///
    /// # Errors
    ///
    /// Returns [`ImgmountError::NoFreeDevice`] if every index is held, or a
    /// lock store error if the store cannot be reached.
    pub fn claim(&self) -> Result<NbdClaim> {
        for index in 0..self.pool_size {
            let name = self.lock_name(index);
            if let Some(lease) = self.store.try_acquire(&name, self.ttl)? {
                let device = nbd_device(index);
                tracing::info!(device = %device, lock = %name, "claimed NBD device");
                return Ok(NbdClaim {
                    index,
                    device,
                    lease,
                });
            }
            tracing::debug!(lock = %name, "NBD device already claimed");
        }

        tracing::warn!(pool_size = self.pool_size, host = %self.host, "no free NBD device");
        Err(ImgmountError::NoFreeDevice {
            pool_size: self.pool_size,
            host: self.host.clone(),
        })
    }

    /// Releases a claim's lease.
    ///
    /// A lease that already expired and was taken over is logged, not
    /// treated as an error: the device is no longer ours either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock store cannot be reached.
    pub fn release(&self, lease: &Lease) -> Result<()> {
        if self.store.release(lease)? {
            tracing::info!(lock = %lease.name, "released NBD lease");
        } else {
            tracing::warn!(lock = %lease.name, "NBD lease was no longer held at release");
        }
        Ok(())
    }
}
