//! Named, time-bounded exclusive claims shared between processes.
//!
//! A [`Lease`] is held by exactly one owner until it is released or its
//! expiry passes. Expired leases may be taken over by anyone, which bounds
//! how long a crashed holder can keep a resource.

pub mod dir;
pub mod memory;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use imgmount_common::error::Result;
use imgmount_common::types::LockName;

pub use dir::DirLockStore;
pub use memory::MemoryLockStore;

/// A held claim on one lock name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// The claimed name.
    pub name: LockName,
    /// Random owner token; only its holder may release the lease.
    pub token: String,
    /// PID of the acquiring process, for diagnostics.
    pub pid: u32,
    /// When the lease was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lease stops being exclusive.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Creates a fresh lease on `name` valid for `ttl` from `now`.
    #[must_use]
    pub fn new(name: LockName, ttl: Duration, now: DateTime<Utc>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            name,
            token: uuid::Uuid::new_v4().simple().to_string(),
            pid: std::process::id(),
            acquired_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Returns whether the lease is no longer exclusive at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Shared store of leases.
///
/// Every process competing for the same resources must point at the same
/// store.
pub trait LockStore: Send + Sync {
    /// Human-readable location of the store, used in errors and logs.
    fn location(&self) -> String;

    /// Claims `name` for `ttl` if nobody holds a live lease on it.
    ///
    /// Returns `Ok(None)` without waiting when the name is taken.
    ///
    /// # Errors
    ///
    /// Returns [`ImgmountError::LockStore`](imgmount_common::error::ImgmountError::LockStore)
    /// if the store cannot be reached.
    fn try_acquire(&self, name: &LockName, ttl: Duration) -> Result<Option<Lease>>;

    /// Releases `lease`. Returns `false` if the store no longer holds it,
    /// because it expired and was taken over or was already released.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn release(&self, lease: &Lease) -> Result<bool>;

    /// Lists every live lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn list(&self) -> Result<Vec<Lease>>;
}
