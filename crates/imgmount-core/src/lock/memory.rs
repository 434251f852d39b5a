//! In-process lease store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;

use imgmount_common::error::{ImgmountError, Result};
use imgmount_common::types::LockName;

use super::{Lease, LockStore};

/// [`LockStore`] living in the memory of one process.
///
/// Only coordinates handles inside a single process. Useful for tests and
/// for embedding where every worker shares one address space.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    leases: Mutex<HashMap<LockName, Lease>>,
}

impl MemoryLockStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn leases(&self) -> Result<MutexGuard<'_, HashMap<LockName, Lease>>> {
        self.leases.lock().map_err(|_| ImgmountError::LockStore {
            location: self.location(),
            message: "lease table lock poisoned".into(),
        })
    }
}

impl LockStore for MemoryLockStore {
    fn location(&self) -> String {
        "memory".into()
    }

    fn try_acquire(&self, name: &LockName, ttl: Duration) -> Result<Option<Lease>> {
        let now = Utc::now();
        let mut leases = self.leases()?;
        if leases.get(name).is_some_and(|held| !held.is_expired_at(now)) {
            return Ok(None);
        }
        let lease = Lease::new(name.clone(), ttl, now);
        let _ = leases.insert(name.clone(), lease.clone());
        Ok(Some(lease))
    }

    fn release(&self, lease: &Lease) -> Result<bool> {
        let mut leases = self.leases()?;
        match leases.get(&lease.name) {
            Some(held) if held.token == lease.token => {
                let _ = leases.remove(&lease.name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(&self) -> Result<Vec<Lease>> {
        let now = Utc::now();
        let mut live: Vec<Lease> = self
            .leases()?
            .values()
            .filter(|lease| !lease.is_expired_at(now))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn second_acquire_is_refused_until_release() {
        let store = MemoryLockStore::new();
        let name = LockName::new("host-/dev/nbd0");

        let lease = store.try_acquire(&name, MINUTE).unwrap().unwrap();
        assert!(store.try_acquire(&name, MINUTE).unwrap().is_none());

        assert!(store.release(&lease).unwrap());
        assert!(store.try_acquire(&name, MINUTE).unwrap().is_some());
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let store = MemoryLockStore::new();
        let name = LockName::new("host-/dev/nbd1");

        let stale = store.try_acquire(&name, Duration::ZERO).unwrap().unwrap();
        let fresh = store.try_acquire(&name, MINUTE).unwrap().unwrap();
        assert_ne!(stale.token, fresh.token);

        // The stale holder can no longer release the new owner's claim.
        assert!(!store.release(&stale).unwrap());
        assert_eq!(store.list().unwrap(), vec![fresh]);
    }

    #[test]
    fn list_skips_expired() {
        let store = MemoryLockStore::new();
        let _ = store
            .try_acquire(&LockName::new("b"), MINUTE)
            .unwrap()
            .unwrap();
        let _ = store
            .try_acquire(&LockName::new("a"), Duration::ZERO)
            .unwrap()
            .unwrap();
        let names: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|l| l.name.to_string())
            .collect();
        assert_eq!(names, vec!["b"]);
    }
}
