//! Lease store backed by a shared directory.
//!
//! Each lease is a JSON file named after the lock. Every read-modify-write
//! of a lease file happens while holding an exclusive `flock(2)` on a guard
//! file in the same directory, so concurrent processes observe a consistent
//! view. Lease files are written to a temporary name and renamed into place.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use nix::fcntl::{Flock, FlockArg};

use imgmount_common::error::{ImgmountError, Result};
use imgmount_common::types::LockName;

use super::{Lease, LockStore};

const GUARD_FILE: &str = ".guard";
const LEASE_EXTENSION: &str = "lease";

/// [`LockStore`] keeping leases as files under one directory.
///
/// The directory must be shared by every competing process; for a host-wide
/// pool a local directory such as `/run/lock/imgmount` suffices.
#[derive(Debug, Clone)]
pub struct DirLockStore {
    dir: PathBuf,
}

impl DirLockStore {
    /// Creates a store rooted at `dir`. The directory is created lazily.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the lease files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unavailable(&self, message: impl Into<String>) -> ImgmountError {
        ImgmountError::LockStore {
            location: self.location(),
            message: message.into(),
        }
    }

    fn lease_path(&self, name: &LockName) -> PathBuf {
        self.dir
            .join(format!("{}.{LEASE_EXTENSION}", name.file_stem()))
    }

    /// Takes the store-wide guard, creating the directory on first use.
    fn guard(&self) -> Result<Flock<File>> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| self.unavailable(format!("cannot create directory: {e}")))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(GUARD_FILE))
            .map_err(|e| self.unavailable(format!("cannot open guard file: {e}")))?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| self.unavailable(format!("cannot lock guard file: {errno}")))
    }

    /// Reads the lease stored at `path`. Unreadable contents count as no
    /// lease so a corrupted file cannot wedge a device forever.
    fn read_lease(&self, path: &Path) -> Result<Option<Lease>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(self.unavailable(format!("cannot read {}: {e}", path.display())));
            }
        };
        match serde_json::from_str(&raw) {
            Ok(lease) => Ok(Some(lease)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt lease file");
                Ok(None)
            }
        }
    }

    fn write_lease(&self, path: &Path, lease: &Lease) -> Result<()> {
        let body = serde_json::to_vec_pretty(lease)?;
        let tmp = path.with_extension(format!("{LEASE_EXTENSION}.{}.tmp", lease.token));
        std::fs::write(&tmp, body)
            .map_err(|e| self.unavailable(format!("cannot write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            self.unavailable(format!("cannot install {}: {e}", path.display()))
        })
    }
}

impl LockStore for DirLockStore {
    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    fn try_acquire(&self, name: &LockName, ttl: Duration) -> Result<Option<Lease>> {
        let _guard = self.guard()?;
        let path = self.lease_path(name);
        let now = Utc::now();

        if let Some(held) = self.read_lease(&path)? {
            if !held.is_expired_at(now) {
                return Ok(None);
            }
            tracing::warn!(
                lock = %name,
                holder_pid = held.pid,
                expired_at = %held.expires_at,
                "taking over expired lease"
            );
        }

        let lease = Lease::new(name.clone(), ttl, now);
        self.write_lease(&path, &lease)?;
        Ok(Some(lease))
    }

    fn release(&self, lease: &Lease) -> Result<bool> {
        let _guard = self.guard()?;
        let path = self.lease_path(&lease.name);
        match self.read_lease(&path)? {
            Some(held) if held.token == lease.token => {
                std::fs::remove_file(&path).map_err(|e| {
                    self.unavailable(format!("cannot remove {}: {e}", path.display()))
                })?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(&self) -> Result<Vec<Lease>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.unavailable(format!("cannot list directory: {e}"))),
        };

        let _guard = self.guard()?;
        let now = Utc::now();
        let mut live = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| self.unavailable(format!("cannot list directory: {e}")))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some(LEASE_EXTENSION) {
                continue;
            }
            if let Some(lease) = self.read_lease(&path)? {
                if !lease.is_expired_at(now) {
                    live.push(lease);
                }
            }
        }
        live.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn acquire_release_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirLockStore::new(dir.path().join("locks"));
        let name = LockName::for_device("worker-1", "/dev/nbd0");

        let lease = store.try_acquire(&name, MINUTE).unwrap().unwrap();
        assert!(dir.path().join("locks/worker-1-_dev_nbd0.lease").exists());
        assert!(store.try_acquire(&name, MINUTE).unwrap().is_none());
        assert_eq!(store.list().unwrap(), vec![lease.clone()]);

        assert!(store.release(&lease).unwrap());
        assert!(!store.release(&lease).unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn stores_sharing_a_directory_exclude_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let a = DirLockStore::new(dir.path());
        let b = DirLockStore::new(dir.path());
        let name = LockName::for_device("worker-1", "/dev/nbd5");

        assert!(a.try_acquire(&name, MINUTE).unwrap().is_some());
        assert!(b.try_acquire(&name, MINUTE).unwrap().is_none());
    }

    #[test]
    fn expired_lease_is_taken_over_and_old_token_is_powerless() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirLockStore::new(dir.path());
        let name = LockName::for_device("worker-1", "/dev/nbd2");

        let stale = store.try_acquire(&name, Duration::ZERO).unwrap().unwrap();
        let fresh = store.try_acquire(&name, MINUTE).unwrap().unwrap();
        assert!(!store.release(&stale).unwrap());
        assert!(store.release(&fresh).unwrap());
    }

    #[test]
    fn corrupt_lease_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirLockStore::new(dir.path());
        let name = LockName::for_device("worker-1", "/dev/nbd1");
        std::fs::write(dir.path().join("worker-1-_dev_nbd1.lease"), "{garbage").unwrap();

        assert!(store.try_acquire(&name, MINUTE).unwrap().is_some());
    }

    #[test]
    fn unusable_directory_reports_lock_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        let store = DirLockStore::new(&file);

        let err = store
            .try_acquire(&LockName::new("x"), MINUTE)
            .unwrap_err();
        assert!(matches!(err, ImgmountError::LockStore { .. }));
    }

    #[test]
    fn concurrent_claims_yield_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let barrier = Arc::new(Barrier::new(8));
        let name = LockName::for_device("worker-1", "/dev/nbd0");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = DirLockStore::new(path.clone());
                let barrier = Arc::clone(&barrier);
                let name = name.clone();
                std::thread::spawn(move || {
                    let _ = barrier.wait();
                    store.try_acquire(&name, MINUTE).unwrap().is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
