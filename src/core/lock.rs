//! core::lock
//!
//! Exclusive per-principal run lock.
//!
//! # Architecture
//!
//! Two reconciliations of the same principal must not overlap: they would
//! race on the access key quota and on secret overwrite order, and the
//! published pair could end up differing from the newest minted one. The
//! deployment is expected to serialize runs (one CI concurrency slot per
//! principal). This lock additionally rejects a second run on the same
//! host while the first holds it.
//!
//! # Storage
//!
//! - `<state dir>/locks/<principal>.lock` - OS-level exclusive lock
//!
//! # Invariants
//!
//! - Held for the whole reconciliation
//! - Released on drop
//! - Acquisition is non-blocking (fails fast if locked)

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

use super::types::PrincipalName;

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process already holds the lock.
    #[error("another reconciliation of '{0}' is in progress")]
    AlreadyLocked(String),

    /// Failed to create lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),
}

/// An exclusive lock on one principal's reconciliation.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: Option<File>,
}

impl RunLock {
    /// Attempt to acquire the lock for `principal` under `state_dir`.
    ///
    /// # Errors
    ///
    /// - [`LockError::AlreadyLocked`] if another process holds the lock
    /// - [`LockError::CreateFailed`] if the lock file cannot be created
    /// - [`LockError::AcquireFailed`] if the OS lock cannot be acquired
    pub fn acquire(state_dir: &Path, principal: &PrincipalName) -> Result<Self, LockError> {
        let lock_dir = state_dir.join("locks");
        fs::create_dir_all(&lock_dir).map_err(|e| {
            LockError::CreateFailed(format!("cannot create {}: {}", lock_dir.display(), e))
        })?;

        let path = lock_dir.join(format!("{}.lock", principal));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                file: Some(file),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(LockError::AlreadyLocked(principal.to_string()))
            }
            Err(e) => Err(LockError::AcquireFailed(e.to_string())),
        }
    }

    /// Whether this guard still holds the lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user(name: &str) -> PrincipalName {
        PrincipalName::new(name).unwrap()
    }

    #[test]
    fn acquire_creates_lock_file() {
        let temp = TempDir::new().expect("create temp dir");

        let lock = RunLock::acquire(temp.path(), &user("svc-user")).expect("acquire lock");
        assert!(lock.is_held());
        assert!(lock.path().ends_with("locks/svc-user.lock"));
        assert!(lock.path().exists());
    }

    #[test]
    fn second_acquire_for_same_principal_fails() {
        let temp = TempDir::new().expect("create temp dir");

        let _first = RunLock::acquire(temp.path(), &user("svc-user")).expect("first acquire");
        let second = RunLock::acquire(temp.path(), &user("svc-user"));
        assert!(matches!(second, Err(LockError::AlreadyLocked(name)) if name == "svc-user"));
    }

    #[test]
    fn different_principals_do_not_contend() {
        let temp = TempDir::new().expect("create temp dir");

        let _a = RunLock::acquire(temp.path(), &user("svc-a")).expect("lock a");
        let b = RunLock::acquire(temp.path(), &user("svc-b")).expect("lock b");
        assert!(b.is_held());
    }

    #[test]
    fn released_on_drop() {
        let temp = TempDir::new().expect("create temp dir");

        {
            let lock = RunLock::acquire(temp.path(), &user("svc-user")).expect("first acquire");
            assert!(lock.is_held());
        }

        let again = RunLock::acquire(temp.path(), &user("svc-user")).expect("reacquire");
        assert!(again.is_held());
    }
}
