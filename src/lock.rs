//! Per-package lock file guarding installs and uninstalls.
//!
//! Two morlock processes touching the same install folder would otherwise
//! both see "not installed" and race through download and unpack. The lock is
//! an OS file lock on `.morlock.lock`, which also records the holder's pid.
//! The OS drops the lock when its process exits, so a crashed install never
//! leaves the package locked. The file itself is removed on release.

use crate::error::{MorlockError, Result};
use fslock::LockFile;
use std::fs;
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = ".morlock.lock";

pub struct PackageLock {
    lock: LockFile,
    path: PathBuf,
}

impl std::fmt::Debug for PackageLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageLock").field("path", &self.path).finish()
    }
}

impl PackageLock {
    /// Take the lock on `install_folder` without waiting. `package` names it
    /// in errors.
    pub fn acquire(install_folder: &Path, package: &str) -> Result<Self> {
        fs::create_dir_all(install_folder)?;
        let path = install_folder.join(LOCK_FILE);

        let mut lock = LockFile::open(&path)?;
        if !lock.try_lock_with_pid()? {
            return Err(MorlockError::PackageLocked {
                package: package.to_string(),
                path,
            });
        }
        tracing::debug!("Locked {}", path.display());
        Ok(Self { lock, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        // Removed while still held so a newcomer creates a fresh file
        let _ = fs::remove_file(&self.path);
        let _ = self.lock.unlock();
    }
}
