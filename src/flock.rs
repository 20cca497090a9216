//! Advisory process mutexes backed by OS file locks.
//!
//! Serializes critical sections across independent processes on one host.
//! The lock releases on drop, and the OS releases it if the holder dies.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

pub struct ProcessLock {
    file: File,
}

impl ProcessLock {
    fn open(path: &Path) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening lock file {}", path.display()))
    }

    /// Block until the lock at `path` is held.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_exclusive()
            .with_context(|| format!("locking {}", path.display()))?;
        Ok(Self { file })
    }

    /// Take the lock only if it is free; `None` means another process holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = Self::open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(e).with_context(|| format!("locking {}", path.display())),
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_try_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lock");
        let held = ProcessLock::try_acquire(&path).unwrap();
        assert!(held.is_some());
        // Same process, separate descriptor: contended.
        assert!(ProcessLock::try_acquire(&path).unwrap().is_none());
        drop(held);
        assert!(ProcessLock::try_acquire(&path).unwrap().is_some());
    }
}
