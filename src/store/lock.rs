//! Single-writer lock on a store directory.
//!
//! An exclusive `flock` on `.master_predictions.lock`. The kernel drops the
//! lock when the holder exits, so a file left behind by a crashed writer
//! never blocks the next one. The file itself is not removed on release.

use crate::error::PersistenceError;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LOCK_FILE: &str = ".master_predictions.lock";

/// Held for the lifetime of a store.
pub struct StoreLock {
    path: PathBuf,
    #[cfg(unix)]
    _file: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl StoreLock {
    /// Take the lock, failing with [`PersistenceError::Locked`] if another
    /// writer holds it.
    pub fn acquire(dir: &Path) -> Result<Self, PersistenceError> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| PersistenceError::io(&path, e))?;

        let file = lock_exclusive(file, &path)?;
        record_owner(&file, &path)?;

        debug!(path = %path.display(), "Store lock acquired");
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock").field("path", &self.path).finish()
    }
}

#[cfg(unix)]
fn lock_exclusive(file: File, path: &Path) -> Result<nix::fcntl::Flock<File>, PersistenceError> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(locked) => Ok(locked),
        Err((_, Errno::EAGAIN)) => Err(PersistenceError::Locked {
            path: path.to_path_buf(),
        }),
        Err((_, errno)) => Err(PersistenceError::io(path, errno.into())),
    }
}

// No advisory locking off unix.
#[cfg(not(unix))]
fn lock_exclusive(file: File, _path: &Path) -> Result<File, PersistenceError> {
    tracing::warn!("Store lock not supported on this platform, writers are not excluded");
    Ok(file)
}

/// Overwrite the file with the holder's pid, for operators.
fn record_owner(file: &File, path: &Path) -> Result<(), PersistenceError> {
    use std::io::{Seek, SeekFrom, Write};

    let write = || -> std::io::Result<()> {
        let mut handle: &File = file;
        handle.set_len(0)?;
        handle.seek(SeekFrom::Start(0))?;
        writeln!(handle, "{}", std::process::id())
    };
    write().map_err(|e| PersistenceError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_writer_is_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = StoreLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());

        let err = StoreLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, PersistenceError::Locked { .. }));

        drop(lock);
        assert!(StoreLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_stale_lock_file_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), "999999\n").unwrap();

        let lock = StoreLock::acquire(dir.path()).unwrap();
        let owner = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
    }
}
