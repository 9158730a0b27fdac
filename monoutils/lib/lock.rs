//! Advisory file locks shared between cooperating processes.
//!
//! Locks are taken with `flock(2)` on a dedicated lock file. Holding a lock blocks other
//! processes indefinitely; there is no acquisition timeout.

use std::{
    fmt,
    fs::{DirBuilder, File, OpenOptions},
    os::unix::fs::{DirBuilderExt, OpenOptionsExt},
    path::{Path, PathBuf},
};

use nix::fcntl::{Flock, FlockArg};

use crate::{MonoutilsError, MonoutilsResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Permissions applied to the directory holding a lock file when it has to be created.
pub const LOCK_DIR_MODE: u32 = 0o750;

/// Permissions applied to a lock file when it has to be created.
pub const LOCK_FILE_MODE: u32 = 0o640;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How a lock file should be held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers may hold the lock together.
    Shared,

    /// A single writer holds the lock.
    Exclusive,
}

/// A held advisory lock.
///
/// The lock is released and the file closed when the guard is dropped, so every exit path of the
/// holder, including early returns through `?`, gives the lock back.
pub struct FileLock {
    path: PathBuf,
    mode: LockMode,
    _file: Flock<File>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FileLock {
    /// Acquires a lock on `path`, creating the file and its parent directory if needed.
    ///
    /// This call blocks until the lock can be granted.
    ///
    /// ## Errors
    ///
    /// Returns an error if the parent directory or the lock file cannot be created, or if the
    /// kernel refuses the `flock` call.
    pub fn acquire(path: impl AsRef<Path>, mode: LockMode) -> MonoutilsResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(LOCK_DIR_MODE)
                .create(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .mode(LOCK_FILE_MODE)
            .open(path)?;

        let arg = match mode {
            LockMode::Shared => FlockArg::LockShared,
            LockMode::Exclusive => FlockArg::LockExclusive,
        };

        let file = Flock::lock(file, arg).map_err(|(_, errno)| MonoutilsError::Lock {
            path: path.to_path_buf(),
            source: errno,
        })?;

        tracing::trace!(path = %path.display(), ?mode, "acquired file lock");

        Ok(Self {
            path: path.to_path_buf(),
            mode,
            _file: file,
        })
    }

    /// Returns the path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the mode the lock is held in.
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Debug for FileLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLock")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        tracing::trace!(path = %self.path.display(), mode = ?self.mode, "releasing file lock");
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
