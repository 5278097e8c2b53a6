use std::{
    fs::{self, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::error::MultirunError;

// ============================================ PUBLIC =============================================

/// `target` with its final extension replaced by `lock_extension`.
pub fn lock_path(target: &Path, lock_extension: &str) -> PathBuf {
    target.with_extension(lock_extension)
}

/// Zero byte marker telling downstream consumers the target is still being written.
///
/// Created with an exclusive create, so an existing marker means a conflicting
/// writer. Exclusive create is not atomic on every network filesystem. The
/// marker is removed on [`FileLock::release`] or, failing that, on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    held: bool,
}

impl FileLock {
    pub fn acquire(target: &Path, lock_extension: &str) -> Result<Self, MultirunError> {
        let path = lock_path(target, lock_extension);

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|err| MultirunError::Lock {
                path: path.clone(),
                detail: match err.kind() {
                    ErrorKind::AlreadyExists => String::from("lock already held by another writer"),
                    _ => err.to_string(),
                },
            })?;

        debug!("Locked {}", path.display());
        Ok(Self { path, held: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<(), MultirunError> {
        self.held = false;
        remove_lock_file(&self.path).map_err(|err| MultirunError::Lock {
            path: self.path.clone(),
            detail: format!("could not remove: {}", err),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.held {
            if let Err(err) = remove_lock_file(&self.path) {
                warn!("Could not remove lock {}: {}", self.path.display(), err);
            }
        }
    }
}

/// Remove the lock of `target`; a missing lock is already the wanted state.
pub fn unlock(target: &Path, lock_extension: &str) -> std::io::Result<()> {
    remove_lock_file(&lock_path(target, lock_extension))
}

// =========================================== PRIVATE =============================================

fn remove_lock_file(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Unlocked {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

// ============================================= TESTS =============================================
