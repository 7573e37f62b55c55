//! Per-library scan lock.
//!
//! Only one scan/embedding task may mutate a library at a time. The lock is
//! an exclusive advisory lock on a file in the library data folder, held
//! until the guard is dropped.

use crate::config::get_lock_path;
use fs2::FileExt;
use mnemo_core::{AppError, AppResult};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ScanLock {
    file: File,
    path: PathBuf,
}

impl ScanLock {
    /// Take the lock for `data_folder` without waiting.
    pub fn acquire(data_folder: &Path) -> AppResult<Self> {
        std::fs::create_dir_all(data_folder)?;
        let path = get_lock_path(data_folder);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| AppError::LockUnavailable(format!("Failed to open lock file {:?}: {}", path, e)))?;

        file.try_lock_exclusive().map_err(|_| {
            AppError::LockUnavailable(format!(
                "Library at {:?} is already being scanned",
                data_folder
            ))
        })?;

        tracing::debug!("Acquired scan lock {:?}", path);
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScanLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release scan lock {:?}: {}", self.path, e);
        } else {
            tracing::debug!("Released scan lock {:?}", self.path);
        }
    }
}
