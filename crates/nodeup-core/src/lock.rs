//! Advisory lock over an installation root.
//!
//! Install and upgrade hold the lock for their whole duration. The lock is
//! released when the guard is dropped (file close releases `flock`).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};
use crate::layout::InstallationLayout;

/// Held lock on an installation root.
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Acquires the lock without blocking.
    ///
    /// Creates the installation root if missing so the lock file has a home.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockHeld`] if another invocation holds the lock.
    pub fn acquire(layout: &InstallationLayout) -> Result<Self> {
        let root = layout.root();
        std::fs::create_dir_all(root)
            .map_err(|e| Error::io("failed to create installation root", root, e))?;
        Self::acquire_at(&layout.lock_file(), root)
    }

    fn acquire_at(path: &Path, root: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io("failed to open lock file", path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "acquired installation lock");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            },
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(Error::LockHeld(root.to_path_buf()))
            },
            Err(e) => Err(Error::io("failed to lock", path, e)),
        }
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
