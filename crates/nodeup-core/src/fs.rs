//! Atomic file writes for installation state.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Permission bits for secrets (keys, auth secret).
pub const SECRET_MODE: u32 = 0o600;

/// Permission bits for rendered config and records.
pub const FILE_MODE: u32 = 0o644;

/// Permission bits for binaries and entry-point scripts.
pub const EXEC_MODE: u32 = 0o755;

/// Outcome of [`write_if_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// File was created or its bytes changed.
    Written,
    /// Existing bytes already matched.
    Unchanged,
}

/// Writes `data` to `target` via a temp file in the same directory and a
/// rename, so readers never observe a partial file.
///
/// # Errors
///
/// Returns an I/O error if the target is a directory or any step fails.
pub fn atomic_write(target: &Path, data: &[u8], mode: u32) -> Result<()> {
    if let Ok(metadata) = fs::symlink_metadata(target) {
        if metadata.is_dir() {
            return Err(Error::io(
                "refusing to overwrite directory",
                target,
                io::Error::new(io::ErrorKind::InvalidInput, "target must be a file"),
            ));
        }
    }
    let parent = target.parent().ok_or_else(|| {
        Error::io(
            "path has no parent",
            target,
            io::Error::new(io::ErrorKind::InvalidInput, "no parent directory"),
        )
    })?;
    fs::create_dir_all(parent).map_err(|e| Error::io("failed to create directory", parent, e))?;

    let temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| Error::io("failed to create temp file in", parent, e))?;
    set_mode(temp.path(), mode)?;

    let mut file = temp.as_file();
    file.write_all(data)
        .map_err(|e| Error::io("failed to write temp file for", target, e))?;
    file.sync_all()
        .map_err(|e| Error::io("failed to sync temp file for", target, e))?;

    temp.persist(target)
        .map_err(|e| Error::io("failed to rename temp file to", target, e.error))?;
    Ok(())
}

/// Writes `data` only when the current contents differ.
///
/// # Errors
///
/// Returns an I/O error if reading or writing fails.
pub fn write_if_changed(target: &Path, data: &[u8], mode: u32) -> Result<WriteOutcome> {
    match fs::read(target) {
        Ok(existing) if existing == data => return Ok(WriteOutcome::Unchanged),
        Ok(_) => {},
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => return Err(Error::io("failed to read", target, e)),
    }
    atomic_write(target, data, mode)?;
    Ok(WriteOutcome::Written)
}

/// Sets Unix permission bits. No-op elsewhere.
///
/// # Errors
///
/// Returns an I/O error if the permissions cannot be changed.
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| Error::io("failed to set permissions on", path, e))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

/// Removes a file, treating "not found" as success.
///
/// # Errors
///
/// Returns an I/O error for any other failure.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io("failed to remove", path, e)),
    }
}
