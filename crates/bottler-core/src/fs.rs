//! Filesystem helpers.

use crate::error::{Error, Result};
use fs4::fs_std::FileExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Writes `contents` to `path` through a locked temporary sibling and a rename,
/// so readers never observe a half-written file.
///
/// # Errors
///
/// Returns an error if the temporary file cannot be written or renamed.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::usage(format!("Not a file path: {}", path.display())))?;
    let mut temp_name = file_name.to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| Error::io_at(&temp_path, e))?;

    FileExt::lock_exclusive(&file).map_err(|e| Error::io_at(&temp_path, e))?;
    file.write_all(contents)
        .map_err(|e| Error::io_at(&temp_path, e))?;
    file.sync_all().map_err(|e| Error::io_at(&temp_path, e))?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::io_at(path, e));
    }

    debug!(path = %path.display(), bytes = contents.len(), "Wrote file atomically");
    Ok(())
}

/// Removes a file, treating "already gone" as success.
///
/// # Errors
///
/// Returns an error for any failure other than the file not existing.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io_at(path, e)),
    }
}
