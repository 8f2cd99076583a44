//! Installation trees ("kegs").
//!
//! A keg is `<cellar>/<name>/<version>`. Bottling holds an exclusive advisory
//! lock on it so no other process sees the tree while it is relocated.

use crate::error::{Error, Result};
use filetime::FileTime;
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

const PYC_EXTENSIONS: [&str; 2] = ["pyc", "pyo"];

/// One installed package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keg {
    path: PathBuf,
    name: String,
    version: String,
}

impl Keg {
    /// The keg for `name` at `version` inside `cellar`.
    #[must_use]
    pub fn new(cellar: &Path, name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        Self {
            path: cellar.join(&name).join(&version),
            name,
            version,
        }
    }

    /// Keg root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Package name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Installed version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Path of the keg inside the cellar (`<name>/<version>`).
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.name).join(&self.version)
    }

    /// Whether the keg directory exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Takes the exclusive lock for this package in `locks_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Locked`] if another process holds it.
    pub fn lock(&self, locks_dir: &Path) -> Result<KegLock> {
        fs::create_dir_all(locks_dir).map_err(|e| Error::io_at(locks_dir, e))?;
        let path = locks_dir.join(format!("{}.formula.lock", self.name));
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::io_at(&path, e))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(true) => {
                debug!(keg = %self.path.display(), lock = %path.display(), "Locked keg");
                Ok(KegLock { file, path })
            }
            Ok(false) => Err(Error::Locked {
                name: self.name.clone(),
                path,
            }),
            Err(e) => Err(Error::io_at(&path, e)),
        }
    }

    /// Every path in the keg, root included, sorted by name. Symlinks are not followed.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be walked.
    pub fn find(&self) -> Result<Vec<PathBuf>> {
        WalkDir::new(&self.path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .map(|entry| {
                entry
                    .map(walkdir::DirEntry::into_path)
                    .map_err(|e| Error::relocation(&self.path, e.to_string()))
            })
            .collect()
    }

    /// Deletes compiled Python files and `__pycache__` directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed.
    pub fn delete_pyc_files(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.find()? {
            let Ok(metadata) = fs::symlink_metadata(&path) else {
                continue;
            };
            if metadata.is_dir() && path.file_name().is_some_and(|n| n == "__pycache__") {
                fs::remove_dir_all(&path).map_err(|e| Error::io_at(&path, e))?;
                removed += 1;
            } else if metadata.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| PYC_EXTENSIONS.contains(&e))
            {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    // Already gone with its __pycache__ directory.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::io_at(&path, e)),
                }
            }
        }
        if removed > 0 {
            debug!(keg = %self.path.display(), removed, "Deleted Python bytecode");
        }
        Ok(removed)
    }

    /// Sets the access and modification time of every path to `seconds`,
    /// symlinks included.
    ///
    /// # Errors
    ///
    /// Returns an error if a timestamp cannot be set.
    pub fn normalize_mtimes(&self, seconds: i64) -> Result<()> {
        let time = FileTime::from_unix_time(seconds, 0);
        // Deepest first so setting a child does not bump its directory again.
        for path in self.find()?.iter().rev() {
            let metadata = fs::symlink_metadata(path).map_err(|e| Error::io_at(path, e))?;
            if metadata.file_type().is_symlink() {
                filetime::set_symlink_file_times(path, time, time)
            } else {
                filetime::set_file_times(path, time, time)
            }
            .map_err(|e| Error::io_at(path, e))?;
            trace!(path = %path.display(), seconds, "Set times");
        }
        Ok(())
    }
}

/// Held while a keg is being bottled; released on drop.
#[derive(Debug)]
pub struct KegLock {
    file: File,
    path: PathBuf,
}

impl KegLock {
    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for KegLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(lock = %self.path.display(), "Unlocked keg");
    }
}

/// Name of the keg a path inside `cellar` or `<prefix>/opt` belongs to.
#[must_use]
pub fn keg_name_for(path: &Path, cellar: &Path, prefix: &Path) -> Option<String> {
    let rest = path
        .strip_prefix(cellar)
        .or_else(|_| path.strip_prefix(prefix.join("opt")))
        .ok()?;
    rest.components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
}
