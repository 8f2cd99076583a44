//! Replacing install locations with placeholders, and back.
//!
//! Every placeholder has exactly the byte length of the path it stands for,
//! so offsets inside binaries do not move. A file is only rewritten when
//! restoring the rewritten bytes reproduces the original exactly; anything
//! else is left alone and later reported by the relocatability scan.
//!
//! [`RelocationGuard`] pairs the rewrite with its restore pass: dropping the
//! guard on any path (error, interrupt, success) puts the keg back.

use crate::error::{Error, Result};
use bottler_core::{InstallPaths, Interrupt};
use regex::bytes::Regex;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

const RESTORE_ATTEMPTS: usize = 3;
const MIN_PLACEHOLDER_LEN: usize = 5;

/// One install location and its placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Location name (`PREFIX`, `CELLAR`, ...).
    pub label: &'static str,
    /// The real path.
    pub location: String,
    /// Same-length token written in its place.
    pub token: String,
}

/// Builds the placeholder for a location of `len` bytes: `@@LABEL___@@`,
/// with the label truncated or padded to fit.
///
/// # Errors
///
/// Returns an error if `len` is too short to hold a distinguishable token.
pub fn placeholder_token(label: &str, len: usize) -> Result<String> {
    if len < MIN_PLACEHOLDER_LEN {
        return Err(Error::relocation(
            label,
            format!("a {len} byte location cannot be replaced by a same-length placeholder"),
        ));
    }
    let body_len = len - 4;
    let mut body: String = label.chars().take(body_len).collect();
    body.extend(std::iter::repeat_n('_', body_len - body.len()));
    Ok(format!("@@{body}@@"))
}

/// Install locations and their placeholders, longest location first.
#[derive(Debug, Clone)]
pub struct RelocationTable {
    entries: Vec<Placeholder>,
    locations: Regex,
    tokens: Regex,
}

impl RelocationTable {
    /// The table for the prefix, cellar, repository and library.
    ///
    /// # Errors
    ///
    /// Returns an error if a location is too short for a placeholder.
    pub fn for_paths(paths: &InstallPaths) -> Result<Self> {
        Self::new(&[
            ("CELLAR", paths.cellar.to_string_lossy().into_owned()),
            ("LIBRARY", paths.library.to_string_lossy().into_owned()),
            ("PREFIX", paths.prefix.to_string_lossy().into_owned()),
            ("REPOSITORY", paths.repository.to_string_lossy().into_owned()),
        ])
    }

    /// A table from `(label, location)` pairs. Repeated locations keep their
    /// first label.
    ///
    /// # Errors
    ///
    /// Returns an error if a location is too short or two tokens collide.
    pub fn new(pairs: &[(&'static str, String)]) -> Result<Self> {
        let mut entries: Vec<Placeholder> = Vec::new();
        for (label, location) in pairs {
            let location = location.trim_end_matches('/').to_string();
            if entries.iter().any(|e| e.location == location) {
                continue;
            }
            let token = placeholder_token(label, location.len())?;
            if entries.iter().any(|e| e.token == token) {
                return Err(Error::relocation(
                    &location,
                    format!("placeholder {token} is ambiguous"),
                ));
            }
            entries.push(Placeholder {
                label,
                location,
                token,
            });
        }
        entries.sort_by(|a, b| b.location.len().cmp(&a.location.len()));

        let locations = alternation(entries.iter().map(|e| e.location.as_str()))?;
        let tokens = alternation(entries.iter().map(|e| e.token.as_str()))?;
        Ok(Self {
            entries,
            locations,
            tokens,
        })
    }

    /// Entries, longest location first.
    #[must_use]
    pub fn entries(&self) -> &[Placeholder] {
        &self.entries
    }

    /// Replaces locations with tokens.
    #[must_use]
    pub fn relocate<'b>(&self, bytes: &'b [u8]) -> Cow<'b, [u8]> {
        self.locations.replace_all(bytes, |caps: &regex::bytes::Captures<'_>| {
            self.entries
                .iter()
                .find(|e| e.location.as_bytes() == &caps[0])
                .map_or_else(|| caps[0].to_vec(), |e| e.token.as_bytes().to_vec())
        })
    }

    /// Replaces tokens with locations.
    #[must_use]
    pub fn restore<'b>(&self, bytes: &'b [u8]) -> Cow<'b, [u8]> {
        self.tokens.replace_all(bytes, |caps: &regex::bytes::Captures<'_>| {
            self.entries
                .iter()
                .find(|e| e.token.as_bytes() == &caps[0])
                .map_or_else(|| caps[0].to_vec(), |e| e.location.as_bytes().to_vec())
        })
    }

    /// The relocated bytes, or `None` when nothing changes or the change
    /// would not restore exactly.
    #[must_use]
    pub fn relocate_reversibly(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        match self.relocate(bytes) {
            Cow::Borrowed(_) => None,
            Cow::Owned(relocated) => (self.restore(&relocated) == bytes).then_some(relocated),
        }
    }
}

fn alternation<'s>(parts: impl Iterator<Item = &'s str>) -> Result<Regex> {
    let pattern = parts.map(regex::escape).collect::<Vec<_>>().join("|");
    let pattern = if pattern.is_empty() { "[^\\s\\S]".to_string() } else { pattern };
    Regex::new(&pattern).map_err(|e| Error::relocation("<table>", e.to_string()))
}

/// Files and symlinks rewritten in a keg, relative to its root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelocationRecord {
    /// Regular files whose content was rewritten.
    pub changed_files: Vec<PathBuf>,
    /// Symlinks whose target was rewritten.
    pub changed_symlinks: Vec<PathBuf>,
}

impl RelocationRecord {
    /// Whether nothing was rewritten.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed_files.is_empty() && self.changed_symlinks.is_empty()
    }

    /// Changed files as receipt entries (`/`-separated, sorted).
    #[must_use]
    pub fn changed_file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .changed_files
            .iter()
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .collect();
        names.sort();
        names
    }
}

/// Applies a [`RelocationTable`] to a keg.
#[derive(Debug, Clone)]
pub struct Relocator {
    table: RelocationTable,
}

impl Relocator {
    /// A relocator for `table`.
    #[must_use]
    pub const fn new(table: RelocationTable) -> Self {
        Self { table }
    }

    /// The placeholder table.
    #[must_use]
    pub const fn table(&self) -> &RelocationTable {
        &self.table
    }

    /// Rewrites every file and symlink under `root`, recording each change in
    /// `record` before it is made.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or when `interrupt` trips. `record`
    /// then lists everything that must be restored.
    pub fn relocate(&self, root: &Path, record: &mut RelocationRecord, interrupt: &Interrupt) -> Result<()> {
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            interrupt.check()?;
            let entry = entry.map_err(|e| Error::relocation(root, e.to_string()))?;
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                let target = fs::read_link(path).map_err(|e| Error::io_at(path, e))?;
                let target = target.to_string_lossy();
                if let Some(new_target) = self.table.relocate_reversibly(target.as_bytes()) {
                    let new_target = String::from_utf8_lossy(&new_target).into_owned();
                    debug!(path = %relative.display(), from = %target, to = %new_target, "Relocating symlink");
                    record.changed_symlinks.push(relative);
                    replace_symlink(path, Path::new(&new_target))?;
                }
            } else if file_type.is_file() {
                let bytes = fs::read(path).map_err(|e| Error::io_at(path, e))?;
                match self.table.relocate(&bytes) {
                    Cow::Borrowed(_) => {}
                    Cow::Owned(relocated) if self.table.restore(&relocated) == bytes.as_slice() => {
                        debug!(path = %relative.display(), "Relocating file");
                        record.changed_files.push(relative);
                        write_preserving_permissions(path, &relocated)?;
                    }
                    Cow::Owned(_) => {
                        warn!(path = %relative.display(), "Already contains a placeholder, leaving unrelocated");
                    }
                }
            }
        }
        Ok(())
    }

    /// Puts back every location listed in `record`.
    ///
    /// Never polls the interrupt flag; failed paths are retried before the
    /// remaining failures are reported.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Restore`] listing paths that could not be restored.
    pub fn restore(&self, root: &Path, record: &RelocationRecord) -> Result<()> {
        let mut pending_files: Vec<&PathBuf> = record.changed_files.iter().collect();
        let mut pending_links: Vec<&PathBuf> = record.changed_symlinks.iter().collect();
        let mut failures = Vec::new();

        for attempt in 1..=RESTORE_ATTEMPTS {
            failures.clear();
            pending_files.retain(|relative| match self.restore_file(&root.join(relative)) {
                Ok(()) => false,
                Err(e) => {
                    failures.push(format!("{}: {e}", relative.display()));
                    true
                }
            });
            pending_links.retain(|relative| match self.restore_symlink(&root.join(relative)) {
                Ok(()) => false,
                Err(e) => {
                    failures.push(format!("{}: {e}", relative.display()));
                    true
                }
            });
            if failures.is_empty() {
                debug!(
                    keg = %root.display(),
                    files = record.changed_files.len(),
                    symlinks = record.changed_symlinks.len(),
                    "Restored install locations"
                );
                return Ok(());
            }
            warn!(attempt, remaining = failures.len(), "Restore incomplete, retrying");
        }

        Err(Error::Restore {
            keg: root.to_path_buf(),
            failures,
        })
    }

    fn restore_file(&self, path: &Path) -> Result<()> {
        let bytes = fs::read(path).map_err(|e| Error::io_at(path, e))?;
        if let Cow::Owned(restored) = self.table.restore(&bytes) {
            write_preserving_permissions(path, &restored)?;
        }
        Ok(())
    }

    fn restore_symlink(&self, path: &Path) -> Result<()> {
        let target = fs::read_link(path).map_err(|e| Error::io_at(path, e))?;
        let target = target.to_string_lossy();
        if let Cow::Owned(restored) = self.table.restore(target.as_bytes()) {
            let restored = String::from_utf8_lossy(&restored).into_owned();
            replace_symlink(path, Path::new(&restored))?;
        }
        Ok(())
    }
}

fn write_preserving_permissions(path: &Path, bytes: &[u8]) -> Result<()> {
    let permissions = fs::metadata(path).map_err(|e| Error::io_at(path, e))?.permissions();
    if permissions.readonly() {
        let mut writable = permissions.clone();
        #[allow(clippy::permissions_set_readonly_false)]
        writable.set_readonly(false);
        fs::set_permissions(path, writable).map_err(|e| Error::io_at(path, e))?;
    }
    let written = fs::write(path, bytes).map_err(|e| Error::io_at(path, e));
    if permissions.readonly() {
        fs::set_permissions(path, permissions).map_err(|e| Error::io_at(path, e))?;
    }
    written
}

fn replace_symlink(path: &Path, target: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| Error::io_at(path, e))?;
    create_symlink(target, path).map_err(|e| Error::io_at(path, e))
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Keeps a keg relocated, restoring it when released or dropped.
///
/// Files registered with [`RelocationGuard::preserve`] are written back
/// first, then the placeholders are replaced.
pub struct RelocationGuard<'a> {
    relocator: Option<&'a Relocator>,
    root: PathBuf,
    record: RelocationRecord,
    preserved: Vec<(PathBuf, Option<Vec<u8>>)>,
    released: bool,
}

impl<'a> RelocationGuard<'a> {
    /// Relocates the keg at `root`. A failure part way restores what was done.
    ///
    /// # Errors
    ///
    /// Returns the relocation error after the restore pass ran.
    pub fn acquire(relocator: &'a Relocator, root: &Path, interrupt: &Interrupt) -> Result<Self> {
        let mut guard = Self {
            relocator: Some(relocator),
            root: root.to_path_buf(),
            record: RelocationRecord::default(),
            preserved: Vec::new(),
            released: false,
        };
        relocator.relocate(root, &mut guard.record, interrupt)?;
        debug!(
            keg = %root.display(),
            files = guard.record.changed_files.len(),
            symlinks = guard.record.changed_symlinks.len(),
            "Relocated keg"
        );
        Ok(guard)
    }

    /// A guard that relocates nothing but still restores preserved files.
    #[must_use]
    pub fn without_relocation(root: &Path) -> Self {
        Self {
            relocator: None,
            root: root.to_path_buf(),
            record: RelocationRecord::default(),
            preserved: Vec::new(),
            released: false,
        }
    }

    /// What was rewritten.
    #[must_use]
    pub const fn record(&self) -> &RelocationRecord {
        &self.record
    }

    /// Snapshots `path` so its current content (or absence) comes back on release.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn preserve(&mut self, path: &Path) -> Result<()> {
        let content = match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::io_at(path, e)),
        };
        self.preserved.push((path.to_path_buf(), content));
        Ok(())
    }

    /// Restores the keg and reports failures.
    ///
    /// # Errors
    ///
    /// Returns an error if any file could not be restored.
    pub fn release(mut self) -> Result<()> {
        self.restore_all()
    }

    fn restore_all(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut failures = Vec::new();
        for (path, content) in self.preserved.drain(..).rev() {
            let restored = match content {
                Some(bytes) => bottler_core::fs::atomic_write(&path, &bytes).map_err(Error::from),
                None => bottler_core::fs::remove_file_if_exists(&path)
                    .map(|_| ())
                    .map_err(Error::from),
            };
            if let Err(e) = restored {
                failures.push(format!("{}: {e}", path.display()));
            }
        }

        if let Some(relocator) = self.relocator {
            match relocator.restore(&self.root, &self.record) {
                Ok(()) => {}
                Err(Error::Restore { failures: more, .. }) => failures.extend(more),
                Err(e) => failures.push(e.to_string()),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Restore {
                keg: self.root.clone(),
                failures,
            })
        }
    }
}

impl Drop for RelocationGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.restore_all() {
            error!(error = %e, "Failed to restore keg");
        }
    }
}
