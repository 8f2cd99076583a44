//! Reproducible bottle archives.
//!
//! The tar stream comes from an [`Archiver`]: GNU tar with the pax options
//! that drop volatile metadata, or the in-process [`NativeTar`] writer. The
//! stream is then gzipped with a fixed header time and embedded file name, so
//! the same keg always yields the same bytes.

use crate::error::{Error, Result};
use bottler_core::{ArchiverKind, ExternalTool, Interrupt, SystemTool, ToolArg, digest};
use flate2::{Compression, GzBuilder};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tar::{EntryType, Header};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Chunk size used when compressing.
pub const GZIP_BUFFER_SIZE: usize = 64 * 1024;

/// GNU tar options for reproducible output.
pub const REPRODUCIBLE_TAR_ARGS: [&str; 10] = [
    "--format",
    "pax",
    "--owner",
    "0",
    "--group",
    "0",
    "--sort",
    "name",
    "--pax-option",
    "globexthdr.name=/GlobalHead.%n,exthdr.name=%d/PaxHeaders/%f,delete=atime,delete=ctime",
];

/// Produces an uncompressed tar of one directory.
pub trait Archiver {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Writes a tar of `entry` (relative to `base`, and named that way inside
    /// the archive) to `tar_path`. Timestamps are expected to be normalized
    /// already; `mtime` is the value they were set to.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be written.
    fn create_tar(&self, base: &Path, entry: &Path, tar_path: &Path, mtime: i64) -> Result<()>;
}

/// The archiver selected by configuration.
///
/// # Errors
///
/// Returns an error if GNU tar is selected but not installed.
pub fn archiver_for(kind: ArchiverKind) -> Result<Box<dyn Archiver>> {
    match kind {
        ArchiverKind::GnuTar => Ok(Box::new(GnuTar::detect()?)),
        ArchiverKind::Native => Ok(Box::new(NativeTar)),
    }
}

/// GNU tar run as an external process.
#[derive(Debug, Clone)]
pub struct GnuTar<T: ExternalTool = SystemTool> {
    tool: T,
}

impl GnuTar<SystemTool> {
    /// Finds `gtar`, `gnutar` or `tar` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error if none is installed.
    pub fn detect() -> Result<Self> {
        SystemTool::first_available(&["gtar", "gnutar", "tar"])
            .map(Self::with_tool)
            .ok_or_else(|| Error::Core(bottler_core::Error::tool_missing("tar")))
    }
}

impl<T: ExternalTool> GnuTar<T> {
    /// Uses `tool` as the tar binary.
    pub const fn with_tool(tool: T) -> Self {
        Self { tool }
    }

    /// Arguments for archiving `entry` into `tar_path`.
    #[must_use]
    pub fn arguments(entry: &Path, tar_path: &Path) -> Vec<ToolArg> {
        let mut args: Vec<ToolArg> = vec!["--create".into(), "--numeric-owner".into()];
        args.extend(REPRODUCIBLE_TAR_ARGS.iter().map(|a| ToolArg::from(*a)));
        args.push("--file".into());
        args.push(tar_path.into());
        args.push(entry.into());
        args
    }
}

impl<T: ExternalTool> Archiver for GnuTar<T> {
    fn name(&self) -> &str {
        self.tool.name()
    }

    fn create_tar(&self, base: &Path, entry: &Path, tar_path: &Path, _mtime: i64) -> Result<()> {
        let args = Self::arguments(entry, tar_path);
        self.tool.run(&args, Some(base), &[])?;
        Ok(())
    }
}

/// In-process tar writer: sorted entries, owner 0, fixed mtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTar;

impl Archiver for NativeTar {
    fn name(&self) -> &str {
        "native"
    }

    fn create_tar(&self, base: &Path, entry: &Path, tar_path: &Path, mtime: i64) -> Result<()> {
        let file = File::create(tar_path).map_err(|e| Error::io_at(tar_path, e))?;
        let mut builder = tar::Builder::new(BufWriter::new(file));
        builder.follow_symlinks(false);
        let mtime = u64::try_from(mtime).unwrap_or(0);

        for item in WalkDir::new(base.join(entry))
            .follow_links(false)
            .sort_by_file_name()
        {
            let item = item.map_err(|e| Error::archive(e.to_string()))?;
            let path = item.path();
            let name = path.strip_prefix(base).unwrap_or(path);
            let metadata = fs::symlink_metadata(path).map_err(|e| Error::io_at(path, e))?;
            let file_type = metadata.file_type();

            let mut header = Header::new_gnu();
            header.set_mtime(mtime);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mode(mode_of(&metadata));

            if file_type.is_dir() {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                builder.append_data(&mut header, name, io::empty())?;
            } else if file_type.is_symlink() {
                let target = fs::read_link(path).map_err(|e| Error::io_at(path, e))?;
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                builder.append_link(&mut header, name, target)?;
            } else if file_type.is_file() {
                header.set_entry_type(EntryType::Regular);
                header.set_size(metadata.len());
                let content = File::open(path).map_err(|e| Error::io_at(path, e))?;
                builder.append_data(&mut header, name, content)?;
            } else {
                debug!(path = %path.display(), "Skipping special file");
            }
        }

        builder.into_inner()?.flush()?;
        Ok(())
    }
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Deletes a file on drop unless committed.
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    /// Guards `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            committed: false,
        }
    }

    /// Guarded path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keeps the file.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match bottler_core::fs::remove_file_if_exists(&self.path) {
            Ok(true) => debug!(path = %self.path.display(), "Removed partial file"),
            Ok(false) => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove partial file"),
        }
    }
}

/// A finished bottle archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArchive {
    /// Path of the `.tar.gz`.
    pub path: PathBuf,
    /// sha256 of the compressed bytes.
    pub sha256: String,
}

/// Tars and compresses a keg into a bottle.
pub struct ArchiveBuilder<'a> {
    archiver: &'a dyn Archiver,
    interrupt: &'a Interrupt,
}

impl<'a> ArchiveBuilder<'a> {
    /// A builder using `archiver`.
    #[must_use]
    pub const fn new(archiver: &'a dyn Archiver, interrupt: &'a Interrupt) -> Self {
        Self { archiver, interrupt }
    }

    /// Archives `cellar/<keg>` into `bottle_path`.
    ///
    /// `name` is the package name; the gzip header records
    /// `<name>-bottle.tar` as the original file name. A relative
    /// `bottle_path` is resolved against the current directory. Partial
    /// output is deleted on any failure, interrupts included.
    ///
    /// # Errors
    ///
    /// Returns an error if archiving fails or the run is interrupted.
    pub fn build(
        &self,
        cellar: &Path,
        keg: &Path,
        name: &str,
        bottle_path: &Path,
        source_time: i64,
    ) -> Result<BuiltArchive> {
        // The archiver runs inside the cellar; every output path must be absolute.
        let absolute = std::path::absolute(bottle_path).map_err(|e| Error::io_at(bottle_path, e))?;
        let bottle_path = absolute.as_path();
        let output_dir = bottle_path.parent().unwrap_or(bottle_path);
        let tar_name = format!("{name}-bottle.tar");
        let tar = PartialFile::new(output_dir.join(&tar_name));

        self.interrupt.check()?;
        debug!(archiver = self.archiver.name(), keg = %keg.display(), "Creating tar");
        self.archiver.create_tar(cellar, keg, tar.path(), source_time)?;
        let time = filetime::FileTime::from_unix_time(source_time, 0);
        filetime::set_file_times(tar.path(), time, time).map_err(|e| Error::io_at(tar.path(), e))?;

        let bottle = PartialFile::new(bottle_path);
        self.compress(tar.path(), bottle_path, &tar_name, source_time)?;
        drop(tar);
        bottle.commit();

        let sha256 = digest::sha256_file(bottle_path)?;
        info!(bottle = %bottle_path.display(), %sha256, "Built bottle archive");
        Ok(BuiltArchive {
            path: bottle_path.to_path_buf(),
            sha256,
        })
    }

    fn compress(&self, tar_path: &Path, bottle_path: &Path, tar_name: &str, source_time: i64) -> Result<()> {
        let mut input = File::open(tar_path).map_err(|e| Error::io_at(tar_path, e))?;
        let output = File::create(bottle_path).map_err(|e| Error::io_at(bottle_path, e))?;
        let mut encoder = GzBuilder::new()
            .mtime(u32::try_from(source_time).unwrap_or(0))
            .filename(tar_name.as_bytes())
            .write(BufWriter::new(output), Compression::default());

        let mut buffer = vec![0u8; GZIP_BUFFER_SIZE];
        loop {
            self.interrupt.check()?;
            let read = input.read(&mut buffer).map_err(|e| Error::io_at(tar_path, e))?;
            if read == 0 {
                break;
            }
            encoder
                .write_all(&buffer[..read])
                .map_err(|e| Error::io_at(bottle_path, e))?;
        }
        encoder
            .finish()
            .and_then(|mut w| w.flush())
            .map_err(|e| Error::io_at(bottle_path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bottler_core::ToolOutput;
    use flate2::read::GzDecoder;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn cellar_with_keg(temp: &TempDir) -> PathBuf {
        let cellar = temp.path().join("Cellar");
        let keg = cellar.join("foo/1.0");
        fs::create_dir_all(keg.join("bin")).unwrap();
        fs::write(keg.join("bin/foo"), "#!/bin/sh\necho foo\n").unwrap();
        fs::write(keg.join("INSTALL_RECEIPT.json"), "{}").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("bin/foo", keg.join("foo-link")).unwrap();
        cellar
    }

    #[test]
    fn test_native_archive_lists_sorted_entries() {
        let temp = TempDir::new().unwrap();
        let cellar = cellar_with_keg(&temp);
        let out = temp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let bottle = out.join("foo--1.0.x86_64_linux.bottle.tar.gz");

        let interrupt = Interrupt::new();
        let built = ArchiveBuilder::new(&NativeTar, &interrupt)
            .build(&cellar, Path::new("foo/1.0"), "foo", &bottle, 1_700_000_000)
            .unwrap();

        assert_eq!(built.sha256, digest::sha256_file(&bottle).unwrap());
        assert!(!out.join("foo-bottle.tar").exists());

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&bottle).unwrap()));
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            assert_eq!(entry.header().mtime().unwrap(), 1_700_000_000);
            assert_eq!(entry.header().uid().unwrap(), 0);
            names.push(entry.path().unwrap().to_string_lossy().trim_end_matches('/').to_string());
        }
        let mut expected = vec!["foo/1.0", "foo/1.0/INSTALL_RECEIPT.json", "foo/1.0/bin", "foo/1.0/bin/foo"];
        if cfg!(unix) {
            expected.push("foo/1.0/foo-link");
        }
        assert_eq!(names, expected);
    }

    #[test]
    fn test_gzip_header_is_fixed() {
        let temp = TempDir::new().unwrap();
        let cellar = cellar_with_keg(&temp);
        let bottle = temp.path().join("foo.tar.gz");

        let interrupt = Interrupt::new();
        ArchiveBuilder::new(&NativeTar, &interrupt)
            .build(&cellar, Path::new("foo/1.0"), "foo", &bottle, 1_700_000_000)
            .unwrap();

        let decoder = GzDecoder::new(File::open(&bottle).unwrap());
        let header = decoder.header().unwrap();
        assert_eq!(header.mtime(), 1_700_000_000);
        assert_eq!(header.filename(), Some(b"foo-bottle.tar".as_slice()));
    }

    #[test]
    fn test_interrupt_leaves_no_partial_files() {
        let temp = TempDir::new().unwrap();
        let cellar = cellar_with_keg(&temp);
        let bottle = temp.path().join("foo.tar.gz");

        let interrupt = Interrupt::new();
        interrupt.trigger();
        let err = ArchiveBuilder::new(&NativeTar, &interrupt)
            .build(&cellar, Path::new("foo/1.0"), "foo", &bottle, 0)
            .unwrap_err();

        assert!(err.is_interrupted());
        assert!(!bottle.exists());
        assert!(!temp.path().join("foo-bottle.tar").exists());
    }

    struct FakeTar {
        calls: RefCell<Vec<(Vec<String>, Option<PathBuf>)>>,
    }

    impl ExternalTool for FakeTar {
        fn name(&self) -> &str {
            "gtar"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn invoke(&self, args: &[ToolArg], cwd: Option<&Path>, _env: &[(String, String)]) -> bottler_core::Result<ToolOutput> {
            let args: Vec<String> = args.iter().map(|a| a.display().to_string()).collect();
            let file = args
                .iter()
                .position(|a| a == "--file")
                .map(|i| PathBuf::from(&args[i + 1]))
                .unwrap();
            fs::write(file, b"tar bytes").unwrap();
            self.calls.borrow_mut().push((args, cwd.map(Path::to_path_buf)));
            Ok(ToolOutput::ok(""))
        }
    }

    #[test]
    fn test_gnu_tar_arguments_and_cwd() {
        let temp = TempDir::new().unwrap();
        let cellar = cellar_with_keg(&temp);
        let bottle = temp.path().join("foo.tar.gz");
        let tar = GnuTar::with_tool(FakeTar {
            calls: RefCell::new(Vec::new()),
        });

        let interrupt = Interrupt::new();
        ArchiveBuilder::new(&tar, &interrupt)
            .build(&cellar, Path::new("foo/1.0"), "foo", &bottle, 1)
            .unwrap();

        let calls = tar.tool.calls.borrow();
        assert_eq!(calls.len(), 1);
        let (args, cwd) = &calls[0];
        assert_eq!(cwd.as_deref(), Some(cellar.as_path()));
        assert_eq!(&args[..4], ["--create", "--numeric-owner", "--format", "pax"]);
        assert_eq!(args.last().map(String::as_str), Some("foo/1.0"));
        assert!(args.iter().any(|a| a.contains("delete=atime,delete=ctime")));
    }
}
