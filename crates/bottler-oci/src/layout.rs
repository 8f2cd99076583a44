//! On-disk OCI image layout.
//!
//! Structure:
//! ```text
//! <name>--<version>/
//! ├── oci-layout
//! ├── index.json
//! └── blobs/
//!     └── sha256/
//!         └── abc123...  # file name is the sha256 of its bytes
//! ```

use crate::documents::{ImageIndex, LayoutMarker};
use crate::error::{Error, Result};
use bottler_core::digest;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Layout marker file name.
pub const LAYOUT_FILE: &str = "oci-layout";
/// Top-level index file name.
pub const INDEX_FILE: &str = "index.json";

/// A blob written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Hex sha256 of the bytes, also the file name.
    pub sha256: String,
    /// Byte length.
    pub size: u64,
}

/// Image layout rooted at a directory.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    root: PathBuf,
}

impl ImageLayout {
    /// Opens an existing layout directory.
    #[must_use]
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates an empty layout, removing anything already at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be reset.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.exists() {
            fs::remove_dir_all(&root).map_err(|e| Error::io_at(&root, e))?;
        }
        fs::create_dir_all(&root).map_err(|e| Error::io_at(&root, e))?;
        debug!(root = %root.display(), "Created image layout");
        Ok(Self { root })
    }

    /// Layout root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `blobs/sha256`.
    #[must_use]
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs").join("sha256")
    }

    /// Path of a blob, given a bare or `sha256:` digest.
    #[must_use]
    pub fn blob_path(&self, digest: &str) -> PathBuf {
        let (algo, hash) = digest::split_digest(digest);
        self.root.join("blobs").join(algo).join(hash)
    }

    /// Whether a blob is present.
    #[must_use]
    pub fn has_blob(&self, digest: &str) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Ensures the blob directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if it cannot be created.
    pub fn ensure_dirs(&self) -> Result<()> {
        let blobs = self.blobs_dir();
        fs::create_dir_all(&blobs).map_err(|e| Error::io_at(&blobs, e))
    }

    /// Serializes `value` as pretty JSON into the blob store.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_json_blob<T: Serialize>(&self, value: &T) -> Result<StoredBlob> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_blob(&bytes)
    }

    /// Writes raw bytes into the blob store.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_blob(&self, bytes: &[u8]) -> Result<StoredBlob> {
        self.ensure_dirs()?;
        let sha256 = digest::sha256_bytes(bytes);
        let path = self.blob_path(&sha256);
        bottler_core::fs::remove_file_if_exists(&path)?;
        fs::write(&path, bytes).map_err(|e| Error::io_at(&path, e))?;
        trace!(%sha256, size = bytes.len(), "Wrote blob");
        Ok(StoredBlob {
            sha256,
            size: bytes.len() as u64,
        })
    }

    /// Copies a file into the blob store under its own digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or copied.
    pub fn copy_blob(&self, source: &Path) -> Result<StoredBlob> {
        self.ensure_dirs()?;
        let sha256 = digest::sha256_file(source)?;
        let path = self.blob_path(&sha256);
        let size = fs::copy(source, &path).map_err(|e| Error::io_at(source, e))?;
        debug!(source = %source.display(), %sha256, size, "Copied blob");
        Ok(StoredBlob { sha256, size })
    }

    /// Reads and parses a JSON blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is missing or does not parse as `T`.
    pub fn read_json_blob<T: DeserializeOwned>(&self, digest: &str) -> Result<T> {
        let path = self.blob_path(digest);
        let bytes = fs::read(&path).map_err(|e| Error::io_at(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::layout(&path, e.to_string()))
    }

    /// Deletes a blob if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove_blob(&self, digest: &str) -> Result<()> {
        bottler_core::fs::remove_file_if_exists(&self.blob_path(digest))?;
        Ok(())
    }

    /// Writes a named JSON file at the layout root.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_root_json<T: Serialize>(&self, name: &str, value: &T) -> Result<StoredBlob> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let path = self.root.join(name);
        bottler_core::fs::remove_file_if_exists(&path)?;
        fs::write(&path, &bytes).map_err(|e| Error::io_at(&path, e))?;
        Ok(StoredBlob {
            sha256: digest::sha256_bytes(&bytes),
            size: bytes.len() as u64,
        })
    }

    /// Writes the `oci-layout` marker.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_marker(&self, marker: &LayoutMarker) -> Result<()> {
        self.write_root_json(LAYOUT_FILE, marker).map(|_| ())
    }

    /// Reads `index.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn read_index(&self) -> Result<ImageIndex> {
        let path = self.root.join(INDEX_FILE);
        let bytes = fs::read(&path).map_err(|e| Error::io_at(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::layout(&path, e.to_string()))
    }

    /// Every blob whose file name is not the digest of its content.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob directory cannot be read.
    pub fn mismatched_blobs(&self) -> Result<Vec<PathBuf>> {
        let blobs = self.blobs_dir();
        if !blobs.is_dir() {
            return Ok(Vec::new());
        }
        let mut mismatched = Vec::new();
        for entry in fs::read_dir(&blobs).map_err(|e| Error::io_at(&blobs, e))? {
            let path = entry.map_err(|e| Error::io_at(&blobs, e))?.path();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            if name.as_deref() != Some(digest::sha256_file(&path)?.as_str()) {
                mismatched.push(path);
            }
        }
        mismatched.sort();
        Ok(mismatched)
    }
}
