//! The JSON transport document.
//!
//! Each build machine writes one document per bottle; the merge step reads
//! them back. The shape is:
//!
//! ```text
//! { "<full name>": {
//!     "formula": { name, pkg_version, path, tap_git_path, tap_git_revision,
//!                  tap_git_remote, desc, license, homepage },
//!     "bottle":  { root_url, prefix, cellar, rebuild, date,
//!                  tags: { "<tag>": { filename, local_filename, sha256,
//!                                     formulae_brew_sh_path, tab } } } } }
//! ```

use crate::error::{Error, Result};
use crate::model::{BottleSpecification, CellarMode};
use bottler_core::PlatformTag;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// A runtime dependency recorded in the build receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    /// Full name of the dependency.
    pub full_name: String,
    /// Version it was built against.
    pub version: String,
    /// Remaining receipt fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Build host details recorded in the receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuiltOn {
    /// `Linux` or `Macintosh`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Human readable OS version, e.g. `Ubuntu 22.04 LTS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    /// glibc version on Linux.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glibc_version: Option<String>,
    /// Remaining receipt fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The receipt subset shipped inside bottle JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BottleTab {
    /// Version of the package manager that built the keg.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homebrew_version: Option<String>,
    /// Files whose content was relocated.
    #[serde(default)]
    pub changed_files: Vec<String>,
    /// Timestamp used for reproducible archives.
    #[serde(default)]
    pub source_modified_time: i64,
    /// Compiler used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<String>,
    /// C++ standard library used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdlib: Option<String>,
    /// Runtime dependencies baked in at build time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_dependencies: Option<Vec<RuntimeDependency>>,
    /// CPU architecture (`x86_64`, `arm64`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// Build host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_on: Option<BuiltOn>,
    /// Oldest CPU family the binaries support.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_cpu_family: Option<String>,
    /// Remaining receipt fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Package metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaInfo {
    /// Short name.
    pub name: String,
    /// Version with revision.
    pub pkg_version: String,
    /// Definition path relative to the repository.
    pub path: String,
    /// Definition path relative to its tap.
    #[serde(default)]
    pub tap_git_path: Option<String>,
    /// Tap HEAD at bottling time.
    #[serde(default)]
    pub tap_git_revision: Option<String>,
    /// Tap remote URL.
    #[serde(default)]
    pub tap_git_remote: Option<String>,
    /// Description (ASCII only).
    #[serde(default)]
    pub desc: Option<String>,
    /// SPDX license expression.
    #[serde(default)]
    pub license: Option<String>,
    /// Homepage URL.
    #[serde(default)]
    pub homepage: Option<String>,
}

/// Per-platform bottle details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagInfo {
    /// Download file name (URL-encoded).
    pub filename: String,
    /// File name on disk.
    pub local_filename: String,
    /// sha256 of the archive.
    pub sha256: String,
    /// Cellar, present once hoisted out of the bottle section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cellar: Option<String>,
    /// Analytics path of the package.
    #[serde(default)]
    pub formulae_brew_sh_path: Option<String>,
    /// Build receipt subset.
    #[serde(default)]
    pub tab: BottleTab,
}

/// Bottle section of a package entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleInfo {
    /// Download root.
    pub root_url: String,
    /// Prefix the bottle was built for.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Cellar shared by every tag of this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cellar: Option<String>,
    /// Rebuild counter.
    #[serde(default)]
    pub rebuild: u32,
    /// Bottling date (`YYYY-MM-DD`).
    #[serde(default)]
    pub date: Option<String>,
    /// Per-platform details.
    pub tags: BTreeMap<PlatformTag, TagInfo>,
}

impl BottleInfo {
    /// Moves the shared `cellar` into every tag that does not set its own.
    pub fn hoist_cellar(&mut self) {
        if let Some(cellar) = self.cellar.take() {
            for tag in self.tags.values_mut() {
                tag.cellar.get_or_insert_with(|| cellar.clone());
            }
        }
    }

    /// The cellar recorded for a tag, after hoisting.
    #[must_use]
    pub fn cellar_for(&self, tag: &PlatformTag) -> Option<CellarMode> {
        self.tags
            .get(tag)
            .and_then(|t| t.cellar.as_deref().or(self.cellar.as_deref()))
            .map(CellarMode::parse)
    }
}

/// One package's entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Package metadata.
    pub formula: FormulaInfo,
    /// Bottle details.
    pub bottle: BottleInfo,
}

impl PackageEntry {
    /// Builds the specification described by this entry, one checksum per tag.
    ///
    /// # Errors
    ///
    /// Returns an error if a digest is invalid or a tag has no cellar.
    pub fn to_specification(&self) -> Result<BottleSpecification> {
        let mut spec = BottleSpecification::new(&self.bottle.root_url).with_rebuild(self.bottle.rebuild);
        spec.prefix.clone_from(&self.bottle.prefix);
        for (tag, info) in &self.bottle.tags {
            let cellar = self.bottle.cellar_for(tag).ok_or_else(|| {
                Error::merge_conflict(&self.formula.name, format!("no cellar recorded for {tag}"))
            })?;
            spec.add_checksum(tag.clone(), &info.sha256, cellar)?;
        }
        Ok(spec)
    }
}

/// A bottle JSON document: package entries keyed by full name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BottleJson {
    packages: BTreeMap<String, PackageEntry>,
}

impl BottleJson {
    /// A document with a single package.
    #[must_use]
    pub fn single(full_name: impl Into<String>, entry: PackageEntry) -> Self {
        let mut packages = BTreeMap::new();
        packages.insert(full_name.into(), entry);
        Self { packages }
    }

    /// Parses a document from text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a bottle document.
    pub fn from_str_at(content: &str, path: &Path) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::InvalidJson {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Reads a document from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| bottler_core::Error::io_at(path, e))?;
        Self::from_str_at(&content, path)
    }

    /// Writes the document as pretty JSON, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        bottler_core::fs::remove_file_if_exists(path)?;
        bottler_core::fs::atomic_write(path, content.as_bytes())?;
        Ok(())
    }

    /// Package entries by full name.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PackageEntry)> {
        self.packages.iter()
    }

    /// The entry for a package.
    #[must_use]
    pub fn get(&self, full_name: &str) -> Option<&PackageEntry> {
        self.packages.get(full_name)
    }

    /// Whether the document has no packages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Consumes the document into its entries.
    #[must_use]
    pub fn into_entries(self) -> BTreeMap<String, PackageEntry> {
        self.packages
    }
}
