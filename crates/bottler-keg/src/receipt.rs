//! The install receipt (`INSTALL_RECEIPT.json`) written into every keg.

use crate::error::{Error, Result};
use bottler_spec::json::{BottleTab, BuiltOn, RuntimeDependency};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Receipt file name inside a keg.
pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// Build metadata recorded at install time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Version of the package manager that built the keg.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homebrew_version: Option<String>,
    /// Whether the keg was installed from a bottle.
    #[serde(default)]
    pub poured_from_bottle: bool,
    /// Whether the keg was built for bottling.
    #[serde(default)]
    pub built_as_bottle: bool,
    /// Files rewritten by relocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_files: Option<Vec<String>>,
    /// Install time, cleared for bottles.
    #[serde(default)]
    pub time: Option<i64>,
    /// HEAD commit for HEAD builds, cleared for bottles.
    #[serde(rename = "HEAD", default)]
    pub head: Option<String>,
    /// Timestamp of the newest source file.
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
    /// CPU architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// Build host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_on: Option<BuiltOn>,
    /// Remaining fields, preserved on rewrite.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Receipt {
    /// Receipt path for a keg root.
    #[must_use]
    pub fn path_in(keg: &Path) -> PathBuf {
        keg.join(RECEIPT_FILE)
    }

    /// Reads the receipt of a keg.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt is missing or invalid.
    pub fn read(keg: &Path) -> Result<Self> {
        let path = Self::path_in(keg);
        let content = std::fs::read_to_string(&path).map_err(|e| Error::receipt(&path, e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| Error::receipt(&path, e.to_string()))
    }

    /// Writes the receipt into a keg.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, keg: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        bottler_core::fs::atomic_write(&Self::path_in(keg), content.as_bytes())?;
        Ok(())
    }

    /// The receipt as shipped inside a bottle.
    #[must_use]
    pub fn for_bottle(&self, changed_files: Vec<String>) -> Self {
        Self {
            poured_from_bottle: false,
            head: None,
            time: None,
            changed_files: Some(changed_files),
            ..self.clone()
        }
    }

    /// The subset published in bottle JSON.
    #[must_use]
    pub fn to_bottle_tab(&self) -> BottleTab {
        BottleTab {
            homebrew_version: self.homebrew_version.clone(),
            changed_files: self.changed_files.clone().unwrap_or_default(),
            source_modified_time: self.source_modified_time,
            compiler: self.compiler.clone(),
            stdlib: self.stdlib.clone(),
            runtime_dependencies: self.runtime_dependencies.clone(),
            arch: self.arch.clone(),
            built_on: self.built_on.clone(),
            oldest_cpu_family: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Receipts loaded during one run, keyed by keg root.
///
/// Stages that change a keg call [`ReceiptCache::invalidate`] so the next
/// read sees the file on disk.
#[derive(Debug, Default)]
pub struct ReceiptCache {
    receipts: HashMap<PathBuf, Receipt>,
}

impl ReceiptCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The receipt of a keg, read on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt cannot be read.
    pub fn get(&mut self, keg: &Path) -> Result<&Receipt> {
        match self.receipts.entry(keg.to_path_buf()) {
            Entry::Occupied(entry) => {
                trace!(keg = %keg.display(), "Receipt cache hit");
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => Ok(entry.insert(Receipt::read(keg)?)),
        }
    }

    /// Drops the cached receipt of a keg.
    pub fn invalidate(&mut self, keg: &Path) {
        self.receipts.remove(keg);
    }

    /// Drops every cached receipt.
    pub fn clear(&mut self) {
        self.receipts.clear();
    }
}
