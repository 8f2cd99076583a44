//! Package descriptors.
//!
//! Resolving a package definition is outside this crate. The caller hands
//! over a small TOML file with what bottling needs to know:
//!
//! ```toml
//! name = "foo"
//! full_name = "acme/tools/foo"
//! version = "1.0"
//! revision = 1
//! path = "/opt/homebrew/Library/Taps/acme/homebrew-tools/Formula/f/foo.rb"
//! desc = "Foo tool"
//! license = "MIT"
//! homepage = "https://example.com/foo"
//! deps = ["go", "zlib"]
//! runtime_dependencies = ["zlib"]
//!
//! [tap]
//! name = "acme/tools"
//! path = "/opt/homebrew/Library/Taps/acme/homebrew-tools"
//! git_revision = "0123abc"
//! remote = "https://github.com/acme/homebrew-tools"
//! ```

use crate::error::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static GO_DEPENDENCY: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"^go(@[\d.]+)?$"));

/// The repository a package comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TapInfo {
    /// `user/repo`.
    pub name: String,
    /// Local checkout.
    pub path: PathBuf,
    /// Checked out commit.
    #[serde(default)]
    pub git_revision: Option<String>,
    /// Remote URL.
    #[serde(default)]
    pub remote: Option<String>,
}

/// What bottling needs to know about one package.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageDescriptor {
    /// Short name.
    pub name: String,
    /// Name qualified by its tap; defaults to `name`.
    #[serde(default)]
    pub full_name: Option<String>,
    /// Stable version.
    pub version: String,
    /// Revision appended as `_<n>` to the version.
    #[serde(default)]
    pub revision: u32,
    /// Definition file.
    pub path: PathBuf,
    /// One-line description.
    #[serde(default)]
    pub desc: Option<String>,
    /// SPDX license expression.
    #[serde(default)]
    pub license: Option<String>,
    /// Homepage URL.
    #[serde(default)]
    pub homepage: Option<String>,
    /// Whether a stable version is defined.
    #[serde(default = "default_true")]
    pub stable: bool,
    /// Why bottles are disabled, if they are.
    #[serde(default)]
    pub bottle_disabled: Option<String>,
    /// All declared dependencies, build-time included.
    #[serde(default)]
    pub deps: Vec<String>,
    /// Dependencies needed at run time.
    #[serde(default)]
    pub runtime_dependencies: Vec<String>,
    /// Source repository; absent for standalone definitions.
    #[serde(default)]
    pub tap: Option<TapInfo>,
}

const fn default_true() -> bool {
    true
}

impl PackageDescriptor {
    /// Parses a descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::descriptor(path, e.to_string()))
    }

    /// Reads a descriptor file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::descriptor(path, e.to_string()))?;
        Self::from_toml_str(&content, path)
    }

    /// Qualified name.
    #[must_use]
    pub fn full_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.name)
    }

    /// Version with revision, e.g. `1.0_1`.
    #[must_use]
    pub fn pkg_version(&self) -> String {
        if self.revision > 0 {
            format!("{}_{}", self.version, self.revision)
        } else {
            self.version.clone()
        }
    }

    /// Whether the package comes from the core tap.
    #[must_use]
    pub fn is_core_tap(&self) -> bool {
        self.tap.as_ref().is_some_and(|t| t.name == "homebrew/core")
    }

    /// The package and its runtime dependencies, by short name.
    #[must_use]
    pub fn package_and_runtime_names(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(
                self.runtime_dependencies
                    .iter()
                    .map(|d| d.rsplit('/').next().unwrap_or(d).to_string()),
            )
            .collect()
    }

    /// Whether any dependency is a Go toolchain.
    #[must_use]
    pub fn depends_on_go(&self) -> bool {
        self.deps
            .iter()
            .any(|d| GO_DEPENDENCY.is_match(d.rsplit('/').next().unwrap_or(d)))
    }

    /// Definition path relative to `base`, or as given when outside it.
    #[must_use]
    pub fn path_relative_to(&self, base: &Path) -> String {
        self.path
            .strip_prefix(base)
            .unwrap_or(&self.path)
            .to_string_lossy()
            .into_owned()
    }
}
