//! The bottle specification model.
//!
//! A [`BottleSpecification`] is one package version's bottle metadata: where
//! bottles are downloaded from, the rebuild counter, and one
//! [`ChecksumEntry`] per platform tag.

use crate::error::{Error, Result};
use bottler_core::PlatformTag;
use bottler_core::digest::validate_sha256;
use bottler_core::platform::is_default_cellar;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Where a bottle may be poured.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellarMode {
    /// Only placeholder paths; installable under any prefix.
    Any,
    /// Like [`CellarMode::Any`], and no rewriting is needed at install time.
    AnySkipRelocation,
    /// Bound to one cellar path.
    Fixed(String),
}

impl CellarMode {
    /// Parses the JSON spelling (`any`, `any_skip_relocation` or a path).
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim_start_matches(':') {
            "any" => Self::Any,
            "any_skip_relocation" => Self::AnySkipRelocation,
            _ => Self::Fixed(s.to_string()),
        }
    }

    /// The JSON spelling.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Any => "any",
            Self::AnySkipRelocation => "any_skip_relocation",
            Self::Fixed(path) => path,
        }
    }

    /// Whether the bottle can be poured into any cellar.
    #[must_use]
    pub const fn is_relocatable(&self) -> bool {
        matches!(self, Self::Any | Self::AnySkipRelocation)
    }

    /// The `cellar:` argument of a bottle block line, `None` when implied.
    #[must_use]
    pub fn block_value(&self) -> Option<String> {
        match self {
            Self::Any | Self::AnySkipRelocation => Some(format!(":{}", self.as_str())),
            Self::Fixed(path) if path.is_empty() || is_default_cellar(path) => None,
            Self::Fixed(path) => Some(format!("\"{path}\"")),
        }
    }
}

impl fmt::Display for CellarMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CellarMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CellarMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Self::parse(&String::deserialize(deserializer)?))
    }
}

/// One platform's bottle checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    /// Platform the bottle was built for.
    pub tag: PlatformTag,
    /// sha256 hex digest of the compressed archive.
    pub digest: String,
    /// Where the bottle may be poured.
    pub cellar: CellarMode,
}

impl ChecksumEntry {
    /// Whether two entries describe the same artifact.
    #[must_use]
    pub fn same_artifact(&self, other: &Self) -> bool {
        self.digest == other.digest && self.cellar == other.cellar
    }
}

/// Bottle metadata for one package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottleSpecification {
    /// Root URL bottles are downloaded from.
    pub root_url: String,
    /// Download strategy named next to the root URL.
    pub root_url_using: Option<String>,
    /// Prefix the bottles were built for.
    pub prefix: Option<String>,
    /// Rebuild counter for this version.
    pub rebuild: u32,
    checksums: BTreeMap<PlatformTag, ChecksumEntry>,
}

impl BottleSpecification {
    /// An empty specification downloading from `root_url`.
    #[must_use]
    pub fn new(root_url: impl Into<String>) -> Self {
        Self {
            root_url: root_url.into(),
            root_url_using: None,
            prefix: None,
            rebuild: 0,
            checksums: BTreeMap::new(),
        }
    }

    /// Sets the rebuild counter.
    #[must_use]
    pub const fn with_rebuild(mut self, rebuild: u32) -> Self {
        self.rebuild = rebuild;
        self
    }

    /// Sets the download strategy.
    #[must_use]
    pub fn with_root_url_using(mut self, using: Option<String>) -> Self {
        self.root_url_using = using.filter(|u| !u.is_empty());
        self
    }

    /// Adds a platform checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag already has a checksum or the digest is not
    /// a sha256 hex string.
    pub fn add_checksum(&mut self, tag: PlatformTag, digest: impl Into<String>, cellar: CellarMode) -> Result<()> {
        let digest = digest.into();
        validate_sha256(&digest)?;
        if self.checksums.contains_key(&tag) {
            return Err(Error::duplicate_tag(tag.as_str()));
        }
        self.checksums.insert(tag.clone(), ChecksumEntry { tag, digest, cellar });
        Ok(())
    }

    /// Adds a checksum unless an identical one is already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag already has a different checksum.
    pub fn merge_checksum(&mut self, entry: ChecksumEntry) -> Result<()> {
        match self.checksums.get(&entry.tag) {
            Some(existing) if existing.same_artifact(&entry) => Ok(()),
            _ => self.add_checksum(entry.tag, entry.digest, entry.cellar),
        }
    }

    /// The checksum for `tag`, falling back to the `all` entry.
    #[must_use]
    pub fn checksum_for(&self, tag: &PlatformTag) -> Option<&ChecksumEntry> {
        self.checksums
            .get(tag)
            .or_else(|| self.checksums.get(&PlatformTag::all()))
    }

    /// The checksum recorded for exactly `tag`.
    #[must_use]
    pub fn exact_checksum(&self, tag: &PlatformTag) -> Option<&ChecksumEntry> {
        self.checksums.get(tag)
    }

    /// Checksums in bottle block order.
    #[must_use]
    pub fn checksums(&self) -> Vec<&ChecksumEntry> {
        let mut entries: Vec<&ChecksumEntry> = self.checksums.values().collect();
        entries.sort_by(|a, b| {
            b.tag
                .display_priority()
                .cmp(&a.tag.display_priority())
                .then_with(|| b.tag.cmp(&a.tag))
        });
        entries
    }

    /// Tags with a checksum.
    pub fn tags(&self) -> impl Iterator<Item = &PlatformTag> {
        self.checksums.keys()
    }

    /// Whether no checksum has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checksums.is_empty()
    }

    /// Number of checksums.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checksums.len()
    }
}
