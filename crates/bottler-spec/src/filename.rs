//! Bottle file names.

use bottler_core::PlatformTag;
use std::fmt;
use std::fmt::Write as _;

/// Name of one bottle archive and its JSON sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottleFilename {
    /// Package name (short, without tap).
    pub name: String,
    /// Package version including revision (e.g., `1.0_1`).
    pub version: String,
    /// Platform tag.
    pub tag: PlatformTag,
    /// Rebuild counter.
    pub rebuild: u32,
}

impl BottleFilename {
    /// Creates a file name.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>, tag: PlatformTag, rebuild: u32) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tag,
            rebuild,
        }
    }

    fn rebuild_suffix(&self) -> String {
        if self.rebuild > 0 {
            format!(".{}", self.rebuild)
        } else {
            String::new()
        }
    }

    /// `.<tag>.bottle[.<rebuild>].tar.gz`
    #[must_use]
    pub fn extname(&self) -> String {
        format!(".{}.bottle{}.tar.gz", self.tag, self.rebuild_suffix())
    }

    /// File name of the JSON fragment.
    #[must_use]
    pub fn json(&self) -> String {
        format!(
            "{}--{}.{}.bottle{}.json",
            self.name,
            self.version,
            self.tag,
            self.rebuild_suffix()
        )
    }

    /// Percent-encoded download name (single dash between name and version).
    #[must_use]
    pub fn url_encode(&self) -> String {
        percent_encode(&format!("{}-{}{}", self.name, self.version, self.extname()))
    }

    /// The uncompressed tar name used inside the gzip header.
    #[must_use]
    pub fn tar_name(&self) -> String {
        format!("{}-bottle.tar", self.name)
    }
}

impl fmt::Display for BottleFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}--{}{}", self.name, self.version, self.extname())
    }
}

/// `1.0`, `1.0-1`, or with a tag `1.0.big_sur.1`.
#[must_use]
pub fn version_rebuild(version: &str, rebuild: u32, tag: Option<&PlatformTag>) -> String {
    let tag_part = tag.map(|t| format!(".{t}")).unwrap_or_default();
    let rebuild_part = match (rebuild, tag) {
        (0, _) => String::new(),
        (n, Some(_)) => format!(".{n}"),
        (n, None) => format!("-{n}"),
    };
    format!("{version}{tag_part}{rebuild_part}")
}

/// Encodes every byte outside `A-Z a-z 0-9 - _ . ~` as `%XX`.
#[must_use]
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}
