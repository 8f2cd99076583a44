//! Platform tags and OCI platform mapping.
//!
//! Handles mapping between:
//! - bottle tags (e.g., "arm64_sonoma", "x86_64_linux", "big_sur", "all")
//! - the dash form used by fragments from other builders (e.g., "linux-x64", "macos-14-arm64")
//! - OCI platform fields (os/architecture, e.g., "darwin/arm64", "linux/amd64")

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Cellars that are implied by their tag and never written to a bottle block.
pub const DEFAULT_CELLARS: [&str; 3] = [
    "/usr/local/Cellar",
    "/opt/homebrew/Cellar",
    "/home/linuxbrew/.linuxbrew/Cellar",
];

/// Known macOS codenames and their marketing versions.
const MACOS_CODENAMES: [(&str, &str); 11] = [
    ("yosemite", "10.10"),
    ("el_capitan", "10.11"),
    ("sierra", "10.12"),
    ("high_sierra", "10.13"),
    ("mojave", "10.14"),
    ("catalina", "10.15"),
    ("big_sur", "11"),
    ("monterey", "12"),
    ("ventura", "13"),
    ("sonoma", "14"),
    ("sequoia", "15"),
];

/// Operating system family a tag targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OsFamily {
    /// macOS.
    Darwin,
    /// Linux.
    Linux,
    /// The synthetic `all` tag.
    Any,
}

impl OsFamily {
    /// OCI `os` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Darwin => "darwin",
            Self::Linux => "linux",
            Self::Any => "any",
        }
    }
}

/// A bottle platform tag.
///
/// Equality and ordering are on the tag text, so the tag can key a sorted map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformTag {
    raw: String,
    os: OsFamily,
    arch: Option<String>,
    macos_version: Option<String>,
}

impl PlatformTag {
    /// The tag used when every platform shares one bottle.
    pub const ALL: &'static str = "all";

    /// Parses a tag string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPlatformTag`] if the string fits none of the tag forms.
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim();
        let valid_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
        if raw.is_empty() || !raw.chars().all(valid_char) {
            return Err(Error::invalid_platform_tag(s));
        }

        if raw == Self::ALL {
            return Ok(Self::all());
        }

        if let Some(arch) = raw.strip_suffix("_linux") {
            if arch.is_empty() {
                return Err(Error::invalid_platform_tag(s));
            }
            return Ok(Self {
                raw: raw.to_string(),
                os: OsFamily::Linux,
                arch: Some(normalize_arch(arch)),
                macos_version: None,
            });
        }

        if let Some(codename) = raw.strip_prefix("arm64_") {
            let version = macos_version_for(codename).ok_or_else(|| Error::invalid_platform_tag(s))?;
            return Ok(Self::macos(raw, "arm64", version));
        }

        if let Some(version) = macos_version_for(raw) {
            return Ok(Self::macos(raw, "x86_64", version));
        }

        Self::parse_dashed(raw).ok_or_else(|| Error::invalid_platform_tag(s))
    }

    /// The synthetic tag shared by all platforms.
    #[must_use]
    pub fn all() -> Self {
        Self {
            raw: Self::ALL.to_string(),
            os: OsFamily::Any,
            arch: None,
            macos_version: None,
        }
    }

    /// Builds the Linux tag for an architecture (e.g., `x86_64_linux`).
    #[must_use]
    pub fn linux(arch: &str) -> Self {
        let arch = normalize_arch(arch);
        Self {
            raw: format!("{arch}_linux"),
            os: OsFamily::Linux,
            arch: Some(arch),
            macos_version: None,
        }
    }

    /// Builds the macOS tag for an architecture and a product version such as `14.5`.
    ///
    /// # Errors
    ///
    /// Returns an error if the version does not map to a known codename.
    pub fn for_macos_version(arch: &str, product_version: &str) -> Result<Self> {
        let arch = normalize_arch(arch);
        let mut parts = product_version.trim().split('.');
        let major = parts.next().unwrap_or_default();
        let key = if major == "10" {
            format!("10.{}", parts.next().unwrap_or_default())
        } else {
            major.to_string()
        };

        let (codename, version) = MACOS_CODENAMES
            .iter()
            .find(|(_, v)| *v == key)
            .ok_or_else(|| Error::invalid_platform_tag(format!("macos-{product_version}-{arch}")))?;

        let raw = if arch == "arm64" {
            format!("arm64_{codename}")
        } else {
            (*codename).to_string()
        };
        Ok(Self::macos(&raw, &arch, version))
    }

    /// The tag for the running host on Linux.
    #[must_use]
    pub fn host_linux() -> Self {
        Self::linux(std::env::consts::ARCH)
    }

    fn macos(raw: &str, arch: &str, version: &str) -> Self {
        Self {
            raw: raw.to_string(),
            os: OsFamily::Darwin,
            arch: Some(arch.to_string()),
            macos_version: Some(version.to_string()),
        }
    }

    fn parse_dashed(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split('-').collect();
        let (os, version, arch) = match parts.as_slice() {
            [os, arch] => (*os, None, *arch),
            [os, version, arch] => (*os, Some(*version), *arch),
            _ => return None,
        };
        if arch.is_empty() {
            return None;
        }

        let os = match os.to_lowercase().as_str() {
            "macos" | "darwin" | "osx" => OsFamily::Darwin,
            "linux" => OsFamily::Linux,
            _ => return None,
        };
        let macos_version = version
            .filter(|_| os == OsFamily::Darwin)
            .map(str::to_string);

        Some(Self {
            raw: raw.to_string(),
            os,
            arch: Some(normalize_arch(arch)),
            macos_version,
        })
    }

    /// The tag text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this is the synthetic `all` tag.
    #[must_use]
    pub fn is_all(&self) -> bool {
        self.os == OsFamily::Any
    }

    /// Operating system family.
    #[must_use]
    pub const fn os(&self) -> OsFamily {
        self.os
    }

    /// CPU architecture (`x86_64`, `arm64`, ...), `None` for `all`.
    #[must_use]
    pub fn arch(&self) -> Option<&str> {
        self.arch.as_deref()
    }

    /// OS version as published in image platforms (e.g., `macOS 14`).
    ///
    /// Linux tags carry no version; the publisher falls back to configuration.
    #[must_use]
    pub fn os_version(&self) -> Option<String> {
        self.macos_version.as_ref().map(|v| format!("macOS {v}"))
    }

    /// Bare macOS version (e.g., `10.15`, `14`), `None` off macOS.
    #[must_use]
    pub fn macos_version(&self) -> Option<&str> {
        self.macos_version.as_deref()
    }

    /// Key ordering tags the way bottle blocks list them: newest macOS first,
    /// arm64 before Intel, everything else last.
    #[must_use]
    pub fn display_priority(&self) -> (u8, Vec<u32>) {
        match self.macos_version() {
            Some(version) => {
                let priority = if self.arch() == Some("arm64") { 2 } else { 1 };
                let parts = version
                    .split('.')
                    .map(|p| p.parse::<u32>().unwrap_or(0))
                    .collect();
                (priority, parts)
            }
            None => (0, Vec::new()),
        }
    }

    /// The prefix a bottle for this tag installs into by default.
    #[must_use]
    pub fn default_prefix(&self) -> Option<&'static str> {
        match (self.os, self.arch()) {
            (OsFamily::Darwin, Some("arm64")) => Some("/opt/homebrew"),
            (OsFamily::Darwin, _) => Some("/usr/local"),
            (OsFamily::Linux, _) => Some("/home/linuxbrew/.linuxbrew"),
            (OsFamily::Any, _) => None,
        }
    }

    /// The cellar a bottle for this tag installs into by default.
    #[must_use]
    pub fn default_cellar(&self) -> Option<String> {
        self.default_prefix().map(|p| format!("{p}/Cellar"))
    }

    /// OCI `architecture` value for this tag.
    #[must_use]
    pub fn oci_arch(&self) -> Option<&str> {
        self.arch().map(oci_arch)
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PlatformTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for PlatformTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for PlatformTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn macos_version_for(codename: &str) -> Option<&'static str> {
    MACOS_CODENAMES
        .iter()
        .find(|(name, _)| *name == codename)
        .map(|(_, version)| *version)
}

/// Normalizes architecture spellings.
///
/// - "x64", "amd64" -> "x86_64"
/// - "aarch64", "arm" -> "arm64"
#[must_use]
pub fn normalize_arch(arch: &str) -> String {
    match arch.to_lowercase().as_str() {
        "x64" | "amd64" | "intel" => "x86_64".to_string(),
        "aarch64" | "arm" => "arm64".to_string(),
        other => other.to_string(),
    }
}

/// Maps an architecture to its OCI spelling.
#[must_use]
pub fn oci_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        other => other,
    }
}

/// Maps the `built_on.os` value of a receipt to an OCI `os` value.
#[must_use]
pub fn oci_os(built_on_os: &str) -> Option<&'static str> {
    match built_on_os {
        "Linux" => Some("linux"),
        "Macintosh" => Some("darwin"),
        _ => None,
    }
}

/// Whether a cellar is implied by the tag and needs no annotation.
#[must_use]
pub fn is_default_cellar(cellar: &str) -> bool {
    DEFAULT_CELLARS.contains(&cellar)
}
