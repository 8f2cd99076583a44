//! Bottler configuration.
//!
//! Resolution order, later wins:
//! 1. Built-in defaults for the host
//! 2. `bottler.toml` (or the file given with `--config`)
//! 3. `BOTTLER_*` environment variables
//! 4. Command-line flags (applied by the CLI)

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default configuration file name looked up in the working directory.
pub const CONFIG_FILE: &str = "bottler.toml";

/// Environment variable holding the registry token.
pub const TOKEN_ENV: &str = "BOTTLER_REGISTRY_TOKEN";

/// Environment variable holding the registry user.
pub const USER_ENV: &str = "BOTTLER_REGISTRY_USER";

/// Root URL bottles are downloaded from when a definition sets none.
pub const DEFAULT_ROOT_URL: &str = "https://ghcr.io/v2/homebrew/core";

/// Which archiver produces the tar stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiverKind {
    /// External GNU tar.
    #[default]
    GnuTar,
    /// In-process tar writer.
    Native,
}

impl FromStr for ArchiverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gnu-tar" | "gnutar" | "tar" => Ok(Self::GnuTar),
            "native" => Ok(Self::Native),
            other => Err(Error::config(
                format!("Unknown archiver: {other}"),
                "Valid archivers: gnu-tar, native",
            )),
        }
    }
}

/// Registry settings for publishing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry host name.
    pub domain: String,
    /// User name for pushing.
    pub user: Option<String>,
    /// Token for pushing.
    #[serde(deserialize_with = "deserialize_secret")]
    pub token: Option<SecretString>,
    /// Registry copy tool.
    pub tool: String,
    /// Directory holding the OCI JSON schemas.
    pub schema_dir: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            domain: "ghcr.io".to_string(),
            user: None,
            token: None,
            tool: "skopeo".to_string(),
            schema_dir: None,
        }
    }
}

impl RegistryConfig {
    /// Returns the push credentials.
    ///
    /// # Errors
    ///
    /// Returns a usage error if either the user or the token is missing.
    pub fn credentials(&self) -> Result<(&str, &SecretString)> {
        match (&self.user, &self.token) {
            (Some(user), Some(token)) if !user.is_empty() => Ok((user, token)),
            _ => Err(Error::usage(format!(
                "{USER_ENV} and {TOKEN_ENV} must be set to upload"
            ))),
        }
    }

    /// The schema directory, defaulting to the user cache.
    #[must_use]
    pub fn schema_dir(&self) -> PathBuf {
        self.schema_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("bottler")
                .join("oci-schemas")
        })
    }
}

/// Values published for Linux bottles, whose tags carry no OS version.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinuxDefaults {
    /// OS version annotation.
    pub os_version: String,
    /// glibc version annotation.
    pub glibc_version: String,
    /// CPU family annotation.
    pub cpu_family: String,
}

impl Default for LinuxDefaults {
    fn default() -> Self {
        Self {
            os_version: "Ubuntu 16.04".to_string(),
            glibc_version: "2.23".to_string(),
            cpu_family: "core2".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BottlerConfig {
    /// Installation prefix.
    pub prefix: Option<PathBuf>,
    /// Cellar holding installed kegs.
    pub cellar: Option<PathBuf>,
    /// Package manager repository.
    pub repository: Option<PathBuf>,
    /// Package manager library directory.
    pub library: Option<PathBuf>,
    /// Directory holding keg lock files.
    pub locks_dir: Option<PathBuf>,
    /// Bottle tag of the host, detected when unset.
    pub tag: Option<String>,
    /// Root URL treated as the default in bottle blocks.
    pub default_root_url: String,
    /// Archiver implementation.
    pub archiver: ArchiverKind,
    /// Registry settings.
    pub registry: RegistryConfig,
    /// Linux publishing defaults.
    pub linux: LinuxDefaults,
}

impl Default for BottlerConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            cellar: None,
            repository: None,
            library: None,
            locks_dir: None,
            tag: None,
            default_root_url: DEFAULT_ROOT_URL.to_string(),
            archiver: ArchiverKind::default(),
            registry: RegistryConfig::default(),
            linux: LinuxDefaults::default(),
        }
    }
}

/// Resolved installation paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    /// Installation prefix.
    pub prefix: PathBuf,
    /// Cellar.
    pub cellar: PathBuf,
    /// Repository.
    pub repository: PathBuf,
    /// Library.
    pub library: PathBuf,
    /// Lock directory.
    pub locks_dir: PathBuf,
}

impl BottlerConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Loads configuration from `path`, or from `bottler.toml` in the working
    /// directory when present, then applies the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file is missing or any file is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|e| Error::io_at(path, e))?;
                Self::from_toml_str(&content)?
            }
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if default_path.is_file() {
                    let content = std::fs::read_to_string(default_path)
                        .map_err(|e| Error::io_at(default_path, e))?;
                    Self::from_toml_str(&content)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `BOTTLER_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if `BOTTLER_ARCHIVER` names an unknown archiver.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("BOTTLER_PREFIX") {
            self.prefix = Some(v.into());
        }
        if let Some(v) = get("BOTTLER_CELLAR") {
            self.cellar = Some(v.into());
        }
        if let Some(v) = get("BOTTLER_REPOSITORY") {
            self.repository = Some(v.into());
        }
        if let Some(v) = get("BOTTLER_LIBRARY") {
            self.library = Some(v.into());
        }
        if let Some(v) = get("BOTTLER_LOCKS") {
            self.locks_dir = Some(v.into());
        }
        if let Some(v) = get("BOTTLER_TAG") {
            self.tag = Some(v);
        }
        if let Some(v) = get("BOTTLER_ARCHIVER") {
            self.archiver = v.parse()?;
        }
        if let Some(v) = get(USER_ENV) {
            self.registry.user = Some(v);
        }
        if let Some(v) = get(TOKEN_ENV) {
            self.registry.token = Some(SecretString::from(v));
        }
        if let Some(v) = get("BOTTLER_REGISTRY_TOOL") {
            self.registry.tool = v;
        }
        if let Some(v) = get("BOTTLER_SCHEMA_DIR") {
            self.registry.schema_dir = Some(v.into());
        }
        Ok(())
    }

    /// Resolves installation paths, filling host defaults.
    #[must_use]
    pub fn install_paths(&self) -> InstallPaths {
        let prefix = self
            .prefix
            .clone()
            .unwrap_or_else(|| PathBuf::from(host_default_prefix()));
        let cellar = self.cellar.clone().unwrap_or_else(|| prefix.join("Cellar"));
        let repository = self.repository.clone().unwrap_or_else(|| {
            if cfg!(target_os = "macos") && cfg!(target_arch = "x86_64") {
                prefix.join("Homebrew")
            } else {
                prefix.clone()
            }
        });
        let library = self
            .library
            .clone()
            .unwrap_or_else(|| repository.join("Library"));
        let locks_dir = self
            .locks_dir
            .clone()
            .unwrap_or_else(|| prefix.join("var").join("homebrew").join("locks"));

        InstallPaths {
            prefix,
            cellar,
            repository,
            library,
            locks_dir,
        }
    }
}

/// The prefix a package manager uses on this host by default.
#[must_use]
pub const fn host_default_prefix() -> &'static str {
    if cfg!(target_os = "macos") {
        if cfg!(target_arch = "aarch64") {
            "/opt/homebrew"
        } else {
            "/usr/local"
        }
    } else {
        "/home/linuxbrew/.linuxbrew"
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = BottlerConfig::default();
        assert_eq!(config.default_root_url, DEFAULT_ROOT_URL);
        assert_eq!(config.archiver, ArchiverKind::GnuTar);
        assert_eq!(config.registry.domain, "ghcr.io");
        assert_eq!(config.registry.tool, "skopeo");
        assert_eq!(config.linux.os_version, "Ubuntu 16.04");
        assert_eq!(config.linux.glibc_version, "2.23");
        assert_eq!(config.linux.cpu_family, "core2");
    }

    #[test]
    fn test_from_toml() {
        let config = BottlerConfig::from_toml_str(
            r#"
prefix = "/opt/custom"
archiver = "native"

[registry]
user = "bot"
token = "s3cret"

[linux]
glibc_version = "2.35"
"#,
        )
        .unwrap();

        assert_eq!(config.prefix, Some(PathBuf::from("/opt/custom")));
        assert_eq!(config.archiver, ArchiverKind::Native);
        assert_eq!(config.registry.user.as_deref(), Some("bot"));
        assert_eq!(
            config.registry.token.as_ref().unwrap().expose_secret(),
            "s3cret"
        );
        assert_eq!(config.linux.glibc_version, "2.35");
        assert_eq!(config.linux.cpu_family, "core2");
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let config = BottlerConfig::from_toml_str("[registry]\ntoken = \"s3cret\"\n").unwrap();
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(BottlerConfig::from_toml_str("archiver = \"zip\"").is_err());
    }

    #[test]
    fn test_apply_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BOTTLER_PREFIX", "/env/prefix"),
            ("BOTTLER_ARCHIVER", "native"),
            (USER_ENV, "ci"),
            (TOKEN_ENV, "tok"),
            ("BOTTLER_CELLAR", ""),
        ]
        .into_iter()
        .collect();

        let mut config = BottlerConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.prefix, Some(PathBuf::from("/env/prefix")));
        assert_eq!(config.cellar, None);
        assert_eq!(config.archiver, ArchiverKind::Native);
        let (user, token) = config.registry.credentials().unwrap();
        assert_eq!(user, "ci");
        assert_eq!(token.expose_secret(), "tok");
    }

    #[test]
    fn test_apply_env_bad_archiver() {
        let mut config = BottlerConfig::default();
        let result = config.apply_env(|k| (k == "BOTTLER_ARCHIVER").then(|| "zip".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_credentials_is_usage_error() {
        let config = BottlerConfig::default();
        let err = config.registry.credentials().unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_install_paths_from_prefix() {
        let config = BottlerConfig {
            prefix: Some(PathBuf::from("/p")),
            repository: Some(PathBuf::from("/p/repo")),
            ..BottlerConfig::default()
        };
        let paths = config.install_paths();
        assert_eq!(paths.cellar, PathBuf::from("/p/Cellar"));
        assert_eq!(paths.library, PathBuf::from("/p/repo/Library"));
        assert_eq!(paths.locks_dir, PathBuf::from("/p/var/homebrew/locks"));
    }

    #[test]
    fn test_load_explicit_missing_file() {
        assert!(BottlerConfig::load(Some(Path::new("/nonexistent/bottler.toml"))).is_err());
    }
}
