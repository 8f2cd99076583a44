//! Registry naming and the registry-copy tool.

use crate::error::{Error, Result};
use bottler_core::config::TOKEN_ENV;
use bottler_core::{ExternalTool, ToolArg, ToolOutput};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static NAME_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"^[\w-]+$"));
static UNKNOWN_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"(name|manifest) unknown"));
static INVALID_TAG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"[+#~]"));

/// The organisation and repository a root URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryTarget {
    /// Registry host.
    pub domain: String,
    /// Organisation, as written.
    pub org: String,
    /// Repository, always `homebrew-` prefixed.
    pub repo: String,
}

impl RegistryTarget {
    /// Parses `https://<domain>/v2/<org>/<repo>` or `docker://<domain>/<org>/<repo>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRootUrl`] for anything else.
    pub fn from_root_url(root_url: &str, domain: &str) -> Result<Self> {
        let invalid = || Error::InvalidRootUrl {
            url: root_url.to_string(),
            domain: domain.to_string(),
        };
        let url = Url::parse(root_url).map_err(|_| invalid())?;
        if url.host_str() != Some(domain) {
            return Err(invalid());
        }
        let mut segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        match url.scheme() {
            "https" if segments.first() == Some(&"v2") => {
                segments.remove(0);
            }
            "docker" => {}
            _ => return Err(invalid()),
        }
        let (Some(org), Some(repo)) = (segments.first().copied(), segments.get(1).copied()) else {
            return Err(invalid());
        };
        if !NAME_SEGMENT.is_match(org) || !NAME_SEGMENT.is_match(repo) {
            return Err(invalid());
        }
        let repo = if repo.starts_with("homebrew-") {
            repo.to_string()
        } else {
            format!("homebrew-{repo}")
        };
        Ok(Self {
            domain: domain.to_string(),
            org: org.to_string(),
            repo,
        })
    }

    /// `https://<domain>/v2/<org>/<repo>` in canonical form.
    #[must_use]
    pub fn root_url(&self) -> String {
        root_url(&format!("https://{}/v2/", self.domain), &self.org, &self.repo)
    }

    /// `docker://<domain>/<org>/<repo>/<image>:<tag>`.
    #[must_use]
    pub fn image_uri(&self, image_name: &str, image_tag: &str) -> String {
        format!(
            "{}/{image_name}:{image_tag}",
            root_url(&format!("docker://{}/", self.domain), &self.org, &self.repo)
        )
    }

    /// Web page of an uploaded package.
    #[must_use]
    pub fn package_url(&self, image_name: &str) -> String {
        format!(
            "https://github.com/orgs/{}/packages/container/package/{}/{image_name}",
            self.org,
            repo_without_prefix(&self.repo)
        )
    }

    /// `<org>/<repo>` used for source links.
    #[must_use]
    pub fn source_repo(&self) -> String {
        if self.org.eq_ignore_ascii_case("linuxbrew") && self.repo == "homebrew-core" {
            "Homebrew/linuxbrew-core".to_string()
        } else {
            format!("{}/{}", self.org, self.repo)
        }
    }
}

/// Drops the redundant `homebrew-` prefix.
#[must_use]
pub fn repo_without_prefix(repo: &str) -> &str {
    repo.strip_prefix("homebrew-").unwrap_or(repo)
}

/// `<prefix><org>/<repo>` with a lower-cased org and a short repo.
#[must_use]
pub fn root_url(prefix: &str, org: &str, repo: &str) -> String {
    format!("{prefix}{}/{}", org.to_lowercase(), repo_without_prefix(repo))
}

/// Canonical root URL when `url` names a repository on `domain`.
#[must_use]
pub fn root_url_if_match(url: &str, domain: &str) -> Option<String> {
    RegistryTarget::from_root_url(url, domain)
        .ok()
        .map(|t| t.root_url())
}

/// Image name for a package: `@` becomes `/`, `+` becomes `x`.
#[must_use]
pub fn image_formula_name(name: &str) -> String {
    name.replace('@', "/").replace('+', "x")
}

/// Image tag for a version: `+`, `#` and `~` become `.`.
#[must_use]
pub fn image_version_rebuild(version_rebuild: &str) -> String {
    INVALID_TAG_CHARS.replace_all(version_rebuild, ".").into_owned()
}

/// What inspecting a remote image found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspection {
    /// The tag exists.
    Exists,
    /// The image or tag is unknown.
    Missing,
    /// Inspection failed for another reason.
    Failed {
        /// Captured standard error.
        stderr: String,
    },
}

/// Credential flag direction for a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFlag {
    /// `--creds`
    Both,
    /// `--src-creds`
    Source,
    /// `--dest-creds`
    Destination,
}

impl CredentialFlag {
    const fn flag(self) -> &'static str {
        match self {
            Self::Both => "--creds",
            Self::Source => "--src-creds",
            Self::Destination => "--dest-creds",
        }
    }
}

/// The registry-copy tool (`skopeo`) with push credentials.
pub struct RegistryTool<'a> {
    tool: &'a dyn ExternalTool,
    user: String,
    token: &'a SecretString,
}

impl<'a> RegistryTool<'a> {
    /// Wraps `tool` with credentials.
    #[must_use]
    pub fn new(tool: &'a dyn ExternalTool, user: impl Into<String>, token: &'a SecretString) -> Self {
        Self {
            tool,
            user: user.into(),
            token,
        }
    }

    fn credentials(&self, flag: CredentialFlag) -> ToolArg {
        ToolArg::secret(
            format!("{}={}:${TOKEN_ENV}", flag.flag(), self.user),
            format!("{}={}:{}", flag.flag(), self.user, self.token.expose_secret()),
        )
    }

    /// `inspect --raw <image>` arguments.
    #[must_use]
    pub fn inspect_args(&self, image_uri: &str) -> Vec<ToolArg> {
        vec![
            "inspect".into(),
            "--raw".into(),
            image_uri.into(),
            self.credentials(CredentialFlag::Both),
        ]
    }

    /// `copy --all <from> <to>` arguments.
    #[must_use]
    pub fn copy_args(&self, from: &str, to: &str, flag: CredentialFlag) -> Vec<ToolArg> {
        vec![
            "copy".into(),
            "--all".into(),
            from.into(),
            to.into(),
            self.credentials(flag),
        ]
    }

    /// The command line for `args` with the token replaced by its variable.
    #[must_use]
    pub fn command_line(&self, args: &[ToolArg]) -> String {
        self.tool.command_line(args)
    }

    /// Checks whether `image_uri` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool cannot be started.
    pub fn inspect(&self, image_uri: &str) -> Result<Inspection> {
        let output: ToolOutput = self.tool.invoke(&self.inspect_args(image_uri), None, &[])?;
        let inspection = if output.success {
            Inspection::Exists
        } else if UNKNOWN_IMAGE.is_match(&output.stderr) {
            Inspection::Missing
        } else {
            Inspection::Failed {
                stderr: output.stderr.trim().to_string(),
            }
        };
        debug!(image = image_uri, ?inspection, "Inspected image");
        Ok(inspection)
    }

    /// Copies an image between locations.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool fails.
    pub fn copy(&self, from: &str, to: &str, flag: CredentialFlag) -> Result<()> {
        self.tool.run(&self.copy_args(from, to, flag), None, &[])?;
        Ok(())
    }
}

/// `oci:<path>` transport reference.
#[must_use]
pub fn oci_reference(root: &Path) -> String {
    format!("oci:{}", root.display())
}
