//! Committing rewritten definition files.

use crate::error::{Error, Result};
use bottler_core::{ExternalTool, SystemTool, ToolArg};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

static AUTHOR: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"^\s*(.+?)\s*<([^<>\s]+@[^<>\s]+)>\s*$"));

/// Whether a bottle block was added or replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockChange {
    /// The definition had no bottle block.
    Add,
    /// An existing bottle block was replaced.
    Update,
}

impl BlockChange {
    /// `add` or `update`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
        }
    }
}

/// A `Name <email>` identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    /// Display name.
    pub name: String,
    /// E-mail address.
    pub email: String,
}

impl Author {
    /// Parses `Name <email>`.
    ///
    /// # Errors
    ///
    /// Returns a usage error when the string is not in that form.
    pub fn parse(s: &str) -> Result<Self> {
        let caps = AUTHOR
            .captures(s)
            .ok_or_else(|| bottler_core::Error::usage(format!("Invalid committer, expected `Name <email>`: {s}")))?;
        Ok(Self {
            name: caps[1].to_string(),
            email: caps[2].to_string(),
        })
    }
}

/// The commit message for a rewritten bottle block.
#[must_use]
pub fn commit_message(full_name: &str, change: BlockChange, pkg_version: &str) -> String {
    let short_name = full_name.rsplit('/').next().unwrap_or(full_name);
    format!("{short_name}: {} {pkg_version} bottle.", change.as_str())
}

/// Records a changed file in version control.
pub trait Committer {
    /// Commits `path` with `message`.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    fn commit(&self, path: &Path, message: &str) -> Result<()>;
}

/// Commits with the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCommitter<T = SystemTool> {
    git: T,
    committer: Option<Author>,
}

impl GitCommitter<SystemTool> {
    /// Uses `git` from `PATH`.
    #[must_use]
    pub fn new(committer: Option<Author>) -> Self {
        Self::with_tool(SystemTool::new("git"), committer)
    }
}

impl<T: ExternalTool> GitCommitter<T> {
    /// Uses the given git tool.
    #[must_use]
    pub const fn with_tool(git: T, committer: Option<Author>) -> Self {
        Self { git, committer }
    }
}

impl<T: ExternalTool> Committer for GitCommitter<T> {
    fn commit(&self, path: &Path, message: &str) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| Error::commit(format!("{} has no parent directory", path.display())))?;
        let file = path.file_name().map_or_else(|| path.into(), |f| ToolArg::from(Path::new(f)));

        let args: Vec<ToolArg> = vec![
            "commit".into(),
            "--no-edit".into(),
            "--verbose".into(),
            format!("--message={message}").into(),
            "--".into(),
            file,
        ];
        let env: Vec<(String, String)> = self
            .committer
            .iter()
            .flat_map(|a| {
                [
                    ("GIT_COMMITTER_NAME".to_string(), a.name.clone()),
                    ("GIT_COMMITTER_EMAIL".to_string(), a.email.clone()),
                ]
            })
            .collect();

        info!(path = %path.display(), %message, "Committing");
        self.git
            .run(&args, Some(dir), &env)
            .map_err(|e| Error::commit(e.to_string()))?;
        Ok(())
    }
}
