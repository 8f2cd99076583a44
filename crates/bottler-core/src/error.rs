//! Error types shared by every bottler crate.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the core utilities.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A platform tag could not be parsed.
    #[error("Invalid platform tag: {tag}")]
    #[diagnostic(
        code(bottler::core::platform_tag),
        help("Use `all`, `<codename>`, `arm64_<codename>`, `<arch>_linux` or `<os>-<arch>`")
    )]
    InvalidPlatformTag {
        /// The offending tag string.
        tag: String,
    },

    /// A digest string was not a 64 character lowercase sha256 hex string.
    #[error("Invalid sha256 digest: {digest}")]
    #[diagnostic(code(bottler::core::digest))]
    InvalidDigest {
        /// The offending digest string.
        digest: String,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(bottler::core::config), help("{help}"))]
    Config {
        /// The error message.
        message: String,
        /// Help text for the user.
        help: String,
    },

    /// Invalid combination of options or missing credentials.
    #[error("Usage error: {message}")]
    #[diagnostic(code(bottler::core::usage))]
    Usage {
        /// The error message.
        message: String,
    },

    /// A required external tool is not installed.
    #[error("Tool `{tool}` was not found")]
    #[diagnostic(
        code(bottler::core::tool_missing),
        help("Install `{tool}` or point the configuration at an existing binary")
    )]
    ToolMissing {
        /// Tool name.
        tool: String,
    },

    /// An external tool exited unsuccessfully.
    #[error("`{tool} {args}` failed with {status}: {stderr}")]
    #[diagnostic(code(bottler::core::tool_failed))]
    ToolFailed {
        /// Tool name.
        tool: String,
        /// Space-joined arguments, with secrets redacted.
        args: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The run was interrupted by a signal.
    #[error("Interrupted")]
    #[diagnostic(code(bottler::core::interrupted))]
    Interrupted,

    /// I/O error with the path that caused it.
    #[error("I/O error on {}: {source}", path.display())]
    #[diagnostic(code(bottler::core::io))]
    IoAt {
        /// The path being operated on.
        path: PathBuf,
        /// The underlying source error.
        #[source]
        source: std::io::Error,
    },

    /// Wrapped I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(bottler::core::io))]
    Io(#[from] std::io::Error),

    /// Wrapped JSON error.
    #[error("JSON error: {0}")]
    #[diagnostic(code(bottler::core::json))]
    Json(#[from] serde_json::Error),

    /// Wrapped TOML parsing error.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(bottler::core::toml_parse))]
    TomlParse(#[from] toml::de::Error),
}

impl Error {
    /// Create an invalid platform tag error.
    #[must_use]
    pub fn invalid_platform_tag(tag: impl Into<String>) -> Self {
        Self::InvalidPlatformTag { tag: tag.into() }
    }

    /// Create an invalid digest error.
    #[must_use]
    pub fn invalid_digest(digest: impl Into<String>) -> Self {
        Self::InvalidDigest {
            digest: digest.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: help.into(),
        }
    }

    /// Create a usage error.
    #[must_use]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create a missing tool error.
    #[must_use]
    pub fn tool_missing(tool: impl Into<String>) -> Self {
        Self::ToolMissing { tool: tool.into() }
    }

    /// Wrap an I/O error with the path it happened on.
    #[must_use]
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Whether this error was raised before any filesystem mutation because of bad input.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self, Self::Usage { .. })
    }

    /// Whether this error is an interrupt.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_platform_tag_error() {
        let err = Error::invalid_platform_tag("pdp11_unix");
        assert!(err.to_string().contains("pdp11_unix"));
    }

    #[test]
    fn test_usage_error_is_usage() {
        let err = Error::usage("--write requires --merge");
        assert!(err.is_usage());
        assert!(!Error::Interrupted.is_usage());
    }

    #[test]
    fn test_tool_failed_display() {
        let err = Error::ToolFailed {
            tool: "tar".to_string(),
            args: "--create".to_string(),
            status: "exit status: 2".to_string(),
            stderr: "No such file".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tar --create"));
        assert!(msg.contains("No such file"));
    }

    #[test]
    fn test_io_at_carries_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::io_at("/tmp/keg", io_err);
        assert!(err.to_string().contains("/tmp/keg"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }
}
