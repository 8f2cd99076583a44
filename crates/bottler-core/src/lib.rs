//! Shared building blocks for bottler.
//!
//! This crate provides the pieces every stage of the bottling pipeline uses:
//!
//! - [`digest`] - sha256 content digests of files, buffers and gzip payloads
//! - [`platform`] - bottle platform tags and their OCI platform mapping
//! - [`config`] - layered configuration (file, environment, flags)
//! - [`tool`] - the [`ExternalTool`] strategy for archiver/git/registry binaries
//! - [`interrupt`] - the cooperative Ctrl-C flag
//! - [`fs`] - atomic file replacement
//!
//! # Example
//!
//! ```rust,ignore
//! use bottler_core::{PlatformTag, digest};
//! use std::path::Path;
//!
//! let tag = PlatformTag::parse("arm64_sonoma")?;
//! assert_eq!(tag.default_cellar().as_deref(), Some("/opt/homebrew/Cellar"));
//!
//! let sha = digest::sha256_file(Path::new("foo--1.0.arm64_sonoma.bottle.tar.gz"))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod config;
pub mod digest;
pub mod error;
pub mod fs;
pub mod interrupt;
pub mod platform;
pub mod tool;

pub use config::{ArchiverKind, BottlerConfig, InstallPaths, LinuxDefaults, RegistryConfig};
pub use error::{Error, Result};
pub use interrupt::Interrupt;
pub use platform::{OsFamily, PlatformTag};
pub use tool::{ExternalTool, SystemTool, ToolArg, ToolOutput};

/// Whether an operation should only report what it would do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DryRun {
    /// Perform the operation.
    #[default]
    No,
    /// Print the equivalent commands instead.
    Yes,
}

impl DryRun {
    /// Whether this is a dry run.
    #[must_use]
    pub const fn is_dry_run(self) -> bool {
        matches!(self, Self::Yes)
    }
}

impl From<bool> for DryRun {
    fn from(dry_run: bool) -> Self {
        if dry_run { Self::Yes } else { Self::No }
    }
}

/// Whether subprocess failures abort the run or are demoted to warnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnError {
    /// Fail the item.
    #[default]
    Fail,
    /// Log a warning and skip the item.
    Warn,
}

impl From<bool> for OnError {
    fn from(warn_on_error: bool) -> Self {
        if warn_on_error { Self::Warn } else { Self::Fail }
    }
}
