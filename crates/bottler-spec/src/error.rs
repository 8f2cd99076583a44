//! Error types for bottle specifications and merging.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for specification operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building, parsing or merging bottle specifications.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A second checksum was added for a tag that already has one.
    #[error("Duplicate checksum for tag {tag}")]
    #[diagnostic(code(bottler::spec::duplicate_tag))]
    DuplicateTag {
        /// The repeated tag.
        tag: String,
    },

    /// Fragments disagree on a value that must be shared.
    #[error("Conflicting bottle fragments for {name}: {message}")]
    #[diagnostic(
        code(bottler::spec::merge_conflict),
        help("Rebuild the conflicting platforms so every fragment agrees")
    )]
    MergeConflict {
        /// Package full name.
        name: String,
        /// What differs.
        message: String,
    },

    /// `--keep-old` found differences against the published specification.
    #[error("`--keep-old` was passed but there are changes in:\n{}", mismatches.join("\n"))]
    #[diagnostic(code(bottler::spec::keep_old_mismatch))]
    KeepOldMismatch {
        /// One line per differing field.
        mismatches: Vec<String>,
    },

    /// A bottle block or definition file could not be understood.
    #[error("Failed to parse {what}: {message}")]
    #[diagnostic(code(bottler::spec::parse))]
    Parse {
        /// What was being parsed.
        what: String,
        /// Parser message.
        message: String,
    },

    /// A bottle JSON document could not be read.
    #[error("Invalid bottle JSON {}: {message}", path.display())]
    #[diagnostic(code(bottler::spec::json))]
    InvalidJson {
        /// The offending file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The git collaborator failed.
    #[error("Commit failed: {message}")]
    #[diagnostic(code(bottler::spec::commit))]
    Commit {
        /// What went wrong.
        message: String,
    },

    /// Error from the core crate.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] bottler_core::Error),

    /// Wrapped I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(bottler::spec::io))]
    Io(#[from] std::io::Error),

    /// Wrapped JSON error.
    #[error("JSON error: {0}")]
    #[diagnostic(code(bottler::spec::json))]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a duplicate tag error.
    #[must_use]
    pub fn duplicate_tag(tag: impl Into<String>) -> Self {
        Self::DuplicateTag { tag: tag.into() }
    }

    /// Create a merge conflict error.
    #[must_use]
    pub fn merge_conflict(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MergeConflict {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a parse error.
    #[must_use]
    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Create a commit error.
    #[must_use]
    pub fn commit(message: impl Into<String>) -> Self {
        Self::Commit {
            message: message.into(),
        }
    }
}
