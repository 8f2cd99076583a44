//! Error types for bottling.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bottling operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while relocating, archiving or bottling a keg.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Another process holds the keg lock.
    #[error("{name} is locked by another process")]
    #[diagnostic(
        code(bottler::keg::locked),
        help("Wait for the other operation to finish or remove the stale lock at {}", path.display())
    )]
    Locked {
        /// Package name.
        name: String,
        /// Lock file.
        path: PathBuf,
    },

    /// Relocation could not be set up or a file could not be rewritten.
    #[error("Relocation failed for {}: {message}", path.display())]
    #[diagnostic(code(bottler::keg::relocation))]
    Relocation {
        /// File or directory involved.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The restore pass left files in their relocated state.
    #[error("Failed to restore {} file(s) in {}: {}", failures.len(), keg.display(), failures.join(", "))]
    #[diagnostic(
        code(bottler::keg::restore),
        help("Reinstall the package from source to recover the installation")
    )]
    Restore {
        /// Keg root.
        keg: PathBuf,
        /// Files that could not be restored, with reasons.
        failures: Vec<String>,
    },

    /// The install receipt is missing or unreadable.
    #[error("Invalid install receipt {}: {message}", path.display())]
    #[diagnostic(code(bottler::keg::receipt))]
    Receipt {
        /// Receipt path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// Building the archive failed.
    #[error("Archive error: {message}")]
    #[diagnostic(code(bottler::keg::archive))]
    Archive {
        /// What went wrong.
        message: String,
    },

    /// The keg references the package manager repository.
    #[error("Bottle contains non-relocatable reference to {reference}!")]
    #[diagnostic(
        code(bottler::keg::non_relocatable),
        help("Remove references to the repository from the installed files")
    )]
    NonRelocatable {
        /// The referenced path.
        reference: String,
    },

    /// `--keep-old` found a different root URL, prefix or rebuild.
    #[error("`--keep-old` was passed but there are changes in:\n{}", mismatches.join("\n"))]
    #[diagnostic(code(bottler::keg::keep_old_mismatch))]
    KeepOldMismatch {
        /// One line per differing field.
        mismatches: Vec<String>,
    },

    /// A package descriptor could not be loaded.
    #[error("Invalid package descriptor {}: {message}", path.display())]
    #[diagnostic(code(bottler::keg::descriptor))]
    Descriptor {
        /// Descriptor path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// Error from the core crate.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] bottler_core::Error),

    /// Error from the specification crate.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Spec(#[from] bottler_spec::Error),

    /// Wrapped I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(bottler::keg::io))]
    Io(#[from] std::io::Error),

    /// Wrapped JSON error.
    #[error("JSON error: {0}")]
    #[diagnostic(code(bottler::keg::json))]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a relocation error.
    #[must_use]
    pub fn relocation(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Relocation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a receipt error.
    #[must_use]
    pub fn receipt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Receipt {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an archive error.
    #[must_use]
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive {
            message: message.into(),
        }
    }

    /// Create a descriptor error.
    #[must_use]
    pub fn descriptor(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Descriptor {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the path that caused it.
    #[must_use]
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Core(bottler_core::Error::io_at(path, source))
    }

    /// Whether the run was interrupted.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_interrupted())
    }
}
