//! Error types for OCI publishing.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for publishing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or publishing bottle images.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The bottle root URL does not name a registry repository.
    #[error("Root URL is not a registry repository: {url}")]
    #[diagnostic(
        code(bottler::oci::root_url),
        help("Use https://{domain}/v2/<org>/<repo> or docker://{domain}/<org>/<repo>")
    )]
    InvalidRootUrl {
        /// The rejected URL.
        url: String,
        /// Expected registry host.
        domain: String,
    },

    /// A document failed schema validation.
    #[error("{schema} JSON schema validation failed!\n{}\n{document}", errors.join("\n"))]
    #[diagnostic(code(bottler::oci::schema_validation))]
    SchemaValidation {
        /// Schema URI.
        schema: String,
        /// Validation messages.
        errors: Vec<String>,
        /// The offending document, pretty-printed.
        document: String,
    },

    /// A schema file could not be loaded or compiled.
    #[error("Failed to load schema {}: {message}", path.display())]
    #[diagnostic(
        code(bottler::oci::schema_load),
        help("Download the OCI image-spec schemas into the schema directory")
    )]
    SchemaLoad {
        /// Schema file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// Inspecting the remote image failed for a reason other than absence.
    #[error("{image} inspection returned an error!\n{stderr}")]
    #[diagnostic(code(bottler::oci::inspect))]
    Inspect {
        /// Image reference.
        image: String,
        /// Captured tool output.
        stderr: String,
    },

    /// The image tag is already published.
    #[error("{image} already exists!")]
    #[diagnostic(
        code(bottler::oci::already_exists),
        help("Pass --keep-old to add platforms to the existing image")
    )]
    AlreadyExists {
        /// Image reference.
        image: String,
    },

    /// A platform is about to be added twice to one index.
    #[error("A bottle JSON for {tag} is present, but it is already in the image index!")]
    #[diagnostic(code(bottler::oci::duplicate_platform))]
    DuplicatePlatform {
        /// Bottle tag.
        tag: String,
    },

    /// The receipt names an architecture with no OCI equivalent.
    #[error("Unknown bottle architecture: {arch}")]
    #[diagnostic(code(bottler::oci::unknown_arch))]
    UnknownArchitecture {
        /// Receipt or tag architecture.
        arch: String,
    },

    /// The receipt names an OS with no OCI equivalent.
    #[error("Unknown bottle build OS: {os}")]
    #[diagnostic(code(bottler::oci::unknown_os))]
    UnknownOs {
        /// `built_on.os` value.
        os: String,
    },

    /// The image layout on disk is incomplete or malformed.
    #[error("Invalid image layout at {}: {message}", path.display())]
    #[diagnostic(code(bottler::oci::layout))]
    Layout {
        /// File involved.
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

    /// Wrapped JSON error.
    #[error("JSON error: {0}")]
    #[diagnostic(code(bottler::oci::json))]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a layout error.
    #[must_use]
    pub fn layout(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Layout {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a schema loading error.
    #[must_use]
    pub fn schema_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SchemaLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error with path context.
    #[must_use]
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Core(bottler_core::Error::io_at(path, source))
    }

    /// Whether this error is a usage error.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_usage())
    }
}
