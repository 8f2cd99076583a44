//! Publishing bottles to an OCI registry.
//!
//! Bottles are uploaded as multi-platform images: each archive becomes the
//! single layer of a per-platform manifest, and an index ties the manifests
//! of one package version together. Images are assembled in an on-disk
//! [`layout`] whose [`documents`] are checked against the image-spec
//! [`schema`]s, then copied to the registry with an external tool
//! ([`registry`]). [`publisher::Publisher`] drives the sequence.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod documents;
pub mod error;
pub mod layout;
pub mod publisher;
pub mod registry;
pub mod schema;

pub use documents::{Descriptor, ImageConfig, ImageIndex, ImageManifest, LayoutMarker, Platform};
pub use error::{Error, Result};
pub use layout::{ImageLayout, StoredBlob};
pub use publisher::{PublishOptions, PublishOutcome, Publisher};
pub use registry::{CredentialFlag, Inspection, RegistryTarget, RegistryTool};
pub use schema::{JsonSchemaValidator, SchemaKind, SchemaValidator};

/// Compiles one of this crate's pattern literals.
#[allow(clippy::expect_used)]
pub(crate) fn static_regex(pattern: &str) -> regex::Regex {
    regex::Regex::new(pattern).expect("pattern literals in this crate are valid regexes")
}
