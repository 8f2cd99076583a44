//! Bottle specifications for bottler.
//!
//! A bottle specification lists the prebuilt archives available for a
//! package: a download root, a rebuild counter and one checksum per platform
//! tag. This crate models it and moves it between its two representations:
//!
//! - [`text`] - the `bottle do ... end` block embedded in definition files
//! - [`json`] - the per-platform transport document written at bottling time
//!
//! [`merge`] combines fragments from several build machines into one
//! specification, collapsing identical archives into an `all` tag, and can
//! patch the definition file in place ([`definition`]) and commit it
//! ([`vcs`]).

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod definition;
pub mod error;
pub mod filename;
pub mod json;
pub mod merge;
pub mod model;
pub mod text;
pub mod vcs;

pub use definition::Definition;
pub use error::{Error, Result};
pub use filename::BottleFilename;
pub use json::{BottleInfo, BottleJson, BottleTab, BuiltOn, FormulaInfo, PackageEntry, RuntimeDependency, TagInfo};
pub use merge::{MergeEngine, MergeOptions, MergeOutcome, MergedBottle, merge_documents};
pub use model::{BottleSpecification, CellarMode, ChecksumEntry};
pub use text::{ParsedBlock, parse_bottle_block, render_block};
pub use vcs::{Author, BlockChange, Committer, GitCommitter};

/// Compiles one of this crate's pattern literals.
#[allow(clippy::expect_used)]
pub(crate) fn static_regex(pattern: &str) -> regex::Regex {
    regex::Regex::new(pattern).expect("pattern literals in this crate are valid regexes")
}
