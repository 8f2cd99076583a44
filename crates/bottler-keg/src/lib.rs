//! Bottling installed packages.
//!
//! A keg is one installed version of a package under the cellar. Turning it
//! into a bottle means temporarily replacing install locations inside its
//! files with placeholders ([`relocation`]), archiving it reproducibly
//! ([`archive`]), checking what install locations remain ([`scan`]) and
//! putting everything back. [`bottle::Bottler`] drives the whole sequence for
//! one [`descriptor::PackageDescriptor`] at a time.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod archive;
pub mod bottle;
pub mod descriptor;
pub mod error;
pub mod keg;
pub mod receipt;
pub mod relocation;
pub mod scan;

pub use archive::{ArchiveBuilder, Archiver, BuiltArchive, GnuTar, NativeTar, PartialFile, archiver_for};
pub use bottle::{BottleOptions, BottleOutcome, BottledPackage, Bottler, GitUpstream, UpstreamLookup, host_tag};
pub use descriptor::{PackageDescriptor, TapInfo};
pub use error::{Error, Result};
pub use keg::{Keg, KegLock};
pub use receipt::{RECEIPT_FILE, Receipt, ReceiptCache};
pub use relocation::{RelocationGuard, RelocationRecord, RelocationTable, Relocator};
pub use scan::{ContainsReport, KegScanner};

/// Compiles one of this crate's pattern literals.
#[allow(clippy::expect_used)]
pub(crate) fn static_regex(pattern: &str) -> regex::Regex {
    regex::Regex::new(pattern).expect("pattern literals in this crate are valid regexes")
}
