//! Content digests.
//!
//! Every artifact in the pipeline is named or verified by the sha256 of its
//! exact bytes: bottle archives, the uncompressed layer inside them and the
//! OCI blobs that describe them.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const BUFFER_SIZE: usize = 8192;

/// Prefix used by OCI descriptors.
pub const SHA256_PREFIX: &str = "sha256:";

/// Computes the sha256 hex digest of a byte buffer.
#[must_use]
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Computes the sha256 hex digest of everything readable from `reader`.
///
/// # Errors
///
/// Returns an error if the reader fails.
pub fn sha256_reader(mut reader: impl Read) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Computes the sha256 hex digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
    sha256_reader(BufReader::new(file)).map_err(|e| match e {
        Error::Io(source) => Error::io_at(path, source),
        other => other,
    })
}

/// Computes the sha256 hex digest of the decompressed content of a gzip file.
///
/// This is the OCI `diff_id` of a `tar+gzip` layer.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid gzip.
pub fn sha256_gunzipped(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::io_at(path, e))?;
    let decoder = GzDecoder::new(BufReader::new(file));
    sha256_reader(decoder).map_err(|e| match e {
        Error::Io(source) => Error::io_at(path, source),
        other => other,
    })
}

/// Checks that `digest` is a lowercase 64 character hex string.
#[must_use]
pub fn is_sha256_hex(digest: &str) -> bool {
    digest.len() == 64
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Validates a bare hex digest, returning it unchanged.
///
/// # Errors
///
/// Returns [`Error::InvalidDigest`] when the string is not a sha256 hex digest.
pub fn validate_sha256(digest: &str) -> Result<&str> {
    if is_sha256_hex(digest) {
        Ok(digest)
    } else {
        Err(Error::invalid_digest(digest))
    }
}

/// Formats a hex digest as an OCI digest (`sha256:<hex>`).
#[must_use]
pub fn oci_digest(hex: &str) -> String {
    format!("{SHA256_PREFIX}{hex}")
}

/// Splits an OCI digest into algorithm and hex parts.
///
/// Digests without an algorithm prefix are assumed to be sha256.
#[must_use]
pub fn split_digest(digest: &str) -> (&str, &str) {
    digest.split_once(':').unwrap_or(("sha256", digest))
}
