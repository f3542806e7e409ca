// src/checksum.rs

//! Checksum engine
//!
//! Every binary is identified by the SHA-256 digest of its full content,
//! rendered as lowercase hex. The hex form is what meta.yml stores, so it
//! must stay stable for manifests to remain readable across versions.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Length of a hex-encoded SHA-256 digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Number of digest characters shown by `show`
pub const SHORT_CHECKSUM_LEN: usize = 7;

/// Compute the checksum of everything the reader yields
///
/// The reader is fully consumed.
pub fn compute<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)
        .map_err(|e| Error::IoError(format!("Failed to read data for checksum: {}", e)))?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the checksum of an in-memory buffer
pub fn compute_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Compute the checksum of a local file
pub fn compute_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| {
        Error::IoError(format!("Failed to open {} for checksum: {}", path.display(), e))
    })?;
    compute(file)
}

/// Verify that the reader's content matches `expected`
///
/// `name` labels the content in the mismatch error.
pub fn verify<R: Read>(name: &str, expected: &str, reader: R) -> Result<()> {
    debug!("Verifying checksum for {}", name);

    let actual = compute(reader)?;
    if actual != expected.to_ascii_lowercase() {
        return Err(Error::ChecksumMismatch {
            name: name.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }

    debug!("Checksum verified: {}", expected);
    Ok(())
}

/// Check that a string has the shape of a stored checksum
pub fn is_valid(checksum: &str) -> bool {
    checksum.len() == DIGEST_HEX_LEN
        && checksum
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Abbreviated checksum for display
pub fn short(checksum: &str) -> &str {
    checksum.get(..SHORT_CHECKSUM_LEN).unwrap_or(checksum)
}
