//! SHA-256 fingerprints for uploaded files
//!
//! Uploads are fingerprinted when they are stored and re-verified when the
//! ingestor reads them back, so a truncated or swapped object in storage is a
//! file-level failure instead of silently loading the wrong rows.

use crate::error::{CommonError, Result};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of an in-memory buffer
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Check `data` against a previously recorded fingerprint
pub fn verify_sha256(data: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CommonError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
