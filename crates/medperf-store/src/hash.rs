use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{io_error, StoreError};

/// Stream a file through sha256 and return the lowercase hex digest.
///
/// # Errors
///
/// Returns [`StoreError::Io`] when the file cannot be opened or read.
pub fn compute_sha256(path: &Path) -> Result<String, StoreError> {
    let mut file = File::open(path).map_err(io_error("open", path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).map_err(io_error("read", path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Length of a lowercase hex sha256 digest.
pub const DIGEST_LEN: usize = 64;

/// Normalize an optional expected digest.
///
/// Blank input means no expectation. Anything else must be a sha256 hex
/// digest, since expected digests name directories in shared storage.
///
/// # Errors
///
/// Returns [`StoreError::InvalidArgument`] for a malformed digest.
pub fn expected_digest(expected: Option<&str>) -> Result<Option<String>, StoreError> {
    let Some(value) = expected.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if value.len() != DIGEST_LEN || !value.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidArgument(format!(
            "'{value}' is not a sha256 hex digest"
        )));
    }
    Ok(Some(value.to_ascii_lowercase()))
}

/// Check a computed digest against an optional expectation.
///
/// An absent or empty expectation places no constraint, so the computed
/// digest is returned as the object's identity.
///
/// # Errors
///
/// Returns [`StoreError::InvalidArgument`] for a malformed expectation and
/// [`StoreError::Integrity`] naming both digests when they differ.
pub fn verify_hash(
    subject: &str,
    actual: &str,
    expected: Option<&str>,
) -> Result<String, StoreError> {
    match expected_digest(expected)? {
        Some(expected) if expected != actual => Err(StoreError::Integrity {
            subject: subject.to_string(),
            expected,
            actual: actual.to_string(),
        }),
        _ => Ok(actual.to_string()),
    }
}

/// Hash `path` and verify it, returning the computed digest.
///
/// # Errors
///
/// Propagates read failures and digest mismatches.
pub fn verify_or_get_hash(path: &Path, expected: Option<&str>) -> Result<String, StoreError> {
    let actual = compute_sha256(path)?;
    verify_hash(&path.display().to_string(), &actual, expected)
}
