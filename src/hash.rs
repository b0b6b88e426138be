//! Hashing helpers.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of `value`.
pub fn sha256_hex(value: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(value.as_ref()))
}
