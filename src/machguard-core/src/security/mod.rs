//! Digest primitives, code-signing flag evaluation and artifact integrity.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use machguard_core::security::{FileIntegrityCheck, IntegrityTarget, IntegrityVerifier};
//!
//! let verifier = IntegrityVerifier::new(bundle, platform);
//! let report = verifier.verify(&[FileIntegrityCheck::MachO {
//!     target: IntegrityTarget::Main,
//!     expected: hashes,
//! }]);
//!
//! if report.any_failed {
//!     // fail closed
//! }
//! ```

pub mod codesign;
pub mod file_integrity;

use std::path::Path;

use sha2::{Digest, Sha256};

pub use codesign::{CsFlag, CsFlagGroup, CsFlagStatus, CsFlags};
pub use file_integrity::{FileIntegrityCheck, IntegrityReport, IntegrityTarget, IntegrityVerifier};

/// Lowercase hex SHA-256 of `bytes`.
pub fn digest_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lowercase hex SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let data = std::fs::read(path)?;
    Ok(digest_sha256(&data))
}

/// Compare two hex digests, ignoring ASCII case.
pub fn digests_match(a: &str, b: &str) -> bool {
    constant_time_eq(
        a.trim().to_ascii_lowercase().as_bytes(),
        b.trim().to_ascii_lowercase().as_bytes(),
    )
}

/// Constant-time byte comparison.
///
/// Does not short-circuit on the first mismatch.
#[inline(never)]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
