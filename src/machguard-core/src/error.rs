//! Error types for the parsing tier and the signature database.
//!
//! Only the parsing tier (reader, navigator, entitlement extractor) and the
//! signature database loader return errors. Verification and probe code
//! folds every failure into a boolean outcome instead.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading and decoding a Mach-O image.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The binary could not be opened.
    #[error("Cannot open binary {}: {source}", path.display())]
    CannotOpenBinary {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The leading magic matched neither a thin nor a fat Mach-O header.
    #[error("Unknown binary format (magic {magic:#010x})")]
    UnknownBinaryFormat {
        /// The magic as read in native byte order.
        magic: u32,
    },

    /// All load commands were examined without finding `LC_CODE_SIGNATURE`.
    #[error("Code signature load command missing after {examined} commands")]
    CodeSignatureCommandMissing {
        /// Number of load commands examined.
        examined: u32,
    },

    /// The code-signature super-blob is malformed or lacks the requested blob.
    #[error("Signature reading error: {reason}")]
    SignatureReadingError {
        /// What went wrong.
        reason: String,
    },

    /// Multi-architecture images are rejected rather than sliced.
    #[error("Fat (multi-architecture) binaries are not supported")]
    UnsupportedFatBinary,

    /// A read ran past the end of the input.
    #[error("Truncated input: wanted {wanted} bytes at offset {offset}")]
    Truncated {
        /// Offset at which the read started.
        offset: u64,
        /// Number of bytes requested.
        wanted: usize,
    },

    /// The underlying reader failed for a reason other than end of input.
    #[error("Read failed at offset {offset}: {source}")]
    ReadFailed {
        /// Offset at which the read started.
        offset: u64,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ParseError {
    /// Whether the error is the explicit fat-binary rejection.
    #[must_use]
    pub fn is_fat(&self) -> bool {
        matches!(self, Self::UnsupportedFatBinary)
    }

    /// Whether the image simply carries no code signature.
    #[must_use]
    pub fn is_missing_signature(&self) -> bool {
        matches!(self, Self::CodeSignatureCommandMissing { .. })
    }

    pub(crate) fn signature(reason: impl Into<String>) -> Self {
        Self::SignatureReadingError {
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading or persisting a detection signature database.
#[derive(Debug, Error)]
pub enum SignatureSetError {
    /// File could not be read or written.
    #[error("Signature database I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Property list could not be decoded or encoded.
    #[error("Signature database plist error: {0}")]
    Plist(#[from] plist::Error),

    /// The directory given as a bundle is not one.
    #[error("Invalid bundle: {message}")]
    InvalidBundle {
        /// Why the bundle was rejected.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(ParseError::UnsupportedFatBinary.is_fat());
        assert!(!ParseError::UnsupportedFatBinary.is_missing_signature());
        assert!(ParseError::CodeSignatureCommandMissing { examined: 3 }.is_missing_signature());
    }

    #[test]
    fn test_display_includes_magic() {
        let err = ParseError::UnknownBinaryFormat { magic: 0xdead_beef };
        assert!(err.to_string().contains("0xdeadbeef"));
    }
}
