//! Artifact integrity verification.
//!
//! Answers "is this artifact what we shipped" for the bundle identifier,
//! the embedded provisioning profile, named resources and the code
//! section of Mach-O images.
//!
//! ## Rules
//!
//! - Every check is total: a missing file, unreadable path, unparseable
//!   image or absent section counts as a failed check, never an error.
//! - Digests are lowercase hex SHA-256 and compared ignoring case.
//! - A Mach-O digest covers exactly `__TEXT,__text`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{digest_sha256, digests_match, hash_file};
use crate::bundle::AppBundle;
use crate::error::ParseError;
use crate::macho::MachONavigator;
use crate::platform::Platform;

/// Which image a Mach-O digest is taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityTarget {
    /// The running main executable; read from memory where the platform
    /// supports it, else from disk.
    Main,
    /// A loaded image, by path, read from memory.
    LoadedImage(String),
    /// An executable on disk.
    Executable(PathBuf),
}

impl fmt::Display for IntegrityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main executable"),
            Self::LoadedImage(name) => write!(f, "image {name}"),
            Self::Executable(path) => write!(f, "executable {}", path.display()),
        }
    }
}

/// One "is this what we shipped" question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileIntegrityCheck {
    /// The bundle identifier is one of the given identifiers.
    BundleId(BTreeSet<String>),
    /// The provisioning profile digest is one of the given digests.
    MobileProvision(BTreeSet<String>),
    /// The image's `__TEXT,__text` digest is one of the given digests.
    MachO {
        /// Image to digest.
        target: IntegrityTarget,
        /// Accepted digests.
        expected: BTreeSet<String>,
    },
    /// A named bundle resource has the given digest.
    CommonResource {
        /// Resource file name.
        name: String,
        /// Accepted digest.
        digest: String,
    },
}

impl FileIntegrityCheck {
    /// Short human description.
    pub fn description(&self) -> String {
        match self {
            Self::BundleId(ids) => format!("bundle identifier in {} known", ids.len()),
            Self::MobileProvision(_) => "embedded.mobileprovision digest".to_string(),
            Self::MachO { target, .. } => format!("__TEXT,__text digest of {target}"),
            Self::CommonResource { name, .. } => format!("resource {name} digest"),
        }
    }
}

impl fmt::Display for FileIntegrityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Outcome of [`IntegrityVerifier::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// At least one check failed.
    pub any_failed: bool,
    /// The failed checks, in input order.
    pub failed_checks: Vec<FileIntegrityCheck>,
}

/// Verifies bundle artifacts against reference values.
#[derive(Clone)]
pub struct IntegrityVerifier {
    bundle: AppBundle,
    platform: Arc<dyn Platform>,
}

impl IntegrityVerifier {
    /// Create a verifier over `bundle`, reading loaded images through
    /// `platform`.
    pub fn new(bundle: AppBundle, platform: Arc<dyn Platform>) -> Self {
        Self { bundle, platform }
    }

    /// The bundle under verification.
    pub fn bundle(&self) -> &AppBundle {
        &self.bundle
    }

    /// Run every check and collect the failures.
    pub fn verify(&self, checks: &[FileIntegrityCheck]) -> IntegrityReport {
        let failed_checks: Vec<_> = checks
            .iter()
            .filter(|check| !self.passes(check))
            .cloned()
            .collect();

        tracing::debug!(
            checked = checks.len(),
            failed = failed_checks.len(),
            "IntegrityVerifier: verify complete"
        );

        IntegrityReport {
            any_failed: !failed_checks.is_empty(),
            failed_checks,
        }
    }

    fn passes(&self, check: &FileIntegrityCheck) -> bool {
        let passed = match check {
            FileIntegrityCheck::BundleId(expected) => self
                .bundle
                .identifier
                .as_ref()
                .is_some_and(|id| expected.contains(id)),
            FileIntegrityCheck::MobileProvision(expected) => self
                .bundle
                .provisioning_profile()
                .and_then(|path| hash_file(&path).ok())
                .is_some_and(|actual| matches_any(&actual, expected)),
            FileIntegrityCheck::MachO { target, expected } => self
                .digest_of_text_section(target)
                .is_some_and(|actual| matches_any(&actual, expected)),
            FileIntegrityCheck::CommonResource { name, digest } => self
                .bundle
                .resource_path(name)
                .and_then(|path| hash_file(&path).ok())
                .is_some_and(|actual| digests_match(&actual, digest)),
        };
        if !passed {
            tracing::warn!("IntegrityVerifier: {} did not match", check);
        }
        passed
    }

    /// SHA-256 of `__TEXT,__text` of the target, or `None` if the section
    /// cannot be located or read.
    pub fn digest_of_text_section(&self, target: &IntegrityTarget) -> Option<String> {
        let bytes = match target {
            IntegrityTarget::Main => self
                .platform
                .loaded_text_section(None)
                .or_else(|| self.bundle.executable.as_deref().and_then(text_section_bytes)),
            IntegrityTarget::LoadedImage(name) => self.platform.loaded_text_section(Some(name)),
            IntegrityTarget::Executable(path) => text_section_bytes(path),
        }?;
        Some(digest_sha256(&bytes))
    }
}

fn matches_any(actual: &str, expected: &BTreeSet<String>) -> bool {
    expected.iter().any(|candidate| digests_match(actual, candidate))
}

fn text_section_bytes(path: &Path) -> Option<Vec<u8>> {
    match read_text_section(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!("text_section_bytes: {}: {}", path.display(), e);
            None
        },
    }
}

/// Read `__TEXT,__text` of the executable at `path` from disk.
///
/// `Ok(None)` means the image parsed but carries no such section.
pub fn read_text_section(path: &Path) -> Result<Option<Vec<u8>>, ParseError> {
    let file_len = std::fs::metadata(path)
        .map_err(|source| ParseError::CannotOpenBinary {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    let mut nav = MachONavigator::open(path)?;
    let header = nav.classify(0)?;
    let thin = *header.thin()?;
    let Some(section) = nav.find_section(&header, "__TEXT", "__text")? else {
        return Ok(None);
    };

    let start = thin.offset + u64::from(section.offset);
    if start.saturating_add(section.size) > file_len {
        return Err(ParseError::Truncated {
            offset: start,
            wanted: section.size as usize,
        });
    }
    let cursor = nav.cursor();
    cursor.seek(start)?;
    Ok(Some(cursor.read_bytes(section.size as usize)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;

    fn verifier(bundle: AppBundle, platform: SimulatedPlatform) -> IntegrityVerifier {
        IntegrityVerifier::new(bundle, Arc::new(platform))
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_bundle_id_membership() {
        let bundle = AppBundle {
            identifier: Some("com.example.app".into()),
            ..AppBundle::default()
        };
        let v = verifier(bundle, SimulatedPlatform::new());

        let ok = v.verify(&[FileIntegrityCheck::BundleId(set(&["com.example.app"]))]);
        assert!(!ok.any_failed);

        let bad = v.verify(&[FileIntegrityCheck::BundleId(set(&["com.other"]))]);
        assert!(bad.any_failed);
        assert_eq!(bad.failed_checks.len(), 1);
    }

    #[test]
    fn test_main_digest_from_memory() {
        let platform = SimulatedPlatform {
            main_text: Some(b"\x1f\x20\x03\xd5".to_vec()),
            ..SimulatedPlatform::default()
        };
        let v = verifier(AppBundle::default(), platform);
        let digest = v.digest_of_text_section(&IntegrityTarget::Main).unwrap();
        assert_eq!(digest, digest_sha256(b"\x1f\x20\x03\xd5"));

        let report = v.verify(&[FileIntegrityCheck::MachO {
            target: IntegrityTarget::Main,
            expected: set(&[&digest.to_uppercase()]),
        }]);
        assert!(!report.any_failed);
    }

    #[test]
    fn test_missing_image_fails_closed() {
        let v = verifier(AppBundle::default(), SimulatedPlatform::new());
        let target = IntegrityTarget::LoadedImage("/usr/lib/libnothing.dylib".into());
        assert!(v.digest_of_text_section(&target).is_none());
        let report = v.verify(&[FileIntegrityCheck::MachO {
            target,
            expected: set(&["00"]),
        }]);
        assert!(report.any_failed);
    }

    #[test]
    fn test_resource_and_profile_digests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("embedded.mobileprovision"), b"profile").unwrap();
        let bundle = AppBundle {
            root: dir.path().to_path_buf(),
            ..AppBundle::default()
        };
        let v = verifier(bundle, SimulatedPlatform::new());

        let report = v.verify(&[
            FileIntegrityCheck::CommonResource {
                name: "data.json".into(),
                digest: digest_sha256(b"{}"),
            },
            FileIntegrityCheck::MobileProvision(set(&[&digest_sha256(b"profile")])),
            FileIntegrityCheck::CommonResource {
                name: "missing.json".into(),
                digest: digest_sha256(b""),
            },
        ]);
        assert!(report.any_failed);
        assert_eq!(
            report.failed_checks,
            vec![FileIntegrityCheck::CommonResource {
                name: "missing.json".into(),
                digest: digest_sha256(b""),
            }]
        );
    }

    #[test]
    fn test_non_macho_executable_has_no_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script");
        std::fs::write(&path, b"#!/bin/sh\necho hi\n").unwrap();
        let v = verifier(AppBundle::default(), SimulatedPlatform::new());
        assert!(v
            .digest_of_text_section(&IntegrityTarget::Executable(path))
            .is_none());
    }
}
