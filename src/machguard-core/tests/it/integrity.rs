//! Integrity verifier over bundles written to a temporary directory.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use machguard_core::security::{digest_sha256, hash_file};
use machguard_core::{
    AppBundle, FileIntegrityCheck, IntegrityTarget, IntegrityVerifier, SimulatedPlatform,
};

use crate::fixtures::Image;

fn verifier(bundle: AppBundle) -> IntegrityVerifier {
    IntegrityVerifier::new(bundle, Arc::new(SimulatedPlatform::new()))
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn executable_digest_matches_text_section() {
    let dir = tempfile::tempdir().unwrap();
    let image = Image::with_text(b"shipped code");
    let path = image.write_to(dir.path(), "App");
    let verifier = verifier(AppBundle::default());

    let digest = verifier
        .digest_of_text_section(&IntegrityTarget::Executable(path.clone()))
        .unwrap();
    assert_eq!(digest, digest_sha256(b"shipped code"));

    let report = verifier.verify(&[FileIntegrityCheck::MachO {
        target: IntegrityTarget::Executable(path),
        expected: set(&[digest.as_str()]),
    }]);
    assert!(!report.any_failed);
}

#[test]
fn main_target_falls_back_to_bundle_executable() {
    let dir = tempfile::tempdir().unwrap();
    let path = Image::with_text(b"main").write_to(dir.path(), "App");
    let verifier = verifier(AppBundle {
        root: dir.path().to_path_buf(),
        executable: Some(path),
        identifier: None,
    });
    assert_eq!(
        verifier.digest_of_text_section(&IntegrityTarget::Main),
        Some(digest_sha256(b"main"))
    );
}

#[test]
fn patched_executable_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = Image::with_text(b"patched code").write_to(dir.path(), "App");
    let report = verifier(AppBundle::default()).verify(&[FileIntegrityCheck::MachO {
        target: IntegrityTarget::Executable(path),
        expected: set(&[digest_sha256(b"shipped code").as_str()]),
    }]);
    assert!(report.any_failed);
    assert_eq!(report.failed_checks.len(), 1);
}

#[test]
fn unreadable_targets_fail_closed() {
    let dir = tempfile::tempdir().unwrap();
    let garbage = dir.path().join("garbage");
    std::fs::write(&garbage, b"not a mach-o image at all").unwrap();
    let verifier = verifier(AppBundle::default());

    for target in [
        IntegrityTarget::Executable(dir.path().join("absent")),
        IntegrityTarget::Executable(garbage),
        IntegrityTarget::LoadedImage("/usr/lib/absent.dylib".into()),
    ] {
        assert!(verifier.digest_of_text_section(&target).is_none());
        let report = verifier.verify(&[FileIntegrityCheck::MachO {
            target,
            expected: set(&["00"]),
        }]);
        assert!(report.any_failed);
    }
}

#[test]
fn empty_expected_set_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = Image::default().write_to(dir.path(), "App");
    let report = verifier(AppBundle::default()).verify(&[FileIntegrityCheck::MachO {
        target: IntegrityTarget::Executable(path),
        expected: BTreeSet::new(),
    }]);
    assert!(report.any_failed);
}

#[test]
fn bundle_resources_and_identifier() {
    let dir = tempfile::tempdir().unwrap();
    let resources = dir.path().join("Contents").join("Resources");
    std::fs::create_dir_all(&resources).unwrap();
    std::fs::write(resources.join("config.json"), b"{}").unwrap();
    let digest = hash_file(&resources.join("config.json")).unwrap();

    let verifier = verifier(AppBundle {
        root: dir.path().to_path_buf(),
        executable: None,
        identifier: Some("com.example.app".into()),
    });
    let report = verifier.verify(&[
        FileIntegrityCheck::BundleId(set(&["com.example.app"])),
        FileIntegrityCheck::CommonResource {
            name: "config.json".into(),
            digest: digest.to_uppercase(),
        },
        FileIntegrityCheck::CommonResource {
            name: "missing.json".into(),
            digest,
        },
        FileIntegrityCheck::MobileProvision(set(&["00"])),
    ]);
    assert_eq!(report.failed_checks.len(), 2);
    assert!(matches!(
        &report.failed_checks[0],
        FileIntegrityCheck::CommonResource { name, .. } if name == "missing.json"
    ));
    assert!(matches!(report.failed_checks[1], FileIntegrityCheck::MobileProvision(_)));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    /// Reference digests match regardless of hex case.
    #[test]
    fn digest_comparison_ignores_case(text in prop::collection::vec(any::<u8>(), 1..128)) {
        let dir = tempfile::tempdir().unwrap();
        let path = Image::with_text(&text).write_to(dir.path(), "App");
        let verifier = verifier(AppBundle::default());
        let expected = set(&[digest_sha256(&text).to_uppercase().as_str()]);

        let report = verifier.verify(&[FileIntegrityCheck::MachO {
            target: IntegrityTarget::Executable(path),
            expected,
        }]);
        prop_assert!(!report.any_failed);
    }

    /// A single flipped code byte is always detected.
    #[test]
    fn any_patch_is_detected(
        text in prop::collection::vec(any::<u8>(), 1..128),
        index in any::<prop::sample::Index>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut patched = text.clone();
        let at = index.index(patched.len());
        patched[at] ^= 0xff;
        let path = Image::with_text(&patched).write_to(dir.path(), "App");

        let report = verifier(AppBundle::default()).verify(&[FileIntegrityCheck::MachO {
            target: IntegrityTarget::Executable(path),
            expected: set(&[digest_sha256(&text).as_str()]),
        }]);
        prop_assert!(report.any_failed);
    }
}
