//! End-to-end scans over the simulated platform.

use std::path::Path;
use std::sync::Arc;

use machguard_core::platform::ScanGate;
use machguard_core::security::codesign::REQUIRED_SECURE;
use machguard_core::security::{CsFlag, CsFlags};
use machguard_core::{
    AppBundle, CheckKind, DetectionSignatureSet, Engine, Evidence, Platform, Severity,
    SimulatedPlatform,
};

use crate::fixtures::Image;

/// A bundle whose executable carries an empty entitlements dictionary.
fn signed_bundle(dir: &Path) -> AppBundle {
    let executable = Image::default().write_to(dir, "App");
    AppBundle {
        root: dir.to_path_buf(),
        executable: Some(executable),
        identifier: Some("com.example.app".into()),
    }
}

fn engine(signatures: DetectionSignatureSet, bundle: AppBundle, platform: SimulatedPlatform) -> Engine {
    Engine::with_parts(signatures, bundle, Arc::new(platform))
}

#[test]
fn clean_environment_is_not_compromised() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(
        DetectionSignatureSet::empty(),
        signed_bundle(dir.path()),
        SimulatedPlatform::new(),
    );
    assert!(engine.run_all());

    let report = engine.current_report();
    let failed: Vec<_> = report.checks.iter().filter(|c| c.is_failed()).collect();
    assert!(failed.is_empty(), "failed: {failed:?}");
    assert!(!report.is_compromised());
    assert_eq!(report.summary.total, 33);
    assert_eq!(report.summary.passed, 33);
    assert_eq!(report.summary.coverage_label(), "0 of 19 categories evaluated");
}

#[test]
fn suspicious_file_is_reported_with_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let planted = dir.path().join("frida-server");
    let mut signatures = DetectionSignatureSet::empty();
    signatures
        .suspicious_files
        .insert(planted.to_string_lossy().into_owned());

    let engine = engine(signatures, signed_bundle(dir.path()), SimulatedPlatform::new());

    engine.run_all();
    let before = engine.current_report();
    assert!(!before.is_compromised());
    assert!(before.entry(CheckKind::NoSuspiciousFile).unwrap().children.is_empty());

    std::fs::write(&planted, b"").unwrap();
    engine.run_all();
    let after = engine.current_report();
    assert!(after.is_compromised());
    assert!(engine.is_compromised());

    let entry = after.entry(CheckKind::NoSuspiciousFile).unwrap();
    assert_eq!(entry.severity, Severity::Critical);
    assert_eq!(entry.children.len(), 1);
    assert_eq!(entry.children[0].label, planted.to_string_lossy());
    assert_eq!(after.entries[0].key, "noSuspiciousFile");

    // The earlier snapshot is unaffected.
    assert!(!before.is_compromised());
}

#[test]
fn missing_cs_valid_fails_code_signing_status() {
    let dir = tempfile::tempdir().unwrap();
    let flags = CsFlags::from_flags(&REQUIRED_SECURE).without(CsFlag::CS_VALID);
    let engine = engine(
        DetectionSignatureSet::empty(),
        signed_bundle(dir.path()),
        SimulatedPlatform {
            cs_flags: Some(flags),
            ..SimulatedPlatform::default()
        },
    );
    engine.run_all();
    let report = engine.current_report();

    let check = report.check(CheckKind::ExpectedCodeSigningStatus).unwrap();
    assert!(check.is_failed());
    assert_eq!(report.summary.failed, 1);

    let entry = report.entry(CheckKind::ExpectedCodeSigningStatus).unwrap();
    let valid = entry
        .children
        .iter()
        .find(|child| child.key == CsFlag::CS_VALID.to_string())
        .unwrap();
    assert_eq!(valid.severity, Severity::Critical);
    assert!(check
        .evidence
        .iter()
        .any(|e| matches!(e, Evidence::Flag { status } if status.flag == CsFlag::CS_VALID && !status.is_present)));
}

#[test]
fn hooked_and_injected_libraries_fail() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = signed_bundle(dir.path());
    let main = bundle.executable.clone().unwrap().to_string_lossy().into_owned();
    let mut platform = SimulatedPlatform::new();
    platform
        .environment
        .insert("DYLD_INSERT_LIBRARIES".into(), "/tmp/a.dylib:/tmp/b.dylib".into());
    platform.loaded_images = vec![
        main,
        "/System/Library/Frameworks/Foundation.framework/Foundation".into(),
        "/usr/lib/libobjc.A.dylib".into(),
        "/tmp/a.dylib".into(),
    ];
    platform.shared_cache.insert("/usr/lib/libobjc.A.dylib".into());

    let engine = engine(DetectionSignatureSet::empty(), bundle, platform);
    engine.run_all();
    let report = engine.current_report();

    let hooked = report.check(CheckKind::NoHookedLibrary).unwrap();
    assert!(hooked.is_failed());
    assert_eq!(hooked.evidence.len(), 2);

    let injected = report.check(CheckKind::NoInjectedLibrary).unwrap();
    assert!(injected.is_failed());
    assert_eq!(injected.evidence, vec![Evidence::item("/tmp/a.dylib")]);
}

#[test]
fn concurrent_scan_request_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(ScanGate::new());
    let platform = Arc::new(SimulatedPlatform {
        gate: Some(Arc::clone(&gate)),
        ..SimulatedPlatform::default()
    });
    let shared: Arc<dyn Platform> = platform.clone();
    let engine = Arc::new(Engine::with_parts(
        DetectionSignatureSet::empty(),
        signed_bundle(dir.path()),
        shared,
    ));

    let worker = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.run_all())
    };

    gate.wait_entered();
    let calls = platform.calls();
    assert!(engine.is_scanning());
    assert!(!engine.run_all());
    assert_eq!(platform.calls(), calls);
    assert!(engine.current_report().generated_at.is_none());

    gate.release();
    assert!(worker.join().unwrap());
    assert!(!engine.is_scanning());
    assert!(engine.current_report().generated_at.is_some());

    // Once idle, a new request runs.
    assert!(engine.run_all());
}

#[tokio::test]
async fn background_scans_publish_reports() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine(
        DetectionSignatureSet::empty(),
        signed_bundle(dir.path()),
        SimulatedPlatform {
            traced: true,
            ..SimulatedPlatform::default()
        },
    ));
    assert!(engine.scan_in_background().await.unwrap());
    let report = engine.current_report();
    assert!(report.check(CheckKind::NoDebuggerAttached).unwrap().is_failed());
}
