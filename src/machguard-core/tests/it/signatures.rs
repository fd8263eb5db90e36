//! Signature databases derived from bundles and fed back into scans.

use std::sync::Arc;

use machguard_core::signatures::PRESETS_FILE_NAME;
use machguard_core::{
    export, AppBundle, CheckKind, DetectionSignatureSet, Engine, EngineConfig, Evidence,
    SimulatedPlatform,
};

use crate::fixtures::Image;

const INFO_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>CFBundleIdentifier</key>
    <string>com.example.app</string>
    <key>CFBundleExecutable</key>
    <string>App</string>
</dict>
</plist>"#;

/// Lay out a `Contents/`-style bundle with one resource.
fn write_bundle(root: &std::path::Path, text: &[u8]) {
    let contents = root.join("Contents");
    std::fs::create_dir_all(contents.join("MacOS")).unwrap();
    std::fs::create_dir_all(contents.join("Resources")).unwrap();
    std::fs::write(contents.join("Info.plist"), INFO_PLIST).unwrap();
    Image::with_text(text).write_to(&contents.join("MacOS"), "App");
    std::fs::write(contents.join("Resources").join("rules.json"), b"{\"v\":1}").unwrap();
}

fn scan(signatures: DetectionSignatureSet, bundle: AppBundle) -> Engine {
    let engine = Engine::with_parts(signatures, bundle, Arc::new(SimulatedPlatform::new()));
    engine.run_all();
    engine
}

#[test]
fn bundle_is_opened_from_info_plist() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), b"code");
    let bundle = AppBundle::open(dir.path()).unwrap();
    assert!(bundle.is_nested());
    assert_eq!(bundle.identifier.as_deref(), Some("com.example.app"));
    assert!(bundle.executable.as_ref().unwrap().ends_with("Contents/MacOS/App"));
    assert!(bundle.resource_path("rules.json").is_some());
}

#[test]
fn directory_without_info_plist_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(AppBundle::open(dir.path()).is_err());
}

#[test]
fn derived_database_accepts_its_own_bundle() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), b"shipped");
    let bundle = AppBundle::open(dir.path()).unwrap();

    let mut base = DetectionSignatureSet::empty();
    base.secure_main_bundle_identifiers.insert("com.example.app".into());
    base.secure_resource_hashes.insert("rules.json".into(), String::new());
    let derived = DetectionSignatureSet::from_bundle(&base, &bundle);
    assert_eq!(derived.secure_main_executable_macho_hashes.len(), 1);

    let path = dir.path().join(PRESETS_FILE_NAME);
    derived.write_ahead(&path).unwrap();
    let loaded = DetectionSignatureSet::load(&path).unwrap();
    assert_eq!(loaded, derived);

    let engine = scan(loaded, bundle);
    let report = engine.current_report();
    for kind in [
        CheckKind::IdentifiedBundleIdentifier,
        CheckKind::IdentifiedMachO,
        CheckKind::IdentifiedEntitlements,
    ] {
        assert!(report.check(kind).unwrap().is_passed(), "{kind} failed");
    }
    assert_eq!(report.summary.signature_categories, 3);
}

#[test]
fn tampered_executable_and_resource_are_named() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), b"shipped");
    let bundle = AppBundle::open(dir.path()).unwrap();
    let mut base = DetectionSignatureSet::empty();
    base.secure_resource_hashes.insert("rules.json".into(), String::new());
    let derived = DetectionSignatureSet::from_bundle(&base, &bundle);

    // Replace the executable's code and edit the resource after deriving.
    write_bundle(dir.path(), b"patched");
    std::fs::write(
        dir.path().join("Contents").join("Resources").join("rules.json"),
        b"{\"v\":2}",
    )
    .unwrap();

    let engine = scan(derived, bundle);
    let report = engine.current_report();
    let check = report.check(CheckKind::IdentifiedMachO).unwrap();
    assert!(check.is_failed());
    assert_eq!(
        check.evidence,
        vec![Evidence::item("main executable"), Evidence::item("rules.json")]
    );
}

#[test]
fn exported_report_names_failed_probe() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), b"code");
    let bundle = AppBundle::open(dir.path()).unwrap();
    let mut signatures = DetectionSignatureSet::empty();
    signatures.secure_main_bundle_identifiers.insert("com.other.app".into());

    let engine = scan(signatures, bundle);
    let path = dir.path().join("report.plist");
    export::write(&path, &engine.current_report(), "Security").unwrap();

    let value = plist::Value::from_file(&path).unwrap();
    let dict = value.as_dictionary().unwrap();
    let usage = dict.get("usageEntry").and_then(plist::Value::as_dictionary).unwrap();
    assert_eq!(usage.get("compromised").and_then(plist::Value::as_boolean), Some(true));
    let first = dict.get("basicEntries").and_then(plist::Value::as_array).unwrap()[0]
        .as_dictionary()
        .unwrap();
    assert_eq!(
        first.get("key").and_then(plist::Value::as_string),
        Some("identifiedBundleIdentifier")
    );
}

fn configured(config: &EngineConfig) -> Engine {
    Engine::with_platform(config, Arc::new(SimulatedPlatform::new()))
}

fn bundled_presets(root: &std::path::Path) -> std::path::PathBuf {
    root.join("Contents").join("Resources").join(PRESETS_FILE_NAME)
}

#[test]
fn configured_database_path_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), b"code");
    let mut signatures = DetectionSignatureSet::empty();
    signatures.suspicious_files.insert("/bin/bash".into());
    let path = dir.path().join("custom.plist");
    signatures.write_ahead(&path).unwrap();

    let engine = configured(&EngineConfig {
        signatures_path: Some(path),
        bundle_root: Some(dir.path().to_path_buf()),
        ..EngineConfig::default()
    });
    assert_eq!(engine.signatures(), &signatures);
    assert_eq!(engine.signatures().coverage(), (1, 19));
}

#[test]
fn bundled_database_is_loaded_without_configured_path() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), b"code");
    let planted = dir.path().join("frida-server");
    std::fs::write(&planted, b"").unwrap();
    let mut signatures = DetectionSignatureSet::empty();
    signatures
        .suspicious_files
        .insert(planted.to_string_lossy().into_owned());
    signatures.write_ahead(bundled_presets(dir.path())).unwrap();

    let engine = configured(&EngineConfig {
        bundle_root: Some(dir.path().to_path_buf()),
        ..EngineConfig::default()
    });
    assert_eq!(engine.signatures().coverage(), (1, 19));

    engine.run_all();
    let report = engine.current_report();
    let check = report.check(CheckKind::NoSuspiciousFile).unwrap();
    assert!(check.is_failed());
    assert_eq!(check.evidence, vec![Evidence::item(planted.to_string_lossy())]);
}

#[test]
fn unusable_configured_path_falls_back_to_bundled_database() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), b"code");
    let mut signatures = DetectionSignatureSet::empty();
    signatures.suspicious_libraries.insert("SubstrateLoader".into());
    signatures.write_ahead(bundled_presets(dir.path())).unwrap();

    let engine = configured(&EngineConfig {
        signatures_path: Some(dir.path().join("missing.plist")),
        bundle_root: Some(dir.path().to_path_buf()),
        ..EngineConfig::default()
    });
    assert_eq!(engine.signatures(), &signatures);
}

#[test]
fn unparsable_bundled_database_degrades_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path(), b"code");
    std::fs::write(bundled_presets(dir.path()), b"<plist><dict><key>").unwrap();

    let engine = configured(&EngineConfig {
        bundle_root: Some(dir.path().to_path_buf()),
        ..EngineConfig::default()
    });
    assert_eq!(engine.signatures().coverage(), (0, 19));
    assert!(engine.run_all());
    assert_eq!(
        engine.current_report().summary.coverage_label(),
        "0 of 19 categories evaluated"
    );
}
