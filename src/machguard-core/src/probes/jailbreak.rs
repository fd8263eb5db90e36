//! Jailbreak artifact probes.
//!
//! Presence checks against the signature database. Absence of an artifact
//! is the secure state, so a path that cannot be examined counts as absent.

use std::fs::{self, File};
use std::path::Path;

use super::{push_unique, CheckResult, Evidence, ProbeContext};

/// Prefix the signed system volume snapshot name must carry.
const SEALED_SNAPSHOT_PREFIX: &str = "com.apple.";

fn path_exists(path: &str) -> bool {
    let path = Path::new(path);
    fs::metadata(path).is_ok() || fs::symlink_metadata(path).is_ok() || File::open(path).is_ok()
}

pub(super) fn found_files(ctx: &ProbeContext<'_>) -> Vec<String> {
    let sigs = ctx.signatures;
    let mut candidates: Vec<&String> = sigs.suspicious_files.iter().collect();
    if !ctx.platform.is_simulator() {
        candidates.extend(sigs.suspicious_interpreters.iter());
    }
    candidates.extend(sigs.suspicious_executables.iter());

    let mut found = Vec::new();
    for path in candidates {
        if path_exists(path) {
            push_unique(&mut found, path.as_str());
        }
    }
    found
}

pub(super) fn suspicious_files(ctx: &ProbeContext<'_>) -> CheckResult {
    CheckResult::from_findings(&found_files(ctx), "suspicious files")
}

pub(super) fn found_libraries(ctx: &ProbeContext<'_>) -> Vec<String> {
    let sigs = ctx.signatures;
    let fragments: Vec<String> = sigs
        .suspicious_libraries
        .iter()
        .chain(sigs.suspicious_library_names.iter())
        .map(|name| name.to_lowercase())
        .collect();
    if fragments.is_empty() {
        return Vec::new();
    }

    let mut found = Vec::new();
    for image in ctx.platform.loaded_images() {
        let lowered = image.to_lowercase();
        if fragments.iter().any(|fragment| lowered.contains(fragment.as_str())) {
            push_unique(&mut found, image);
        }
    }
    found
}

pub(super) fn suspicious_libraries(ctx: &ProbeContext<'_>) -> CheckResult {
    CheckResult::from_findings(&found_libraries(ctx), "suspicious libraries")
}

pub(super) fn found_symbolic_links(ctx: &ProbeContext<'_>) -> Vec<String> {
    ctx.signatures
        .suspicious_symbolic_links
        .iter()
        .filter(|path| {
            fs::read_link(path.as_str()).is_ok_and(|target| !target.as_os_str().is_empty())
        })
        .cloned()
        .collect()
}

pub(super) fn symbolic_links(ctx: &ProbeContext<'_>) -> CheckResult {
    CheckResult::from_findings(&found_symbolic_links(ctx), "suspicious symbolic links")
}

pub(super) fn found_ports(ctx: &ProbeContext<'_>) -> Vec<Evidence> {
    ctx.signatures
        .suspicious_ports
        .iter()
        .filter(|item| ctx.platform.can_connect_local(item.port))
        .map(|item| Evidence::Port {
            description: item.description.clone(),
            port: item.port,
        })
        .collect()
}

pub(super) fn opened_ports(ctx: &ProbeContext<'_>) -> CheckResult {
    CheckResult::from_findings(&found_ports(ctx), "suspicious listening ports")
}

pub(super) fn found_url_schemes(ctx: &ProbeContext<'_>) -> Vec<Evidence> {
    ctx.signatures
        .suspicious_url_schemes
        .iter()
        .filter(|item| ctx.platform.can_open_url(&item.scheme))
        .map(|item| Evidence::Scheme {
            description: item.description.clone(),
            scheme: item.scheme.clone(),
        })
        .collect()
}

pub(super) fn url_schemes(ctx: &ProbeContext<'_>) -> CheckResult {
    CheckResult::from_findings(&found_url_schemes(ctx), "openable URL schemes")
}

pub(super) fn found_objc_classes(ctx: &ProbeContext<'_>) -> Vec<String> {
    ctx.signatures
        .suspicious_objc_classes
        .iter()
        .filter(|item| {
            ctx.platform.resolves_objc_method(
                &item.class_name,
                &item.selector_name,
                item.is_class_method(),
            )
        })
        .map(ToString::to_string)
        .collect()
}

pub(super) fn objc_classes(ctx: &ProbeContext<'_>) -> CheckResult {
    CheckResult::from_findings(&found_objc_classes(ctx), "suspicious Objective-C methods")
}

/// Environment keys in the insecure set, sorted.
pub(super) fn found_environment_variables(ctx: &ProbeContext<'_>) -> Vec<String> {
    let insecure = &ctx.signatures.insecure_environment_variables;
    ctx.platform
        .environment()
        .into_keys()
        .filter(|key| insecure.contains(key))
        .collect()
}

pub(super) fn environment_variables(ctx: &ProbeContext<'_>) -> CheckResult {
    CheckResult::from_findings(&found_environment_variables(ctx), "insecure environment variables")
}

pub(super) fn signed_system_volume(ctx: &ProbeContext<'_>) -> CheckResult {
    let Some(source) = ctx.platform.root_mount_source() else {
        return CheckResult::fail("root volume source unavailable");
    };
    let snapshot = source.split('@').next().unwrap_or_default();
    if snapshot.starts_with(SEALED_SNAPSHOT_PREFIX) {
        CheckResult::pass(format!("root mounted from sealed snapshot {snapshot}"))
    } else {
        CheckResult::fail(format!("root mounted from {source}"))
    }
}

pub(super) fn trust_cache(ctx: &ProbeContext<'_>) -> CheckResult {
    match ctx.platform.in_trust_cache() {
        Some(true) => CheckResult::fail("executable cdhash is in the trust cache"),
        Some(false) => CheckResult::pass("executable cdhash is not in the trust cache"),
        None => CheckResult::pass("trust cache membership unknown"),
    }
}
