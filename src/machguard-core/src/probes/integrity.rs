//! Static and dynamic integrity probes.
//!
//! Static probes compare shipped artifacts against the reference digests
//! through [`IntegrityVerifier`](crate::security::IntegrityVerifier). An
//! empty reference set means no reference was shipped and the probe passes.
//! Dynamic probes inspect the running image: code-signing status, the
//! loaded image list and the dynamic linker environment.

use std::collections::BTreeSet;

use super::{CheckResult, Evidence, ProbeContext};
use crate::entitlements::{self, Entitlements};
use crate::error::ParseError;
use crate::macho::linked_library_paths;
use crate::platform::P_SELECT;
use crate::security::codesign::{self, CsFlag};
use crate::security::{FileIntegrityCheck, IntegrityTarget};

const INSERT_LIBRARIES_VAR: &str = "DYLD_INSERT_LIBRARIES";
const DYLD_VAR_PREFIX: &str = "DYLD_";

/// Read-only system locations whose images are never considered injected.
const SYSTEM_IMAGE_PREFIXES: &[&str] = &["/System/", "/Developer/"];
const SIMULATOR_IMAGE_PREFIX: &str = "/Library/Developer/CoreSimulator/Volumes/";

// =============================================================================
// Static integrity
// =============================================================================

fn verify_one(ctx: &ProbeContext<'_>, check: FileIntegrityCheck, what: &str) -> CheckResult {
    let report = ctx.verifier.verify(std::slice::from_ref(&check));
    if report.any_failed {
        CheckResult::fail(format!("{what} does not match any reference"))
    } else {
        CheckResult::pass(format!("{what} matches a reference"))
    }
}

pub(super) fn bundle_identifier(ctx: &ProbeContext<'_>) -> CheckResult {
    let expected = &ctx.signatures.secure_main_bundle_identifiers;
    if expected.is_empty() {
        return CheckResult::pass("no reference bundle identifier shipped");
    }
    verify_one(ctx, FileIntegrityCheck::BundleId(expected.clone()), "bundle identifier")
}

pub(super) fn provisioning_profile(ctx: &ProbeContext<'_>) -> CheckResult {
    let expected = &ctx.signatures.secure_mobile_provisioning_profile_hashes;
    if expected.is_empty() {
        return CheckResult::pass("no reference provisioning profile digest shipped");
    }
    verify_one(
        ctx,
        FileIntegrityCheck::MobileProvision(expected.clone()),
        "provisioning profile",
    )
}

/// The main executable digest check followed by one check per reference
/// resource.
fn artifact_checks(ctx: &ProbeContext<'_>) -> Vec<FileIntegrityCheck> {
    let sigs = ctx.signatures;
    let mut checks = Vec::with_capacity(sigs.secure_resource_hashes.len() + 1);
    if !sigs.secure_main_executable_macho_hashes.is_empty() {
        checks.push(FileIntegrityCheck::MachO {
            target: IntegrityTarget::Main,
            expected: sigs.secure_main_executable_macho_hashes.clone(),
        });
    }
    checks.extend(
        sigs.secure_resource_hashes
            .iter()
            .map(|(name, digest)| FileIntegrityCheck::CommonResource {
                name: name.clone(),
                digest: digest.clone(),
            }),
    );
    checks
}

pub(super) fn found_modified_artifacts(ctx: &ProbeContext<'_>) -> Vec<String> {
    let checks = artifact_checks(ctx);
    ctx.verifier
        .verify(&checks)
        .failed_checks
        .into_iter()
        .map(|check| match check {
            FileIntegrityCheck::CommonResource { name, .. } => name,
            FileIntegrityCheck::MachO { target, .. } => target.to_string(),
            other => other.to_string(),
        })
        .collect()
}

pub(super) fn macho(ctx: &ProbeContext<'_>) -> CheckResult {
    let checks = artifact_checks(ctx);
    if checks.is_empty() {
        return CheckResult::pass("no reference executable or resource digests shipped");
    }
    let report = ctx.verifier.verify(&checks);
    if report.any_failed {
        CheckResult::fail(format!(
            "{} of {} artifacts do not match",
            report.failed_checks.len(),
            checks.len()
        ))
    } else {
        CheckResult::pass(format!("{} artifacts match", checks.len()))
    }
}

fn read_entitlements(ctx: &ProbeContext<'_>) -> Result<Entitlements, ParseError> {
    let executable = ctx
        .bundle()
        .executable
        .as_deref()
        .ok_or_else(|| ParseError::signature("main executable unknown"))?;
    entitlements::read_from_path(executable)
}

pub(super) fn found_unknown_entitlements(ctx: &ProbeContext<'_>) -> Vec<String> {
    match read_entitlements(ctx) {
        Ok(entitlements) => entitlements
            .unknown_keys(&ctx.signatures.secure_entitlement_keys)
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub(super) fn entitlements(ctx: &ProbeContext<'_>) -> CheckResult {
    match read_entitlements(ctx) {
        Ok(entitlements) => {
            let unknown = entitlements
                .unknown_keys(&ctx.signatures.secure_entitlement_keys)
                .count();
            if unknown == 0 {
                CheckResult::pass(format!("{} entitlement keys trusted", entitlements.len()))
            } else {
                CheckResult::fail(format!("{unknown} unknown entitlement keys"))
            }
        },
        Err(e) => CheckResult::fail(format!("entitlements unreadable: {e}")),
    }
}

// =============================================================================
// Dynamic integrity
// =============================================================================

pub(super) fn code_signing_status(ctx: &ProbeContext<'_>) -> CheckResult {
    match ctx.platform.code_signing_flags() {
        Some(flags) if codesign::is_expected(flags) => {
            CheckResult::pass(format!("code-signing status {:#010x}", flags.0))
        },
        Some(flags) => CheckResult::fail(format!("unexpected code-signing status {:#010x}", flags.0)),
        None => CheckResult::fail("code-signing status unavailable"),
    }
}

pub(super) fn code_signing_evidence(ctx: &ProbeContext<'_>) -> Vec<Evidence> {
    ctx.platform
        .code_signing_flags()
        .map(|flags| {
            codesign::explain(flags)
                .into_iter()
                .map(|status| Evidence::Flag { status })
                .collect()
        })
        .unwrap_or_default()
}

/// Paths an image may legitimately be loaded from: the main executable,
/// the standalone allow-list and the executable's resolved dependencies.
fn secure_library_paths(ctx: &ProbeContext<'_>, images: &[String]) -> BTreeSet<String> {
    let mut secure = ctx.signatures.secure_standalone_libraries.clone();
    if let Some(main) = images.first() {
        secure.insert(main.clone());
    }
    if let Some(executable) = ctx.bundle().executable.as_deref() {
        secure.insert(executable.to_string_lossy().into_owned());
        match linked_library_paths(executable) {
            Ok(paths) => secure.extend(paths),
            Err(e) => tracing::debug!("secure_library_paths: {}: {}", executable.display(), e),
        }
    }
    secure
}

pub(super) fn found_injected_libraries(ctx: &ProbeContext<'_>) -> Vec<String> {
    let images = ctx.platform.loaded_images();
    let secure = secure_library_paths(ctx, &images);
    let simulator = ctx.platform.is_simulator();

    images
        .into_iter()
        .filter(|image| !secure.contains(image))
        .filter(|image| !SYSTEM_IMAGE_PREFIXES.iter().any(|p| image.starts_with(p)))
        .filter(|image| !(simulator && image.starts_with(SIMULATOR_IMAGE_PREFIX)))
        .filter(|image| !ctx.platform.in_shared_cache(image))
        .collect()
}

pub(super) fn injected_libraries(ctx: &ProbeContext<'_>) -> CheckResult {
    CheckResult::from_findings(&found_injected_libraries(ctx), "injected libraries")
}

pub(super) fn found_hooked_libraries(ctx: &ProbeContext<'_>) -> Vec<String> {
    ctx.platform
        .environment()
        .get(INSERT_LIBRARIES_VAR)
        .map(|value| value.split(':').map(str::to_string).collect())
        .unwrap_or_default()
}

pub(super) fn hooked_libraries(ctx: &ProbeContext<'_>) -> CheckResult {
    if ctx.platform.environment().contains_key(INSERT_LIBRARIES_VAR) {
        CheckResult::fail(format!("{INSERT_LIBRARIES_VAR} is set"))
    } else {
        CheckResult::pass(format!("{INSERT_LIBRARIES_VAR} is not set"))
    }
}

pub(super) fn executable_pages(ctx: &ProbeContext<'_>) -> CheckResult {
    if ctx.platform.has_shared_executable_region() {
        CheckResult::fail("shared executable memory region mapped")
    } else {
        CheckResult::pass("no shared executable memory region")
    }
}

pub(super) fn p_select_flag(ctx: &ProbeContext<'_>) -> CheckResult {
    match ctx.platform.process_flags() {
        Some(flags) if flags & P_SELECT != 0 => CheckResult::fail("P_SELECT set in process flags"),
        Some(_) => CheckResult::pass("P_SELECT not set"),
        None => CheckResult::pass("process flags unavailable"),
    }
}

pub(super) fn library_validation(ctx: &ProbeContext<'_>) -> CheckResult {
    if ctx
        .platform
        .code_signing_flags()
        .is_some_and(|flags| flags.contains(CsFlag::CS_REQUIRE_LV))
    {
        CheckResult::pass("CS_REQUIRE_LV set")
    } else {
        CheckResult::fail("CS_REQUIRE_LV not set")
    }
}

pub(super) fn dynamic_linker(ctx: &ProbeContext<'_>) -> CheckResult {
    let platform_dyld = ctx
        .platform
        .code_signing_flags()
        .is_some_and(|flags| flags.contains(CsFlag::CS_DYLD_PLATFORM));
    if !platform_dyld {
        return CheckResult::fail("CS_DYLD_PLATFORM not set");
    }
    match ctx
        .platform
        .environment()
        .into_keys()
        .find(|key| key.starts_with(DYLD_VAR_PREFIX))
    {
        Some(key) => CheckResult::fail(format!("{key} is set")),
        None => CheckResult::pass("no dynamic linker override"),
    }
}
