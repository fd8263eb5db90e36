//! Sandbox violation probes.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use super::{push_unique, CheckResult, ProbeContext};

/// Send-right references a task normally holds on its own port.
const MAX_TASK_PORT_REFS: u32 = 2;

fn is_accessible(path: &str) -> bool {
    File::open(path).is_ok() || OpenOptions::new().write(true).open(path).is_ok()
}

pub(super) fn found_accessible_files(ctx: &ProbeContext<'_>) -> Vec<String> {
    let sigs = ctx.signatures;
    let mut candidates: Vec<&String> = sigs.suspicious_accessible_files.iter().collect();
    if !ctx.platform.is_simulator() {
        candidates.extend(sigs.suspicious_accessible_interpreters.iter());
    }

    let mut found = Vec::new();
    for path in candidates {
        if is_accessible(path) {
            push_unique(&mut found, path.as_str());
        }
    }
    found
}

pub(super) fn accessible_files(ctx: &ProbeContext<'_>) -> CheckResult {
    CheckResult::from_findings(&found_accessible_files(ctx), "accessible restricted files")
}

/// Try to create and remove a uniquely named file in `dir`.
fn can_write_into(dir: &str) -> bool {
    let probe = Path::new(dir).join(uuid::Uuid::new_v4().to_string());
    match fs::write(&probe, b"") {
        Ok(()) => {
            if let Err(e) = fs::remove_file(&probe) {
                tracing::warn!("sandbox: could not remove {}: {}", probe.display(), e);
            }
            true
        },
        Err(_) => false,
    }
}

pub(super) fn found_accessible_directories(ctx: &ProbeContext<'_>) -> Vec<String> {
    let mut found = Vec::new();
    if ctx.platform.root_is_read_only() == Some(false) {
        found.push("/".to_string());
    }
    for dir in &ctx.signatures.suspicious_accessible_directories {
        if can_write_into(dir) {
            push_unique(&mut found, dir.as_str());
        }
    }
    found
}

pub(super) fn accessible_directories(ctx: &ProbeContext<'_>) -> CheckResult {
    CheckResult::from_findings(&found_accessible_directories(ctx), "writable restricted directories")
}

pub(super) fn fork(ctx: &ProbeContext<'_>) -> CheckResult {
    if ctx.platform.is_simulator() {
        return CheckResult::pass("fork not checked in a simulator");
    }
    match ctx.platform.try_fork() {
        Some(pid) => CheckResult::fail(format!("fork succeeded (child {pid} reaped)")),
        None => CheckResult::pass("fork refused"),
    }
}

pub(super) fn seatbelt_port(ctx: &ProbeContext<'_>) -> CheckResult {
    if ctx.platform.has_seatbelt_port() {
        CheckResult::fail("seatbelt special port obtained")
    } else {
        CheckResult::pass("seatbelt special port unavailable")
    }
}

pub(super) fn host_port(ctx: &ProbeContext<'_>) -> CheckResult {
    if ctx.platform.has_privileged_host_port() {
        CheckResult::fail("privileged host port obtained")
    } else {
        CheckResult::pass("host port is unprivileged")
    }
}

pub(super) fn task_port(ctx: &ProbeContext<'_>) -> CheckResult {
    match ctx.platform.task_port_send_refs() {
        Some(refs) if refs <= MAX_TASK_PORT_REFS => {
            CheckResult::pass(format!("{refs} send rights on the task port"))
        },
        Some(refs) => CheckResult::fail(format!("{refs} send rights on the task port")),
        None => CheckResult::fail("task port references unavailable"),
    }
}
