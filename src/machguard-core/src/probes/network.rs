//! Network interception probe.

use super::{CheckResult, ProbeContext};

pub(super) fn proxied(ctx: &ProbeContext<'_>) -> CheckResult {
    let proxies = ctx.platform.proxies();
    if proxies.is_empty() {
        CheckResult::pass("no HTTP/HTTPS proxy configured")
    } else {
        CheckResult::fail(format!("{} proxies configured", proxies.len()))
    }
}
