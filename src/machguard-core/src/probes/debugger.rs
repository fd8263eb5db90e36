//! Debugger and emulator probes.

use super::{CheckResult, ProbeContext};
use crate::platform::THREAD_STATE_NONE;

/// pid of launchd.
const LAUNCHD_PID: i32 = 1;

pub(super) fn simulator(ctx: &ProbeContext<'_>) -> CheckResult {
    if ctx.platform.is_simulator() {
        CheckResult::fail("running in a simulator")
    } else {
        CheckResult::pass("running on hardware")
    }
}

pub(super) fn debugger_attached(ctx: &ProbeContext<'_>) -> CheckResult {
    if ctx.platform.is_traced() {
        CheckResult::fail("process is traced")
    } else {
        CheckResult::pass("process is not traced")
    }
}

pub(super) fn parent_process(ctx: &ProbeContext<'_>) -> CheckResult {
    let ppid = ctx.platform.parent_pid();
    if ppid == LAUNCHD_PID {
        CheckResult::pass("parent is launchd")
    } else {
        CheckResult::fail(format!("parent pid {ppid}"))
    }
}

pub(super) fn execution_state(ctx: &ProbeContext<'_>) -> CheckResult {
    let Some(ports) = ctx.platform.exception_ports() else {
        return CheckResult::fail("exception ports unavailable");
    };
    match ports.iter().find(|port| port.flavor == THREAD_STATE_NONE) {
        Some(port) => CheckResult::fail(format!(
            "exception port for mask {:#x} delivers THREAD_STATE_NONE",
            port.mask
        )),
        None => CheckResult::pass("no exception port delivers THREAD_STATE_NONE"),
    }
}

pub(super) fn exception_ports(ctx: &ProbeContext<'_>) -> CheckResult {
    let Some(ports) = ctx.platform.exception_ports() else {
        return CheckResult::fail("exception ports unavailable");
    };
    let registered = ports.iter().filter(|port| port.handler != 0).count();
    if registered == 0 {
        CheckResult::pass("no exception handler registered")
    } else {
        CheckResult::fail(format!("{registered} exception handlers registered"))
    }
}

pub(super) fn signal_handlers(ctx: &ProbeContext<'_>) -> CheckResult {
    let custom = ctx.platform.custom_signal_handlers();
    if custom.is_empty() {
        CheckResult::pass("all signals have default dispositions")
    } else {
        CheckResult::fail(format!("custom handlers for signals {custom:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::Fixture;
    use super::*;
    use crate::platform::{ExceptionPort, SimulatedPlatform};
    use crate::signatures::DetectionSignatureSet;

    fn with(platform: SimulatedPlatform) -> Fixture {
        Fixture::new(DetectionSignatureSet::empty(), platform)
    }

    #[test]
    fn test_traced_and_parent() {
        let fixture = with(SimulatedPlatform {
            traced: true,
            parent_pid: 4321,
            ..SimulatedPlatform::default()
        });
        assert!(!debugger_attached(&fixture.ctx()).passed);
        assert!(!parent_process(&fixture.ctx()).passed);
    }

    #[test]
    fn test_exception_ports() {
        let port = ExceptionPort {
            mask: 0x2,
            handler: 0x1503,
            behavior: 1,
            flavor: THREAD_STATE_NONE,
        };
        let fixture = with(SimulatedPlatform {
            exception_ports: Some(vec![port]),
            ..SimulatedPlatform::default()
        });
        assert!(!exception_ports(&fixture.ctx()).passed);
        assert!(!execution_state(&fixture.ctx()).passed);

        let failed_query = with(SimulatedPlatform {
            exception_ports: None,
            ..SimulatedPlatform::default()
        });
        assert!(!exception_ports(&failed_query.ctx()).passed);
        assert!(!execution_state(&failed_query.ctx()).passed);
    }

    #[test]
    fn test_signal_handlers() {
        let fixture = with(SimulatedPlatform {
            signal_handlers: vec![libc::SIGTRAP],
            ..SimulatedPlatform::default()
        });
        assert!(!signal_handlers(&fixture.ctx()).passed);
    }
}
