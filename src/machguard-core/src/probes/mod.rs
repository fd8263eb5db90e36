//! Environment probe catalog.
//!
//! Thirty-three independent checks, each a function of process and OS
//! state returning a [`CheckResult`]. Failed probes can additionally be
//! asked to [`explain`] themselves with the concrete offending findings.
//!
//! ## Categories
//!
//! | Category | Probes |
//! |----------|--------|
//! | Jailbreak | suspicious files, libraries, links, ports, schemes, classes, env, SSV, trust cache |
//! | Sandbox | accessible files and directories, fork, seatbelt/host/task ports |
//! | Static integrity | bundle id, provisioning profile, Mach-O, entitlements |
//! | Dynamic integrity | code-signing status, injected/hooked libraries, executable pages, `P_SELECT`, library validation, dyld |
//! | Debugger | simulator, tracer, parent, execution state, exception ports, signal handlers |
//! | Network | proxy |
//!
//! Probes never mutate shared state. The fork and directory-write probes
//! clean up what they create before returning.

mod debugger;
mod integrity;
mod jailbreak;
mod network;
mod sandbox;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bundle::AppBundle;
use crate::platform::Platform;
use crate::security::{CsFlagStatus, IntegrityVerifier};
use crate::signatures::DetectionSignatureSet;

/// Taxonomy bucket of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    /// Jailbreak artifacts.
    JailbreakEnvironment,
    /// Sandbox escapes.
    SandboxViolation,
    /// Shipped artifacts modified.
    StaticIntegrity,
    /// Running image modified.
    DynamicIntegrity,
    /// Debugger or emulator.
    DebuggerEmulator,
    /// Traffic interception.
    NetworkProxy,
}

impl Category {
    /// Every category in display order.
    pub const ALL: [Category; 6] = [
        Category::JailbreakEnvironment,
        Category::SandboxViolation,
        Category::StaticIntegrity,
        Category::DynamicIntegrity,
        Category::DebuggerEmulator,
        Category::NetworkProxy,
    ];

    /// Human label.
    pub fn label(self) -> &'static str {
        match self {
            Self::JailbreakEnvironment => "Jailbreak Environment",
            Self::SandboxViolation => "Sandbox Violation",
            Self::StaticIntegrity => "Static Integrity",
            Self::DynamicIntegrity => "Dynamic Integrity",
            Self::DebuggerEmulator => "Debugger & Emulator",
            Self::NetworkProxy => "Network Proxy",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

macro_rules! check_kinds {
    ($($variant:ident => $id:literal, $category:ident, $pass:literal, $fail:literal;)+) => {
        /// One probe of the catalog.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum CheckKind {
            $(
                #[allow(missing_docs)]
                #[serde(rename = $id)]
                $variant,
            )+
        }

        impl CheckKind {
            /// Every probe, in execution order.
            pub const ALL: &'static [CheckKind] = &[$(CheckKind::$variant),+];

            /// Stable identifier.
            pub fn id(self) -> &'static str {
                match self {
                    $(Self::$variant => $id,)+
                }
            }

            /// Taxonomy bucket.
            pub fn category(self) -> Category {
                match self {
                    $(Self::$variant => Category::$category,)+
                }
            }

            /// Report label when the probe passed.
            pub fn pass_label(self) -> &'static str {
                match self {
                    $(Self::$variant => $pass,)+
                }
            }

            /// Report label when the probe failed.
            pub fn fail_label(self) -> &'static str {
                match self {
                    $(Self::$variant => $fail,)+
                }
            }

            /// Look a probe up by identifier.
            pub fn from_id(id: &str) -> Option<Self> {
                match id {
                    $($id => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

check_kinds! {
    NoSuspiciousFile => "noSuspiciousFile", JailbreakEnvironment,
        "No suspicious file", "Suspicious files found";
    NoSuspiciousLibrary => "noSuspiciousLibrary", JailbreakEnvironment,
        "No suspicious library", "Suspicious libraries found";
    NoSuspiciousSymbolicLink => "noSuspiciousSymbolicLink", JailbreakEnvironment,
        "No suspicious symbolic link", "Suspicious symbolic links found";
    NoSuspiciousOpenedPort => "noSuspiciousOpenedPort", JailbreakEnvironment,
        "No suspicious opened port", "Suspicious opened ports found";
    NoSuspiciousUrlScheme => "noSuspiciousURLScheme", JailbreakEnvironment,
        "No suspicious URL scheme", "Suspicious URL schemes found";
    NoSuspiciousObjCClass => "noSuspiciousObjCClass", JailbreakEnvironment,
        "No suspicious Objective-C class", "Suspicious Objective-C classes found";
    NoSuspiciousAccessibleFile => "noSuspiciousAccessibleFile", SandboxViolation,
        "No suspicious writable file", "Suspicious writable files found";
    NoSuspiciousAccessibleDirectory => "noSuspiciousAccessibleDirectory", SandboxViolation,
        "No suspicious writable directory", "Suspicious writable directories found";
    NoSuspiciousEnvironmentVariables => "noSuspiciousEnvironmentVariables", JailbreakEnvironment,
        "No suspicious environment variable", "Suspicious environment variables found";
    IdentifiedBundleIdentifier => "identifiedBundleIdentifier", StaticIntegrity,
        "Main bundle has a valid bundle identifier", "Main bundle identifier was tampered";
    IdentifiedMobileProvisioningProfile => "identifiedMobileProvisioningProfile", StaticIntegrity,
        "Mobile provisioning profile is trusted", "Mobile provisioning profile was tampered";
    IdentifiedMachO => "identifiedMachO", StaticIntegrity,
        "Main executable is trusted", "Main executable was tampered";
    IdentifiedEntitlements => "identifiedEntitlements", StaticIntegrity,
        "All keys in entitlements are trusted", "Unknown keys found in entitlements";
    ExpectedCodeSigningStatus => "expectedCodeSigningStatus", DynamicIntegrity,
        "Valid code signing status", "Unexpected code signing status";
    NotProxied => "notProxied", NetworkProxy,
        "No HTTP/HTTPS proxy", "System HTTP/HTTPS proxy found";
    NoInjectedLibrary => "noInjectedLibrary", DynamicIntegrity,
        "No injected library", "Injected libraries found";
    NoHookedLibrary => "noHookedLibrary", DynamicIntegrity,
        "No hooked library", "Hooked libraries found";
    UnableToFork => "unableToFork", SandboxViolation,
        "Sandbox blocks call to fork(2)", "Fork was able to create a new process";
    NotInSimulator => "notInSimulator", DebuggerEmulator,
        "Run on a hardware device", "Simulator environment detected";
    NoDebuggerAttached => "noDebuggerAttached", DebuggerEmulator,
        "No debugger attached", "Debugger attached";
    KnownParentProcess => "knownParentProcess", DebuggerEmulator,
        "Parent process is launchd", "Unknown parent process";
    NoUnsignedExecutablePage => "noUnsignedExecutablePage", DynamicIntegrity,
        "No unsigned executable page found", "Unsigned executable pages found";
    UnavailableSeatbeltSpecialPort => "unavailableSeatbeltSpecialPort", SandboxViolation,
        "Seatbelt special port is not available", "Seatbelt special port is available";
    SignedSystemVolume => "signedSystemVolume", JailbreakEnvironment,
        "System volume is signed", "System volume is not signed";
    NoPSelectFlag => "noPSelectFlag", DynamicIntegrity,
        "No suspicious process flag P_SELECT", "Suspicious process flag P_SELECT found";
    UnprivilegedHostPort => "unprivilegedHostPort", SandboxViolation,
        "Host port is not privileged", "Host port is privileged";
    EnabledLibraryValidation => "enabledLibraryValidation", DynamicIntegrity,
        "Library validation is enabled", "Library validation is disabled";
    StockDynamicLinker => "stockDynamicLinker", DynamicIntegrity,
        "Dynamic linker is reliable", "Dynamic linker is unreliable";
    UnmodifiedExecutionState => "unmodifiedExecutionState", DebuggerEmulator,
        "Execution state was not modified", "Execution state was modified";
    UntouchedProcessTaskPort => "untouchedProcessTaskPort", SandboxViolation,
        "Process task port was not obtained", "Process task port was obtained";
    NotInTrustCache => "notInTrustCache", JailbreakEnvironment,
        "Binary is not in trust cache", "Binary is in trust cache";
    NoExceptionPort => "noExceptionPort", DebuggerEmulator,
        "Exception ports not set", "Exception ports were set";
    NoSignalHandler => "noSignalHandler", DebuggerEmulator,
        "Signal handlers not set", "Signal handlers were set";
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Lifecycle of one probe within a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not yet run.
    Unchanged,
    /// Ran and found nothing.
    Passed,
    /// Ran and found something.
    Failed,
}

/// Atomic outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Whether the secure state was observed.
    pub passed: bool,
    /// Short explanation.
    pub message: String,
}

impl CheckResult {
    /// A passing result.
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    /// A failing result.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }

    /// Pass iff `findings` is empty, naming `what` in the message.
    pub fn from_findings<T>(findings: &[T], what: &str) -> Self {
        if findings.is_empty() {
            Self::pass(format!("no {what} found"))
        } else {
            Self::fail(format!("{} {what} found", findings.len()))
        }
    }
}

/// One concrete finding supporting a failed probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Evidence {
    /// A path, image, key or method.
    Item {
        /// The finding.
        value: String,
    },
    /// A listening port.
    Port {
        /// Tool name.
        description: String,
        /// Port number.
        port: u16,
    },
    /// An openable URL scheme.
    Scheme {
        /// Tool name.
        description: String,
        /// The scheme.
        scheme: String,
    },
    /// A code-signing flag with its evaluation.
    Flag {
        /// Evaluation against the reference sets.
        status: CsFlagStatus,
    },
}

impl Evidence {
    /// Wrap a plain finding.
    pub fn item(value: impl Into<String>) -> Self {
        Self::Item {
            value: value.into(),
        }
    }
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item { value } => f.write_str(value),
            Self::Port { description, port } => write!(f, "{description}: {port}"),
            Self::Scheme {
                description,
                scheme,
            } => write!(f, "{description}: {scheme}"),
            Self::Flag { status } => write!(f, "{}: {}", status.flag, status.flag.description()),
        }
    }
}

/// A probe together with its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityCheck {
    /// Which probe.
    pub kind: CheckKind,
    /// Outcome.
    pub status: Status,
    /// Probe message, once run.
    pub message: Option<String>,
    /// Findings; only populated for failed probes.
    pub evidence: Vec<Evidence>,
}

impl SecurityCheck {
    /// A probe that has not run.
    pub fn pending(kind: CheckKind) -> Self {
        Self {
            kind,
            status: Status::Unchanged,
            message: None,
            evidence: Vec::new(),
        }
    }

    /// Whether the probe failed.
    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }

    /// Whether the probe passed.
    pub fn is_passed(&self) -> bool {
        self.status == Status::Passed
    }

    /// Report label for the current status.
    pub fn label(&self) -> &'static str {
        match self.status {
            Status::Failed => self.kind.fail_label(),
            _ => self.kind.pass_label(),
        }
    }
}

/// Everything a probe may consult.
#[derive(Clone, Copy)]
pub struct ProbeContext<'a> {
    /// Reference lists.
    pub signatures: &'a DetectionSignatureSet,
    /// OS primitives.
    pub platform: &'a dyn Platform,
    /// Artifact verifier over the application bundle.
    pub verifier: &'a IntegrityVerifier,
}

impl<'a> ProbeContext<'a> {
    /// The application bundle.
    pub fn bundle(&self) -> &'a AppBundle {
        self.verifier.bundle()
    }
}

/// Run one probe.
pub fn evaluate(kind: CheckKind, ctx: &ProbeContext<'_>) -> CheckResult {
    match kind {
        CheckKind::NoSuspiciousFile => jailbreak::suspicious_files(ctx),
        CheckKind::NoSuspiciousLibrary => jailbreak::suspicious_libraries(ctx),
        CheckKind::NoSuspiciousSymbolicLink => jailbreak::symbolic_links(ctx),
        CheckKind::NoSuspiciousOpenedPort => jailbreak::opened_ports(ctx),
        CheckKind::NoSuspiciousUrlScheme => jailbreak::url_schemes(ctx),
        CheckKind::NoSuspiciousObjCClass => jailbreak::objc_classes(ctx),
        CheckKind::NoSuspiciousAccessibleFile => sandbox::accessible_files(ctx),
        CheckKind::NoSuspiciousAccessibleDirectory => sandbox::accessible_directories(ctx),
        CheckKind::NoSuspiciousEnvironmentVariables => jailbreak::environment_variables(ctx),
        CheckKind::IdentifiedBundleIdentifier => integrity::bundle_identifier(ctx),
        CheckKind::IdentifiedMobileProvisioningProfile => integrity::provisioning_profile(ctx),
        CheckKind::IdentifiedMachO => integrity::macho(ctx),
        CheckKind::IdentifiedEntitlements => integrity::entitlements(ctx),
        CheckKind::ExpectedCodeSigningStatus => integrity::code_signing_status(ctx),
        CheckKind::NotProxied => network::proxied(ctx),
        CheckKind::NoInjectedLibrary => integrity::injected_libraries(ctx),
        CheckKind::NoHookedLibrary => integrity::hooked_libraries(ctx),
        CheckKind::UnableToFork => sandbox::fork(ctx),
        CheckKind::NotInSimulator => debugger::simulator(ctx),
        CheckKind::NoDebuggerAttached => debugger::debugger_attached(ctx),
        CheckKind::KnownParentProcess => debugger::parent_process(ctx),
        CheckKind::NoUnsignedExecutablePage => integrity::executable_pages(ctx),
        CheckKind::UnavailableSeatbeltSpecialPort => sandbox::seatbelt_port(ctx),
        CheckKind::SignedSystemVolume => jailbreak::signed_system_volume(ctx),
        CheckKind::NoPSelectFlag => integrity::p_select_flag(ctx),
        CheckKind::UnprivilegedHostPort => sandbox::host_port(ctx),
        CheckKind::EnabledLibraryValidation => integrity::library_validation(ctx),
        CheckKind::StockDynamicLinker => integrity::dynamic_linker(ctx),
        CheckKind::UnmodifiedExecutionState => debugger::execution_state(ctx),
        CheckKind::UntouchedProcessTaskPort => sandbox::task_port(ctx),
        CheckKind::NotInTrustCache => jailbreak::trust_cache(ctx),
        CheckKind::NoExceptionPort => debugger::exception_ports(ctx),
        CheckKind::NoSignalHandler => debugger::signal_handlers(ctx),
    }
}

/// Concrete findings behind a probe's failure. Empty for probes that
/// carry no detail.
pub fn explain(kind: CheckKind, ctx: &ProbeContext<'_>) -> Vec<Evidence> {
    match kind {
        CheckKind::NoSuspiciousFile => items(jailbreak::found_files(ctx)),
        CheckKind::NoSuspiciousLibrary => items(jailbreak::found_libraries(ctx)),
        CheckKind::NoSuspiciousSymbolicLink => items(jailbreak::found_symbolic_links(ctx)),
        CheckKind::NoSuspiciousOpenedPort => jailbreak::found_ports(ctx),
        CheckKind::NoSuspiciousUrlScheme => jailbreak::found_url_schemes(ctx),
        CheckKind::NoSuspiciousObjCClass => items(jailbreak::found_objc_classes(ctx)),
        CheckKind::NoSuspiciousAccessibleFile => items(sandbox::found_accessible_files(ctx)),
        CheckKind::NoSuspiciousAccessibleDirectory => {
            items(sandbox::found_accessible_directories(ctx))
        },
        CheckKind::NoSuspiciousEnvironmentVariables => {
            items(jailbreak::found_environment_variables(ctx))
        },
        CheckKind::IdentifiedMachO => items(integrity::found_modified_artifacts(ctx)),
        CheckKind::IdentifiedEntitlements => items(integrity::found_unknown_entitlements(ctx)),
        CheckKind::ExpectedCodeSigningStatus => integrity::code_signing_evidence(ctx),
        CheckKind::NotProxied => items(ctx.platform.proxies()),
        CheckKind::NoInjectedLibrary => items(integrity::found_injected_libraries(ctx)),
        CheckKind::NoHookedLibrary => items(integrity::found_hooked_libraries(ctx)),
        _ => Vec::new(),
    }
}

fn items(values: Vec<String>) -> Vec<Evidence> {
    values.into_iter().map(Evidence::item).collect()
}

/// Run one probe in isolation and, on failure, collect its evidence.
///
/// A panicking probe is reported as failed rather than aborting the scan.
pub fn run(kind: CheckKind, ctx: &ProbeContext<'_>) -> SecurityCheck {
    let result = catch_unwind(AssertUnwindSafe(|| evaluate(kind, ctx)))
        .unwrap_or_else(|_| CheckResult::fail("probe panicked"));

    if result.passed {
        debug!(probe = %kind, "{}", result.message);
        return SecurityCheck {
            kind,
            status: Status::Passed,
            message: Some(result.message),
            evidence: Vec::new(),
        };
    }

    warn!(probe = %kind, category = %kind.category(), "{}", result.message);
    let evidence = catch_unwind(AssertUnwindSafe(|| explain(kind, ctx))).unwrap_or_else(|_| {
        warn!(probe = %kind, "explain panicked, reporting without evidence");
        Vec::new()
    });

    SecurityCheck {
        kind,
        status: Status::Failed,
        message: Some(result.message),
        evidence,
    }
}

/// Push `item` unless already present, keeping first-seen order.
fn push_unique(found: &mut Vec<String>, item: impl Into<String>) {
    let item = item.into();
    if !found.contains(&item) {
        found.push(item);
    }
}
