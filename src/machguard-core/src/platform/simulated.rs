//! Deterministic platform for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use super::{ExceptionPort, Platform};
use crate::security::codesign::REQUIRED_SECURE;
use crate::security::CsFlags;

/// Two-phase rendezvous used to hold a scan in flight.
///
/// The first primitive call of a scan blocks in [`SimulatedPlatform`] until
/// the controlling thread has called [`ScanGate::wait_entered`] and then
/// [`ScanGate::release`].
#[derive(Debug)]
pub struct ScanGate {
    entered: Barrier,
    released: Barrier,
}

impl ScanGate {
    /// Create a gate shared between the scan and one controller.
    pub fn new() -> Self {
        Self {
            entered: Barrier::new(2),
            released: Barrier::new(2),
        }
    }

    /// Block until the scan reaches the gate.
    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    /// Let the held scan continue.
    pub fn release(&self) {
        self.released.wait();
    }

    fn pass(&self) {
        self.entered.wait();
        self.released.wait();
    }
}

impl Default for ScanGate {
    fn default() -> Self {
        Self::new()
    }
}

/// A platform whose every primitive returns a configured value.
///
/// The default describes a clean, signed, unsandboxed-but-unmodified
/// device: no debugger, launchd parent, required code-signing flags set,
/// signed system volume and read-only root.
#[derive(Debug)]
pub struct SimulatedPlatform {
    /// Process environment.
    pub environment: BTreeMap<String, String>,
    /// Running in a simulator.
    pub simulator: bool,
    /// Whether `fork` succeeds.
    pub fork_allowed: bool,
    /// `csops` status.
    pub cs_flags: Option<CsFlags>,
    /// Loaded image paths, main executable first.
    pub loaded_images: Vec<String>,
    /// Images served from the shared cache.
    pub shared_cache: BTreeSet<String>,
    /// In-memory `__TEXT,__text` of the main executable.
    pub main_text: Option<Vec<u8>>,
    /// In-memory `__TEXT,__text` of other loaded images, by path.
    pub image_texts: BTreeMap<String, Vec<u8>>,
    /// Task exception ports, or `None` for a failed query.
    pub exception_ports: Option<Vec<ExceptionPort>>,
    /// Signals with custom handlers.
    pub signal_handlers: Vec<i32>,
    /// Send-right references on the task port.
    pub task_port_refs: Option<u32>,
    /// Parent pid.
    pub parent_pid: i32,
    /// `p_flag`.
    pub process_flags: Option<u32>,
    /// Tracer attached.
    pub traced: bool,
    /// Configured proxies.
    pub proxies: Vec<String>,
    /// URL schemes with a registered handler.
    pub openable_schemes: BTreeSet<String>,
    /// `(class, selector, class_method)` triples the runtime resolves.
    pub objc_methods: BTreeSet<(String, String, bool)>,
    /// Seatbelt port reachable.
    pub seatbelt_port: bool,
    /// Privileged host port obtainable.
    pub privileged_host_port: bool,
    /// Trust-cache membership.
    pub trust_cache: Option<bool>,
    /// A shared executable region exists.
    pub shared_executable_region: bool,
    /// Root mount source.
    pub root_mount_source: Option<String>,
    /// Root read-only.
    pub root_read_only: Option<bool>,
    /// Listening local ports.
    pub open_ports: BTreeSet<u16>,
    /// Optional gate that holds the first primitive call.
    pub gate: Option<Arc<ScanGate>>,
    /// Primitive call bookkeeping; leave at its default.
    pub usage: CallLog,
}

/// Counts primitive calls and remembers whether the gate was passed.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: AtomicUsize,
    gate_used: AtomicBool,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self {
            environment: BTreeMap::new(),
            simulator: false,
            fork_allowed: false,
            cs_flags: Some(CsFlags::from_flags(&REQUIRED_SECURE)),
            loaded_images: Vec::new(),
            shared_cache: BTreeSet::new(),
            main_text: None,
            image_texts: BTreeMap::new(),
            exception_ports: Some(Vec::new()),
            signal_handlers: Vec::new(),
            task_port_refs: Some(1),
            parent_pid: 1,
            process_flags: Some(0),
            traced: false,
            proxies: Vec::new(),
            openable_schemes: BTreeSet::new(),
            objc_methods: BTreeSet::new(),
            seatbelt_port: false,
            privileged_host_port: false,
            trust_cache: None,
            shared_executable_region: false,
            root_mount_source: Some("com.apple.os.update-5A1B2C3D@/dev/disk1s1".into()),
            root_read_only: Some(true),
            open_ports: BTreeSet::new(),
            gate: None,
            usage: CallLog::default(),
        }
    }
}

impl SimulatedPlatform {
    /// A clean platform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of primitive calls made so far.
    pub fn calls(&self) -> usize {
        self.usage.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.usage.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if !self.usage.gate_used.swap(true, Ordering::SeqCst) {
                gate.pass();
            }
        }
    }
}

impl Platform for SimulatedPlatform {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        self.touch();
        self.environment.clone()
    }

    fn is_simulator(&self) -> bool {
        self.touch();
        self.simulator
    }

    fn try_fork(&self) -> Option<i32> {
        self.touch();
        self.fork_allowed.then_some(4242)
    }

    fn code_signing_flags(&self) -> Option<CsFlags> {
        self.touch();
        self.cs_flags
    }

    fn loaded_images(&self) -> Vec<String> {
        self.touch();
        self.loaded_images.clone()
    }

    fn in_shared_cache(&self, path: &str) -> bool {
        self.touch();
        self.shared_cache.contains(path)
    }

    fn loaded_text_section(&self, image: Option<&str>) -> Option<Vec<u8>> {
        self.touch();
        match image {
            None => self.main_text.clone(),
            Some(name) => self.image_texts.get(name).cloned(),
        }
    }

    fn exception_ports(&self) -> Option<Vec<ExceptionPort>> {
        self.touch();
        self.exception_ports.clone()
    }

    fn custom_signal_handlers(&self) -> Vec<i32> {
        self.touch();
        self.signal_handlers.clone()
    }

    fn task_port_send_refs(&self) -> Option<u32> {
        self.touch();
        self.task_port_refs
    }

    fn parent_pid(&self) -> i32 {
        self.touch();
        self.parent_pid
    }

    fn process_flags(&self) -> Option<u32> {
        self.touch();
        self.process_flags
    }

    fn is_traced(&self) -> bool {
        self.touch();
        self.traced
    }

    fn proxies(&self) -> Vec<String> {
        self.touch();
        self.proxies.clone()
    }

    fn can_open_url(&self, scheme: &str) -> bool {
        self.touch();
        self.openable_schemes.contains(scheme)
    }

    fn resolves_objc_method(&self, class: &str, selector: &str, class_method: bool) -> bool {
        self.touch();
        self.objc_methods
            .contains(&(class.to_string(), selector.to_string(), class_method))
    }

    fn has_seatbelt_port(&self) -> bool {
        self.touch();
        self.seatbelt_port
    }

    fn has_privileged_host_port(&self) -> bool {
        self.touch();
        self.privileged_host_port
    }

    fn in_trust_cache(&self) -> Option<bool> {
        self.touch();
        self.trust_cache
    }

    fn has_shared_executable_region(&self) -> bool {
        self.touch();
        self.shared_executable_region
    }

    fn root_mount_source(&self) -> Option<String> {
        self.touch();
        self.root_mount_source.clone()
    }

    fn root_is_read_only(&self) -> Option<bool> {
        self.touch();
        self.root_read_only
    }

    fn can_connect_local(&self, port: u16) -> bool {
        self.touch();
        self.open_ports.contains(&port)
    }
}
