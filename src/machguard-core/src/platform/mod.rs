//! Operating-system primitives used by the probe catalog.
//!
//! Every probe that needs process or kernel state reaches it through the
//! [`Platform`] trait. [`NativePlatform`] binds to the host OS (Mach and
//! dyld on Darwin, procfs on Linux); [`SimulatedPlatform`] is a
//! deterministic stand-in that tests drive to any state.
//!
//! Filesystem probes (suspicious paths, writable directories, symbolic
//! links) use the real filesystem directly and do not go through here.

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod darwin;
mod simulated;

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use crate::security::CsFlags;

pub use simulated::{CallLog, ScanGate, SimulatedPlatform};

/// `THREAD_STATE_NONE` flavor for the host architecture.
#[cfg(target_arch = "aarch64")]
pub const THREAD_STATE_NONE: i32 = 5;
/// `THREAD_STATE_NONE` flavor for the host architecture.
#[cfg(not(target_arch = "aarch64"))]
pub const THREAD_STATE_NONE: i32 = 13;

/// `P_SELECT` in `kinfo_proc.kp_proc.p_flag`.
pub const P_SELECT: u32 = 0x0000_0040;
/// `P_TRACED` in `kinfo_proc.kp_proc.p_flag`.
pub const P_TRACED: u32 = 0x0000_0800;

const PORT_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// One registered task exception port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionPort {
    /// Exception mask the handler covers.
    pub mask: u32,
    /// Handler port name (0 = none).
    pub handler: u32,
    /// Delivery behavior.
    pub behavior: i32,
    /// Thread-state flavor delivered with the exception.
    pub flavor: i32,
}

/// Process and kernel introspection primitives.
///
/// Methods that return `Option` use `None` for "the primitive failed";
/// probes decide per check whether that counts as a pass or a failure.
pub trait Platform: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Environment of the running process.
    fn environment(&self) -> BTreeMap<String, String>;

    /// Running inside a simulator or emulator.
    fn is_simulator(&self) -> bool;

    /// Attempt to fork. Returns the child pid when the fork succeeded; the
    /// child has already been terminated and reaped when this returns.
    fn try_fork(&self) -> Option<i32>;

    /// Code-signing status bitmask of the running process (`csops`).
    fn code_signing_flags(&self) -> Option<CsFlags>;

    /// Paths of every image loaded in the process, main executable first.
    fn loaded_images(&self) -> Vec<String>;

    /// Whether `path` is served from the dyld shared cache.
    fn in_shared_cache(&self, path: &str) -> bool;

    /// Bytes of `__TEXT,__text` of a loaded image, read from memory.
    /// `None` selects the main executable.
    fn loaded_text_section(&self, image: Option<&str>) -> Option<Vec<u8>>;

    /// Task exception ports for every exception type.
    fn exception_ports(&self) -> Option<Vec<ExceptionPort>>;

    /// Signal numbers with a non-default disposition.
    fn custom_signal_handlers(&self) -> Vec<i32>;

    /// User references on the send right of the task's own port.
    fn task_port_send_refs(&self) -> Option<u32>;

    /// Parent process id.
    fn parent_pid(&self) -> i32;

    /// `p_flag` of the running process.
    fn process_flags(&self) -> Option<u32>;

    /// A tracer is attached.
    fn is_traced(&self) -> bool;

    /// Configured HTTP/HTTPS proxies, as `kind=host:port` strings.
    fn proxies(&self) -> Vec<String>;

    /// The given URL scheme has a registered handler.
    fn can_open_url(&self, scheme: &str) -> bool;

    /// The Objective-C runtime resolves `class` and `selector`.
    fn resolves_objc_method(&self, class: &str, selector: &str, class_method: bool) -> bool;

    /// The seatbelt special port is reachable from the task.
    fn has_seatbelt_port(&self) -> bool;

    /// The task can obtain a privileged host port.
    fn has_privileged_host_port(&self) -> bool;

    /// Whether the executable's cdhash is in the static trust cache.
    fn in_trust_cache(&self) -> Option<bool>;

    /// An executable region is shared with another task.
    fn has_shared_executable_region(&self) -> bool;

    /// Mount source of the root volume (`f_mntfromname`).
    fn root_mount_source(&self) -> Option<String>;

    /// Root volume is mounted read-only.
    fn root_is_read_only(&self) -> Option<bool>;

    /// A TCP connection to `127.0.0.1:port` succeeds.
    fn can_connect_local(&self, port: u16) -> bool;
}

/// Host operating system primitives.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePlatform;

impl NativePlatform {
    /// Create the native platform.
    pub fn new() -> Self {
        Self
    }
}

impl Platform for NativePlatform {
    fn name(&self) -> &'static str {
        "native"
    }

    fn environment(&self) -> BTreeMap<String, String> {
        std::env::vars_os()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.to_string_lossy().into_owned(),
                )
            })
            .collect()
    }

    fn is_simulator(&self) -> bool {
        cfg!(all(target_os = "ios", target_arch = "x86_64"))
            || std::env::var_os("SIMULATOR_DEVICE_NAME").is_some()
    }

    fn try_fork(&self) -> Option<i32> {
        fork_and_reap()
    }

    fn code_signing_flags(&self) -> Option<CsFlags> {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::code_signing_flags()
        }
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        {
            None
        }
    }

    fn loaded_images(&self) -> Vec<String> {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::loaded_images()
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            linux::loaded_images()
        }
        #[cfg(not(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "linux",
            target_os = "android"
        )))]
        {
            Vec::new()
        }
    }

    fn in_shared_cache(&self, path: &str) -> bool {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::in_shared_cache(path)
        }
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        {
            let _ = path;
            false
        }
    }

    fn loaded_text_section(&self, image: Option<&str>) -> Option<Vec<u8>> {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::loaded_text_section(image)
        }
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        {
            let _ = image;
            None
        }
    }

    fn exception_ports(&self) -> Option<Vec<ExceptionPort>> {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::exception_ports()
        }
        // No Mach exception ports exist outside Darwin.
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        {
            Some(Vec::new())
        }
    }

    fn custom_signal_handlers(&self) -> Vec<i32> {
        #[cfg(unix)]
        {
            unix::custom_signal_handlers()
        }
        #[cfg(not(unix))]
        {
            Vec::new()
        }
    }

    fn task_port_send_refs(&self) -> Option<u32> {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::task_port_send_refs()
        }
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        {
            Some(1)
        }
    }

    fn parent_pid(&self) -> i32 {
        #[cfg(unix)]
        {
            // SAFETY: getppid has no preconditions and cannot fail.
            unsafe { libc::getppid() }
        }
        #[cfg(not(unix))]
        {
            0
        }
    }

    fn process_flags(&self) -> Option<u32> {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::process_flags()
        }
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        {
            None
        }
    }

    fn is_traced(&self) -> bool {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::process_flags().is_some_and(|flags| flags & P_TRACED != 0)
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            linux::tracer_pid().is_some_and(|pid| pid != 0)
        }
        #[cfg(not(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "linux",
            target_os = "android"
        )))]
        {
            false
        }
    }

    fn proxies(&self) -> Vec<String> {
        let mut found = proxies_from_env(&self.environment());
        #[cfg(target_os = "macos")]
        found.extend(darwin::system_proxies());
        found
    }

    fn can_open_url(&self, scheme: &str) -> bool {
        // Scheme handlers are only queryable from an application host; a
        // host embedding the engine supplies its own Platform for this.
        tracing::trace!(scheme, "can_open_url: not queryable from this process");
        false
    }

    fn resolves_objc_method(&self, class: &str, selector: &str, class_method: bool) -> bool {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::resolves_objc_method(class, selector, class_method)
        }
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        {
            let _ = (class, selector, class_method);
            false
        }
    }

    fn has_seatbelt_port(&self) -> bool {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::has_seatbelt_port()
        }
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        {
            false
        }
    }

    fn has_privileged_host_port(&self) -> bool {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::has_privileged_host_port()
        }
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        {
            false
        }
    }

    fn in_trust_cache(&self) -> Option<bool> {
        None
    }

    fn has_shared_executable_region(&self) -> bool {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::has_shared_executable_region()
        }
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        {
            false
        }
    }

    fn root_mount_source(&self) -> Option<String> {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            darwin::root_mount_source()
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            linux::root_mount_source()
        }
        #[cfg(not(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "linux",
            target_os = "android"
        )))]
        {
            None
        }
    }

    fn root_is_read_only(&self) -> Option<bool> {
        #[cfg(unix)]
        {
            unix::is_read_only("/")
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    fn can_connect_local(&self, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        TcpStream::connect_timeout(&addr, PORT_CONNECT_TIMEOUT).is_ok()
    }
}

/// Proxy settings exported through the usual environment variables.
pub fn proxies_from_env(env: &BTreeMap<String, String>) -> Vec<String> {
    ["HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY"]
        .iter()
        .filter_map(|key| {
            env.get(*key)
                .or_else(|| env.get(&key.to_ascii_lowercase()))
                .filter(|value| !value.trim().is_empty())
                .map(|value| format!("{}={}", key.to_ascii_lowercase(), value.trim()))
        })
        .collect()
}

#[cfg(unix)]
fn fork_and_reap() -> Option<i32> {
    // SAFETY: the child only calls the async-signal-safe `_exit`.
    let pid = unsafe { libc::fork() };
    match pid {
        0 => unsafe { libc::_exit(0) },
        pid if pid > 0 => {
            // SAFETY: pid is our own child.
            unsafe {
                libc::kill(pid, libc::SIGTERM);
                let mut status = 0;
                libc::waitpid(pid, &mut status, 0);
            }
            Some(pid)
        },
        _ => None,
    }
}

#[cfg(not(unix))]
fn fork_and_reap() -> Option<i32> {
    None
}

// =============================================================================
// Unix Implementations
// =============================================================================

#[cfg(unix)]
mod unix {
    use std::ffi::CString;

    // Installed by the Rust runtime itself (stack overflow reporting and
    // ignored SIGPIPE) and therefore present in every process.
    const RUNTIME_SIGNALS: [i32; 3] = [libc::SIGSEGV, libc::SIGBUS, libc::SIGPIPE];

    pub(super) fn custom_signal_handlers() -> Vec<i32> {
        (1..32)
            .filter(|sig| *sig != libc::SIGKILL && *sig != libc::SIGSTOP)
            .filter(|sig| !RUNTIME_SIGNALS.contains(sig))
            .filter(|&sig| {
                // SAFETY: querying with a null new action only reads state.
                unsafe {
                    let mut old: libc::sigaction = std::mem::zeroed();
                    libc::sigaction(sig, std::ptr::null(), &mut old) == 0
                        && old.sa_sigaction != libc::SIG_DFL
                }
            })
            .collect()
    }

    pub(super) fn is_read_only(path: &str) -> Option<bool> {
        let c_path = CString::new(path).ok()?;
        // SAFETY: c_path is NUL-terminated; stat is written only on success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return None;
            }
            Some(stat.f_flag & libc::ST_RDONLY != 0)
        }
    }
}

// =============================================================================
// Linux/Android Implementations
// =============================================================================

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux {
    use std::collections::BTreeSet;

    pub(super) fn tracer_pid() -> Option<i32> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        status
            .lines()
            .find_map(|line| line.strip_prefix("TracerPid:"))
            .and_then(|value| value.trim().parse().ok())
    }

    pub(super) fn loaded_images() -> Vec<String> {
        let exe = std::env::current_exe()
            .map(|path| path.to_string_lossy().into_owned())
            .ok();
        let maps = std::fs::read_to_string("/proc/self/maps").unwrap_or_default();

        let mut seen = BTreeSet::new();
        let mut images: Vec<String> = exe.iter().cloned().collect();
        seen.extend(exe);
        for path in maps
            .lines()
            .filter_map(|line| line.split_whitespace().nth(5))
            .filter(|path| path.starts_with('/'))
        {
            if seen.insert(path.to_string()) {
                images.push(path.to_string());
            }
        }
        images
    }

    pub(super) fn root_mount_source() -> Option<String> {
        let mounts = std::fs::read_to_string("/proc/self/mounts").ok()?;
        mounts
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = fields.next()?;
                let target = fields.next()?;
                (target == "/").then(|| source.to_string())
            })
            .last()
    }
}
