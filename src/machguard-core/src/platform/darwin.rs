//! Darwin bindings: `csops`, dyld image list, Mach task ports, `sysctl`.

use std::ffi::{c_char, c_int, c_void, CStr, CString};

use super::ExceptionPort;
use crate::macho::{MachONavigator, MACH_HEADER_64_SIZE, MACH_HEADER_SIZE, MH_MAGIC, MH_MAGIC_64};
use crate::security::codesign::CS_OPS_STATUS;
use crate::security::CsFlags;

type KernReturn = c_int;
type MachPort = u32;

const KERN_SUCCESS: KernReturn = 0;
const EXC_TYPES_COUNT: usize = 14;
// EXC_MASK_BAD_ACCESS through EXC_MASK_CORPSE_NOTIFY
const EXC_MASK_ALL: u32 = 0x3ffe;
const MACH_PORT_RIGHT_SEND: u32 = 0;
const TASK_HOST_PORT: c_int = 2;
const TASK_SEATBELT_PORT: c_int = 7;
const HOST_LOCAL_NODE: c_int = -1;
const HOST_PRIV_PORT: c_int = 2;
const KERNEL_BOOT_INFO_MAX: usize = 4096;
const VM_PROT_EXECUTE: i32 = 0x4;
const SM_SHARED: u8 = 3;
const SM_SHARED_ALIASED: u8 = 7;

// Offset of sizeofcmds in both mach_header and mach_header_64.
const SIZEOFCMDS_OFFSET: usize = 20;

#[repr(C, packed(4))]
#[derive(Default, Clone, Copy)]
struct VmRegionSubmapInfo64 {
    protection: i32,
    max_protection: i32,
    inheritance: u32,
    offset: u64,
    user_tag: u32,
    pages_resident: u32,
    pages_shared_now_private: u32,
    pages_swapped_out: u32,
    pages_dirtied: u32,
    ref_count: u32,
    shadow_depth: u16,
    external_pager: u8,
    share_mode: u8,
    is_submap: i32,
    behavior: i32,
    object_id: u32,
    user_wired_count: u16,
    pages_reusable: u32,
    object_id_full: u64,
}

extern "C" {
    static mach_task_self_: MachPort;

    fn csops(pid: libc::pid_t, ops: u32, useraddr: *mut c_void, usersize: libc::size_t) -> c_int;
    fn _dyld_image_count() -> u32;
    fn _dyld_get_image_name(index: u32) -> *const c_char;
    fn _dyld_get_image_header(index: u32) -> *const u8;
    fn _dyld_get_image_vmaddr_slide(index: u32) -> isize;
    fn _dyld_shared_cache_contains_path(path: *const c_char) -> bool;

    fn mach_host_self() -> MachPort;
    fn task_get_exception_ports(
        task: MachPort,
        exception_mask: u32,
        masks: *mut u32,
        masks_count: *mut u32,
        handlers: *mut MachPort,
        behaviors: *mut i32,
        flavors: *mut i32,
    ) -> KernReturn;
    fn mach_port_get_refs(task: MachPort, name: MachPort, right: u32, refs: *mut u32) -> KernReturn;
    fn task_get_special_port(task: MachPort, which: c_int, port: *mut MachPort) -> KernReturn;
    fn host_get_special_port(
        host: MachPort,
        node: c_int,
        which: c_int,
        port: *mut MachPort,
    ) -> KernReturn;
    fn host_get_boot_info(host_priv: MachPort, boot_info: *mut c_char) -> KernReturn;
    fn vm_region_recurse_64(
        task: MachPort,
        address: *mut usize,
        size: *mut usize,
        depth: *mut u32,
        info: *mut i32,
        count: *mut u32,
    ) -> KernReturn;
}

#[link(name = "objc")]
extern "C" {
    fn objc_getClass(name: *const c_char) -> *mut c_void;
    fn sel_registerName(name: *const c_char) -> *mut c_void;
    fn class_getInstanceMethod(class: *mut c_void, selector: *mut c_void) -> *mut c_void;
    fn class_getClassMethod(class: *mut c_void, selector: *mut c_void) -> *mut c_void;
}

fn task_self() -> MachPort {
    // SAFETY: initialized by libsystem before main.
    unsafe { mach_task_self_ }
}

pub(super) fn code_signing_flags() -> Option<CsFlags> {
    let mut flags: u32 = 0;
    // SAFETY: flags outlives the call and matches usersize.
    let rc = unsafe {
        csops(
            libc::getpid(),
            CS_OPS_STATUS,
            (&mut flags as *mut u32).cast::<c_void>(),
            std::mem::size_of::<u32>(),
        )
    };
    if rc == 0 {
        Some(CsFlags(flags))
    } else {
        tracing::debug!("csops: status query failed ({})", rc);
        None
    }
}

pub(super) fn loaded_images() -> Vec<String> {
    // SAFETY: dyld returns NUL-terminated names valid while the image is loaded.
    unsafe {
        (0.._dyld_image_count())
            .filter_map(|index| {
                let name = _dyld_get_image_name(index);
                (!name.is_null()).then(|| CStr::from_ptr(name).to_string_lossy().into_owned())
            })
            .collect()
    }
}

pub(super) fn in_shared_cache(path: &str) -> bool {
    let Ok(path) = CString::new(path) else {
        return false;
    };
    // SAFETY: `path` is a valid NUL-terminated string for the duration of the call.
    unsafe { _dyld_shared_cache_contains_path(path.as_ptr()) }
}

/// Read `__TEXT,__text` of a loaded image from memory, locating it by
/// walking the in-memory load commands and applying the image slide.
pub(super) fn loaded_text_section(image: Option<&str>) -> Option<Vec<u8>> {
    // SAFETY: header pointers returned by dyld stay mapped while the image
    // is loaded; reads are bounded by the header's own sizeofcmds and the
    // section size it declares.
    unsafe {
        let index = match image {
            None => 0,
            Some(name) => (0.._dyld_image_count()).find(|&index| {
                let ptr = _dyld_get_image_name(index);
                !ptr.is_null() && CStr::from_ptr(ptr).to_string_lossy() == name
            })?,
        };
        let header = _dyld_get_image_header(index);
        if header.is_null() {
            return None;
        }
        let slide = _dyld_get_image_vmaddr_slide(index) as i64;

        let fixed = std::slice::from_raw_parts(header, MACH_HEADER_64_SIZE as usize);
        let magic = u32::from_ne_bytes(fixed[0..4].try_into().ok()?);
        let header_size = match magic {
            MH_MAGIC_64 => MACH_HEADER_64_SIZE as usize,
            MH_MAGIC => MACH_HEADER_SIZE as usize,
            _ => return None,
        };
        let sizeofcmds =
            u32::from_ne_bytes(fixed[SIZEOFCMDS_OFFSET..SIZEOFCMDS_OFFSET + 4].try_into().ok()?);

        let mapped = std::slice::from_raw_parts(header, header_size + sizeofcmds as usize);
        let mut nav = MachONavigator::from_bytes(mapped);
        let parsed = nav.classify(0).ok()?;
        let section = nav.find_section(&parsed, "__TEXT", "__text").ok()??;

        let start = section.load_address(slide) as *const u8;
        Some(std::slice::from_raw_parts(start, section.size as usize).to_vec())
    }
}

pub(super) fn exception_ports() -> Option<Vec<ExceptionPort>> {
    let mut masks = [0u32; EXC_TYPES_COUNT];
    let mut handlers = [0 as MachPort; EXC_TYPES_COUNT];
    let mut behaviors = [0i32; EXC_TYPES_COUNT];
    let mut flavors = [0i32; EXC_TYPES_COUNT];
    let mut count = EXC_TYPES_COUNT as u32;

    // SAFETY: every array holds EXC_TYPES_COUNT entries, as declared by count.
    let kr = unsafe {
        task_get_exception_ports(
            task_self(),
            EXC_MASK_ALL,
            masks.as_mut_ptr(),
            &mut count,
            handlers.as_mut_ptr(),
            behaviors.as_mut_ptr(),
            flavors.as_mut_ptr(),
        )
    };
    if kr != KERN_SUCCESS {
        tracing::debug!("task_get_exception_ports failed ({})", kr);
        return None;
    }

    let count = (count as usize).min(EXC_TYPES_COUNT);
    Some(
        (0..count)
            .map(|i| ExceptionPort {
                mask: masks[i],
                handler: handlers[i],
                behavior: behaviors[i],
                flavor: flavors[i],
            })
            .collect(),
    )
}

pub(super) fn task_port_send_refs() -> Option<u32> {
    let mut refs = 0u32;
    // SAFETY: refs is a valid out-pointer.
    let kr = unsafe { mach_port_get_refs(task_self(), task_self(), MACH_PORT_RIGHT_SEND, &mut refs) };
    (kr == KERN_SUCCESS).then_some(refs)
}

pub(super) fn has_seatbelt_port() -> bool {
    let mut port: MachPort = 0;
    // SAFETY: port is a valid out-pointer.
    unsafe { task_get_special_port(task_self(), TASK_SEATBELT_PORT, &mut port) == KERN_SUCCESS }
}

pub(super) fn has_privileged_host_port() -> bool {
    let mut port: MachPort = 0;
    // SAFETY: out-pointers are valid; the boot info buffer is
    // KERNEL_BOOT_INFO_MAX bytes as the call requires.
    unsafe {
        if host_get_special_port(mach_host_self(), HOST_LOCAL_NODE, HOST_PRIV_PORT, &mut port)
            == KERN_SUCCESS
        {
            return true;
        }
        if task_get_special_port(task_self(), TASK_HOST_PORT, &mut port) == KERN_SUCCESS {
            let mut boot_info = vec![0 as c_char; KERNEL_BOOT_INFO_MAX];
            return host_get_boot_info(port, boot_info.as_mut_ptr()) == KERN_SUCCESS;
        }
    }
    false
}

pub(super) fn has_shared_executable_region() -> bool {
    let mut address: usize = 0;
    let mut depth: u32 = 1;
    loop {
        let mut size: usize = 0;
        let mut info = VmRegionSubmapInfo64::default();
        let mut count = (std::mem::size_of::<VmRegionSubmapInfo64>() / 4) as u32;
        // SAFETY: info is sized to count natural_t words.
        let kr = unsafe {
            vm_region_recurse_64(
                task_self(),
                &mut address,
                &mut size,
                &mut depth,
                (&mut info as *mut VmRegionSubmapInfo64).cast::<i32>(),
                &mut count,
            )
        };
        let is_submap = info.is_submap != 0;
        if kr != KERN_SUCCESS || (!is_submap && size == 0) {
            return false;
        }
        if is_submap {
            depth += 1;
            continue;
        }
        let protection = info.protection;
        let share_mode = info.share_mode;
        if protection & VM_PROT_EXECUTE != 0
            && (share_mode == SM_SHARED || share_mode == SM_SHARED_ALIASED)
        {
            return true;
        }
        address = address.wrapping_add(size);
        if address == 0 {
            return false;
        }
    }
}

/// `p_flag` from `kinfo_proc` via `CTL_KERN` / `KERN_PROC` / `KERN_PROC_PID`.
pub(super) fn process_flags() -> Option<u32> {
    // Only p_flag is needed; it sits at offset 16 of extern_proc on both
    // arm64 and x86-64. The buffer is sized for the whole kinfo_proc.
    const KINFO_PROC_SIZE: usize = 648;
    const P_FLAG_OFFSET: usize = 16;

    let mut buf = [0u8; KINFO_PROC_SIZE];
    let mut size: libc::size_t = KINFO_PROC_SIZE;
    // SAFETY: buf and size describe a valid writable buffer.
    let result = unsafe {
        let mut mib: [c_int; 4] = [
            libc::CTL_KERN,
            libc::KERN_PROC,
            libc::KERN_PROC_PID,
            libc::getpid(),
        ];
        libc::sysctl(
            mib.as_mut_ptr(),
            4,
            buf.as_mut_ptr().cast::<c_void>(),
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if result != 0 || size < P_FLAG_OFFSET + 4 {
        tracing::debug!("sysctl: kinfo_proc query failed");
        return None;
    }
    let raw = buf[P_FLAG_OFFSET..P_FLAG_OFFSET + 4].try_into().ok()?;
    Some(u32::from_ne_bytes(raw))
}

pub(super) fn root_mount_source() -> Option<String> {
    let root = CString::new("/").ok()?;
    // SAFETY: root is NUL-terminated and stat is written only on success.
    unsafe {
        let mut stat: libc::statfs = std::mem::zeroed();
        if libc::statfs(root.as_ptr(), &mut stat) != 0 {
            return None;
        }
        Some(
            CStr::from_ptr(stat.f_mntfromname.as_ptr())
                .to_string_lossy()
                .into_owned(),
        )
    }
}

pub(super) fn resolves_objc_method(class: &str, selector: &str, class_method: bool) -> bool {
    let (Ok(class), Ok(selector)) = (CString::new(class), CString::new(selector)) else {
        return false;
    };
    // SAFETY: the runtime accepts any NUL-terminated name and returns null
    // for unknown classes.
    unsafe {
        let cls = objc_getClass(class.as_ptr());
        if cls.is_null() {
            return false;
        }
        let sel = sel_registerName(selector.as_ptr());
        let method = if class_method {
            class_getClassMethod(cls, sel)
        } else {
            class_getInstanceMethod(cls, sel)
        };
        !method.is_null()
    }
}

/// Enabled HTTP/HTTPS proxies from `scutil --proxy`.
#[cfg(target_os = "macos")]
pub(super) fn system_proxies() -> Vec<String> {
    match std::process::Command::new("/usr/sbin/scutil").arg("--proxy").output() {
        Ok(output) if output.status.success() => {
            parse_scutil_proxy(&String::from_utf8_lossy(&output.stdout))
        },
        Ok(_) | Err(_) => Vec::new(),
    }
}

#[cfg(target_os = "macos")]
fn parse_scutil_proxy(text: &str) -> Vec<String> {
    let value = |key: &str| {
        text.lines().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            (k.trim() == key).then(|| v.trim().to_string())
        })
    };
    [("HTTPEnable", "HTTPProxy", "HTTPPort", "http"), ("HTTPSEnable", "HTTPSProxy", "HTTPSPort", "https")]
        .iter()
        .filter(|(enable, ..)| value(enable).as_deref() == Some("1"))
        .filter_map(|(_, host, port, kind)| {
            let host = value(host)?;
            Some(format!("{kind}={host}:{}", value(port).unwrap_or_default()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loaded_images_include_main_executable() {
        let images = loaded_images();
        assert!(!images.is_empty());
    }

    #[test]
    fn test_main_text_section_is_readable() {
        let text = loaded_text_section(None).unwrap();
        assert!(!text.is_empty());
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_parse_scutil_proxy() {
        let text = "<dictionary> {\n  HTTPEnable : 1\n  HTTPPort : 8080\n  HTTPProxy : 10.0.0.2\n  HTTPSEnable : 0\n}";
        assert_eq!(parse_scutil_proxy(text), vec!["http=10.0.0.2:8080"]);
    }
}
