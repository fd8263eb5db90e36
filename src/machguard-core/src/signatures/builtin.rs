//! Curated reference lists.

use super::{DetectionSignatureSet, MethodType, ObjCClassItem, PortItem, UrlSchemeItem};

const SECURE_STANDALONE_LIBRARIES: &[&str] = &[
    "/usr/lib/libBacktraceRecording.dylib",
    "/usr/lib/libMainThreadChecker.dylib",
    "/usr/lib/libRPAC.dylib",
    "/usr/lib/libViewDebuggerSupport.dylib",
    "/usr/lib/libobjc-trampolines.dylib",
    "/usr/lib/system/introspection/libdispatch.dylib",
    "/private/preboot/Cryptexes/OS/usr/lib/libobjc-trampolines.dylib",
    "/private/preboot/Cryptexes/OS/usr/lib/libglInterpose.dylib",
];

const SECURE_ENTITLEMENT_KEYS: &[&str] = &[
    "get-task-allow",
    "application-identifier",
    "keychain-access-groups",
    "com.apple.developer.team-identifier",
    "com.apple.security.app-sandbox",
    "com.apple.security.network.client",
    "com.apple.private.security.container-required",
    "beta-reports-active",
    "aps-environment",
];

const INSECURE_ENVIRONMENT_VARIABLES: &[&str] = &[
    "_MSSafeMode",
    "DYLD_FRAMEWORK_PATH",
    "DYLD_FALLBACK_FRAMEWORK_PATH",
    "DYLD_VERSIONED_FRAMEWORK_PATH",
    "DYLD_LIBRARY_PATH",
    "DYLD_FALLBACK_LIBRARY_PATH",
    "DYLD_VERSIONED_LIBRARY_PATH",
    "DYLD_IMAGE_SUFFIX",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_PRINT_TO_FILE",
    "DYLD_PRINT_LIBRARIES",
    "DYLD_PRINT_LOADERS",
    "DYLD_PRINT_SEARCHING",
    "DYLD_PRINT_APIS",
    "DYLD_PRINT_BINDINGS",
    "DYLD_PRINT_INITIALIZERS",
    "DYLD_PRINT_SEGMENTS",
    "DYLD_PRINT_ENV",
    "DYLD_SHARED_REGION",
    "DYLD_SHARED_CACHE_DIR",
];

const SUSPICIOUS_EXECUTABLES: &[&str] = &["/usr/sbin/frida-server"];

const SUSPICIOUS_LIBRARY_NAMES: &[&str] =
    &["FridaGadget", "frida", "cynject", "libcycript", "RevealServer"];

const SUSPICIOUS_LIBRARIES: &[&str] = &[
    "SubstrateLoader.dylib",
    "SSLKillSwitch2.dylib",
    "SSLKillSwitch.dylib",
    "MobileSubstrate.dylib",
    "TweakInject.dylib",
    "CydiaSubstrate",
    "cynject",
    "CustomWidgetIcons",
    "PreferenceLoader",
    "RocketBootstrap",
    "WeeLoader",
    // HideJB rewrites hidden library paths to this
    "/.file",
    "libhooker",
    "SubstrateInserter",
    "SubstrateBootstrap",
    "ABypass",
    "FlyJB",
    "Substitute",
    "Cephei",
    "Electra",
    "AppSyncUnified-FrontBoard.dylib",
    "Shadow",
    "FridaGadget",
    "frida",
    "libcycript",
];

const SUSPICIOUS_FILES: &[&str] = &[
    // A-Bypass
    "/var/mobile/Library/Preferences/ABPattern",
    "/usr/lib/ABDYLD.dylib",
    "/usr/lib/ABSubLoader.dylib",
    "/Library/BawAppie/ABypass",
    "/usr/sbin/frida-server",
    // electra
    "/etc/apt/sources.list.d/electra.list",
    "/etc/apt/sources.list.d/sileo.sources",
    "/.bootstrapped_electra",
    "/usr/lib/libjailbreak.dylib",
    "/jb/lzma",
    // unc0ver
    "/.cydia_no_stash",
    "/.installed_unc0ver",
    "/jb/offsets.plist",
    "/usr/share/jailbreak/injectme.plist",
    "/etc/apt/undecimus/undecimus.list",
    "/var/lib/dpkg/info/mobilesubstrate.md5sums",
    "/jb/jailbreakd.plist",
    "/jb/amfid_payload.dylib",
    "/jb/libjailbreak.dylib",
    // checkra1n
    "/var/binpack",
    "/var/binpack/Applications/loader.app",
    // substrate and friends
    "/Library/MobileSubstrate/MobileSubstrate.dylib",
    "/Library/MobileSubstrate/CydiaSubstrate.dylib",
    "/Library/MobileSubstrate/DynamicLibraries",
    "/Library/MobileSubstrate/DynamicLibraries/Veency.plist",
    "/Library/MobileSubstrate/DynamicLibraries/LiveClock.plist",
    "/Library/MobileSubstrate/DynamicLibraries/SSLKillSwitch2.plist",
    "/Library/MobileSubstrate/DynamicLibraries/PreferenceLoader.plist",
    "/Library/MobileSubstrate/DynamicLibraries/PreferenceLoader.dylib",
    "/usr/lib/libhooker.dylib",
    "/usr/lib/libsubstitute.dylib",
    "/usr/lib/substrate",
    "/usr/lib/TweakInject",
    "/var/mobile/.ekenablelogging",
    "/var/mobile/.eksafemode",
    // package managers
    "/usr/libexec/cydia/firmware.sh",
    "/var/lib/cydia",
    "/etc/apt",
    "/private/var/lib/apt",
    "/private/var/lib/apt/",
    "/private/var/lib/cydia",
    "/private/var/cache/apt/",
    "/private/var/tmp/cydia.log",
    "/var/log/apt",
    "/Applications/Cydia.app",
    "/Applications/Sileo.app",
    "/var/mobile/Library/Sileo",
    "/var/mobile/Library/Preferences/org.coolstar.SileoStore.plist",
    "/Applications/Zebra.app",
    "/var/mobile/Library/Application Support/xyz.willy.Zebra",
    "/var/mobile/Library/Preferences/xyz.willy.Zebra.plist",
    "/System/Library/LaunchDaemons/com.saurik.Cydia.Startup.plist",
    "/System/Library/LaunchDaemons/com.ikey.bbot.plist",
    // shells and remote access
    "/private/var/stash",
    "/private/var/apt",
    "/private/var/ssh",
    "/private/var/master.passwd",
    "/private/var/sudo_logsrvd.conf",
    "/private/var/suid_profile",
    "/private/var/zlogin",
    "/private/var/zlogout",
    "/private/var/zprofile",
    "/private/var/zshenv",
    "/private/var/zshrc",
    "/private/var/Users/",
    "/private/var/log/syslog",
    "/var/root/.bash_history",
    "/var/root/Library/Caches/shshd",
    "/var/root/Library/HTTPStorages/shshd",
    // tweak tools and apps
    "/Applications/Icy.app",
    "/Applications/MxTube.app",
    "/Applications/RockApp.app",
    "/Applications/blackra1n.app",
    "/Applications/SBSettings.app",
    "/Applications/FakeCarrier.app",
    "/Applications/WinterBoard.app",
    "/Applications/IntelliScreen.app",
    "/Applications/iFile.app",
    "/Applications/Filza.app",
    "/var/mobile/Library/Filza",
    "/var/mobile/Library/Preferences/com.tigisoftware.Filza.plist",
    "/Applications/Flex3.app",
    "/var/mobile/Library/Flex3",
    "/Applications/NewTerm.app",
    "/var/mobile/Library/Preferences/ws.hbang.Terminal.plist",
    "/var/mobile/Library/Caches/Cephei",
    "/Applications/FlyJB.app",
    "/var/root/Library/Preferences/com.xina.jailbreak.plist",
    "/var/mobile/Library/Preferences/com.xina.jailbreak.plist",
    "/private/var/mobile/Library/SBSettings/Themes",
    "/var/mobile/Library/Preferences/me.jjolano.shadow.plist",
    "/var/mobile/Library/Preferences/ru.domo.cocoatop64.plist",
    "/Library/PreferenceBundles/LibertyPref.bundle",
    "/Library/PreferenceBundles/ShadowPreferences.bundle",
    "/Library/PreferenceBundles/ABypassPrefs.bundle",
    "/Library/PreferenceBundles/FlyJBPrefs.bundle",
    "/Library/PreferenceBundles/Cephei.bundle",
    "/Library/PreferenceBundles/SubstitutePrefs.bundle",
    "/Library/PreferenceBundles/libhbangprefs.bundle",
];

const SUSPICIOUS_INTERPRETERS: &[&str] = &[
    "/bin/bash",
    "/usr/sbin/sshd",
    "/usr/libexec/ssh-keysign",
    "/bin/sh",
    "/etc/ssh/sshd_config",
    "/usr/libexec/sftp-server",
    "/usr/bin/ssh",
];

const SUSPICIOUS_ACCESSIBLE_FILES: &[&str] = &[
    "/.installed_unc0ver",
    "/.bootstrapped_electra",
    "/Applications/Cydia.app",
    "/Library/MobileSubstrate/MobileSubstrate.dylib",
    "/etc/apt",
    "/var/log/apt",
];

const SUSPICIOUS_ACCESSIBLE_INTERPRETERS: &[&str] = &["/bin/bash", "/usr/sbin/sshd", "/usr/bin/ssh"];

const SUSPICIOUS_ACCESSIBLE_DIRECTORIES: &[&str] = &["/", "/root/", "/private/", "/jb/", "/Library/"];

const SUSPICIOUS_SYMBOLIC_LINKS: &[&str] = &[
    "/var/lib/undecimus/apt",
    "/Applications",
    "/Library/Ringtones",
    "/Library/Wallpaper",
    "/usr/arm-apple-darwin9",
    "/usr/include",
    "/usr/libexec",
    "/usr/share",
];

const SUSPICIOUS_PORTS: &[(u16, &str)] = &[
    (46952, "X.X.T."),
    (27042, "Frida Server"),
    (4444, "Frida Gadget"),
    (22, "OpenSSH"),
    (44, "Checkra1n"),
];

const SUSPICIOUS_URL_SCHEMES: &[(&str, &str)] = &[
    ("cydia://", "Cydia"),
    ("undecimus://", "Unc0ver"),
    ("sileo://", "Sileo"),
    ("zbra://", "Zebra"),
    ("filza://", "Filza"),
    ("activator://", "Activator"),
];

fn strings<C: FromIterator<String>>(items: &[&str]) -> C {
    items.iter().map(|s| (*s).to_string()).collect()
}

pub(super) fn signature_set() -> DetectionSignatureSet {
    DetectionSignatureSet {
        secure_standalone_libraries: strings(SECURE_STANDALONE_LIBRARIES),
        secure_entitlement_keys: strings(SECURE_ENTITLEMENT_KEYS),
        insecure_environment_variables: strings(INSECURE_ENVIRONMENT_VARIABLES),
        suspicious_executables: strings(SUSPICIOUS_EXECUTABLES),
        suspicious_library_names: strings(SUSPICIOUS_LIBRARY_NAMES),
        suspicious_libraries: strings(SUSPICIOUS_LIBRARIES),
        suspicious_files: strings(SUSPICIOUS_FILES),
        suspicious_interpreters: strings(SUSPICIOUS_INTERPRETERS),
        suspicious_accessible_files: strings(SUSPICIOUS_ACCESSIBLE_FILES),
        suspicious_accessible_interpreters: strings(SUSPICIOUS_ACCESSIBLE_INTERPRETERS),
        suspicious_accessible_directories: strings(SUSPICIOUS_ACCESSIBLE_DIRECTORIES),
        suspicious_symbolic_links: strings(SUSPICIOUS_SYMBOLIC_LINKS),
        suspicious_ports: SUSPICIOUS_PORTS
            .iter()
            .map(|(port, description)| PortItem {
                port: *port,
                description: (*description).to_string(),
            })
            .collect(),
        suspicious_url_schemes: SUSPICIOUS_URL_SCHEMES
            .iter()
            .map(|(scheme, description)| UrlSchemeItem {
                scheme: (*scheme).to_string(),
                description: (*description).to_string(),
            })
            .collect(),
        suspicious_objc_classes: vec![ObjCClassItem {
            class_name: "ShadowRuleset".into(),
            selector_name: "internalDictionary".into(),
            method_type: MethodType::Instance,
        }],
        ..DetectionSignatureSet::default()
    }
}
