//! Configuration for the check engine.

use std::path::PathBuf;

/// Environment variable naming the signature database plist.
pub const ENV_SIGNATURES: &str = "MACHGUARD_SIGNATURES";
/// Environment variable naming the bundle root.
pub const ENV_BUNDLE: &str = "MACHGUARD_BUNDLE";
/// Environment variable overriding the main executable.
pub const ENV_EXECUTABLE: &str = "MACHGUARD_EXECUTABLE";
/// Environment variable overriding the bundle identifier.
pub const ENV_BUNDLE_ID: &str = "MACHGUARD_BUNDLE_ID";

/// Configuration for the check engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Detection signature database (plist). When unset or unusable, the
    /// bundle's `SecurityPresets.plist` resource is tried; if that is
    /// missing too, the empty defaults apply.
    pub signatures_path: Option<PathBuf>,
    /// Application bundle directory. Defaults to the directory of the
    /// running executable.
    pub bundle_root: Option<PathBuf>,
    /// Main executable. Defaults to `std::env::current_exe()`.
    pub executable: Option<PathBuf>,
    /// Overrides `CFBundleIdentifier` from `Info.plist`.
    pub bundle_identifier: Option<String>,
}

impl EngineConfig {
    /// Build a configuration from `MACHGUARD_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());
        Self {
            signatures_path: non_empty(ENV_SIGNATURES).map(PathBuf::from),
            bundle_root: non_empty(ENV_BUNDLE).map(PathBuf::from),
            executable: non_empty(ENV_EXECUTABLE).map(PathBuf::from),
            bundle_identifier: non_empty(ENV_BUNDLE_ID),
        }
    }
}
