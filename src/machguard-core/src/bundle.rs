//! Application bundle layout.
//!
//! Resolves the artifacts the integrity checks hash: the main executable,
//! `embedded.mobileprovision`, named resources and the bundle identifier
//! from `Info.plist`. Handles both flat (iOS) and `Contents/` (macOS)
//! bundle layouts.

use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::error::SignatureSetError;

const INFO_PLIST: &str = "Info.plist";
const CONTENTS_DIR: &str = "Contents";
const RESOURCES_DIR: &str = "Resources";
const EXECUTABLE_DIR: &str = "MacOS";
const PROVISIONING_PROFILE: &str = "embedded.mobileprovision";
const KEY_BUNDLE_IDENTIFIER: &str = "CFBundleIdentifier";
const KEY_BUNDLE_EXECUTABLE: &str = "CFBundleExecutable";

/// Paths and identity of the application under inspection.
#[derive(Debug, Clone, Default)]
pub struct AppBundle {
    /// Bundle root directory.
    pub root: PathBuf,
    /// Main executable.
    pub executable: Option<PathBuf>,
    /// `CFBundleIdentifier`, or the configured override.
    pub identifier: Option<String>,
}

impl AppBundle {
    /// Resolve the bundle for the running process, honoring overrides.
    pub fn locate(config: &EngineConfig) -> Self {
        let current_exe = std::env::current_exe().ok();
        let executable = config.executable.clone().or_else(|| current_exe.clone());
        let root = config
            .bundle_root
            .clone()
            .or_else(|| {
                executable
                    .as_deref()
                    .and_then(Path::parent)
                    .map(Path::to_path_buf)
            })
            .unwrap_or_default();

        let info = read_info_plist(&root);
        let identifier = config.bundle_identifier.clone().or_else(|| {
            info.as_ref()
                .and_then(|dict| dict.get(KEY_BUNDLE_IDENTIFIER))
                .and_then(plist::Value::as_string)
                .map(str::to_string)
        });

        tracing::debug!(
            root = %root.display(),
            executable = ?executable,
            identifier = ?identifier,
            "AppBundle: located"
        );

        Self {
            root,
            executable,
            identifier,
        }
    }

    /// Open a bundle directory on disk. The directory must carry an
    /// `Info.plist` (flat or under `Contents/`).
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SignatureSetError> {
        let root = root.as_ref().to_path_buf();
        let info = read_info_plist(&root).ok_or_else(|| SignatureSetError::InvalidBundle {
            message: format!("no readable Info.plist under {}", root.display()),
        })?;

        let identifier = info
            .get(KEY_BUNDLE_IDENTIFIER)
            .and_then(plist::Value::as_string)
            .map(str::to_string);
        let executable = info
            .get(KEY_BUNDLE_EXECUTABLE)
            .and_then(plist::Value::as_string)
            .map(|name| executable_dir(&root).join(name))
            .filter(|path| path.is_file());

        Ok(Self {
            root,
            executable,
            identifier,
        })
    }

    /// Whether this is a `Contents/`-style bundle.
    pub fn is_nested(&self) -> bool {
        self.root.join(CONTENTS_DIR).join(INFO_PLIST).is_file()
    }

    /// Directory holding bundle resources.
    pub fn resources_dir(&self) -> PathBuf {
        let nested = self.root.join(CONTENTS_DIR).join(RESOURCES_DIR);
        if nested.is_dir() {
            nested
        } else {
            self.root.clone()
        }
    }

    /// Path of a named resource, if it exists.
    pub fn resource_path(&self, name: &str) -> Option<PathBuf> {
        [self.resources_dir().join(name), self.root.join(name)]
            .into_iter()
            .find(|path| path.is_file())
    }

    /// Path of the embedded provisioning profile, if it exists.
    pub fn provisioning_profile(&self) -> Option<PathBuf> {
        [
            self.root.join(PROVISIONING_PROFILE),
            self.root.join(CONTENTS_DIR).join(PROVISIONING_PROFILE),
        ]
        .into_iter()
        .find(|path| path.is_file())
    }

    /// Directory containing the main executable.
    pub fn executable_dir(&self) -> Option<String> {
        self.executable
            .as_deref()
            .and_then(Path::parent)
            .map(|dir| dir.to_string_lossy().into_owned())
    }
}

fn executable_dir(root: &Path) -> PathBuf {
    let nested = root.join(CONTENTS_DIR).join(EXECUTABLE_DIR);
    if nested.is_dir() {
        nested
    } else {
        root.to_path_buf()
    }
}

fn read_info_plist(root: &Path) -> Option<plist::Dictionary> {
    [root.join(INFO_PLIST), root.join(CONTENTS_DIR).join(INFO_PLIST)]
        .iter()
        .filter(|path| path.is_file())
        .find_map(|path| match plist::from_file::<_, plist::Dictionary>(path) {
            Ok(dict) => Some(dict),
            Err(e) => {
                tracing::warn!("read_info_plist: {} unreadable: {}", path.display(), e);
                None
            },
        })
}
