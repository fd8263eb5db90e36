//! Detection signature database.
//!
//! Static reference data the probes compare against: known jailbreak and
//! instrumentation artifacts, and the digests of what the application
//! shipped. Loaded once at startup from a property list (a configured
//! path, or `SecurityPresets.plist` inside the application bundle) and
//! read-only afterwards.
//!
//! A missing or unparseable database degrades to the empty set ("nothing
//! flagged") instead of refusing to start.

mod builtin;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bundle::AppBundle;
use crate::error::SignatureSetError;
use crate::security::{hash_file, IntegrityTarget, IntegrityVerifier};

/// File name the database is shipped under inside a bundle.
pub const PRESETS_FILE_NAME: &str = "SecurityPresets.plist";

/// A listening port associated with a tool.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortItem {
    /// TCP port on the loopback interface.
    pub port: u16,
    /// Tool name.
    pub description: String,
}

/// A URL scheme registered by a tool.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UrlSchemeItem {
    /// Scheme including `://`.
    pub scheme: String,
    /// Tool name.
    pub description: String,
}

/// Kind of Objective-C method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodType {
    /// Class method (`+`).
    Clazz,
    /// Instance method (`-`).
    Instance,
}

/// An Objective-C class and selector injected by a tool.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjCClassItem {
    /// Runtime class name.
    pub class_name: String,
    /// Selector name.
    pub selector_name: String,
    /// Class or instance method.
    pub method_type: MethodType,
}

impl ObjCClassItem {
    /// Whether this refers to a class method.
    pub fn is_class_method(&self) -> bool {
        self.method_type == MethodType::Clazz
    }
}

impl fmt::Display for ObjCClassItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.is_class_method() { '+' } else { '-' };
        write!(f, "{prefix} [{} {}]", self.class_name, self.selector_name)
    }
}

/// The detection signature database.
///
/// Every field is optional on load and defaults to empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionSignatureSet {
    /// Libraries outside the system paths that may legitimately load.
    pub secure_standalone_libraries: BTreeSet<String>,
    /// Entitlement keys the application is expected to carry.
    pub secure_entitlement_keys: BTreeSet<String>,
    /// Accepted bundle identifiers.
    pub secure_main_bundle_identifiers: BTreeSet<String>,
    /// Accepted provisioning-profile digests.
    pub secure_mobile_provisioning_profile_hashes: BTreeSet<String>,
    /// Accepted `__TEXT,__text` digests of the main executable.
    #[serde(rename = "secureMainExecutableMachOHashes")]
    pub secure_main_executable_macho_hashes: BTreeSet<String>,
    /// Accepted digests of named resources.
    pub secure_resource_hashes: BTreeMap<String, String>,
    /// Environment variables that indicate injection or tracing.
    pub insecure_environment_variables: BTreeSet<String>,
    /// Instrumentation executables.
    pub suspicious_executables: BTreeSet<String>,
    /// Library name fragments of instrumentation frameworks.
    pub suspicious_library_names: BTreeSet<String>,
    /// Library name fragments of tweak and hooking frameworks.
    pub suspicious_libraries: BTreeSet<String>,
    /// Files left behind by jailbreaks and package managers.
    pub suspicious_files: BTreeSet<String>,
    /// Shells and remote-access binaries absent on stock devices.
    pub suspicious_interpreters: BTreeSet<String>,
    /// Files a sandboxed process must not be able to open.
    pub suspicious_accessible_files: BTreeSet<String>,
    /// Interpreters a sandboxed process must not be able to open.
    pub suspicious_accessible_interpreters: BTreeSet<String>,
    /// Directories a sandboxed process must not be able to write.
    pub suspicious_accessible_directories: BTreeSet<String>,
    /// Paths that are real directories on stock devices.
    pub suspicious_symbolic_links: BTreeSet<String>,
    /// Loopback ports of instrumentation servers.
    pub suspicious_ports: Vec<PortItem>,
    /// URL schemes of package managers and tweak tools.
    #[serde(rename = "suspiciousURLSchemes")]
    pub suspicious_url_schemes: Vec<UrlSchemeItem>,
    /// Classes injected by hiding tweaks.
    #[serde(rename = "suspiciousObjCClasses")]
    pub suspicious_objc_classes: Vec<ObjCClassItem>,
}

impl DetectionSignatureSet {
    /// An empty database.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The curated reference lists shipped with the crate. Application
    /// specific digests and identifiers are left empty.
    pub fn builtin() -> Self {
        builtin::signature_set()
    }

    /// Load a database from a property list.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SignatureSetError> {
        let path = path.as_ref();
        let set: Self = plist::from_file(path)?;
        info!(
            path = %path.display(),
            files = set.suspicious_files.len(),
            libraries = set.suspicious_libraries.len(),
            "DetectionSignatureSet: loaded"
        );
        Ok(set)
    }

    /// Load a database, falling back to the empty set on any failure.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("DetectionSignatureSet: no database configured, using empty set");
            return Self::empty();
        };
        match Self::load(path) {
            Ok(set) => set,
            Err(e) => {
                warn!(
                    "DetectionSignatureSet: {} unusable ({}), using empty set",
                    path.display(),
                    e
                );
                Self::empty()
            },
        }
    }

    /// Load the database at `explicit`, else the bundle's own
    /// [`PRESETS_FILE_NAME`] resource.
    ///
    /// The first candidate that parses wins; the empty set is used when
    /// none does.
    pub fn load_for_bundle(explicit: Option<&Path>, bundle: &AppBundle) -> Self {
        let bundled = bundle.resource_path(PRESETS_FILE_NAME);
        for path in explicit.into_iter().chain(bundled.as_deref()) {
            match Self::load(path) {
                Ok(set) => return set,
                Err(e) => warn!("DetectionSignatureSet: {} unusable ({})", path.display(), e),
            }
        }
        info!(
            bundle = %bundle.root.display(),
            "DetectionSignatureSet: no usable database, using empty set"
        );
        Self::empty()
    }

    /// Persist as an XML property list, replacing `path` atomically.
    pub fn write_ahead(&self, path: impl AsRef<Path>) -> Result<(), SignatureSetError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| PRESETS_FILE_NAME.to_string());
        let staging = path.with_file_name(format!(".{file_name}.{}", uuid::Uuid::new_v4()));

        plist::to_file_xml(&staging, self)?;
        if let Err(e) = std::fs::rename(&staging, path) {
            let _ = std::fs::remove_file(&staging);
            return Err(e.into());
        }
        info!(path = %path.display(), "DetectionSignatureSet: written");
        Ok(())
    }

    /// Derive a database from `base` with the digests replaced by those of
    /// the bundle's own artifacts.
    ///
    /// Only the main executable digest, the provisioning-profile digest and
    /// the digests of resources already named in `base` are replaced;
    /// artifacts that cannot be read keep their reference values.
    pub fn from_bundle(base: &Self, bundle: &AppBundle) -> Self {
        let mut set = base.clone();
        let verifier = IntegrityVerifier::new(
            bundle.clone(),
            std::sync::Arc::new(crate::platform::NativePlatform::new()),
        );

        if let Some(executable) = &bundle.executable {
            match verifier.digest_of_text_section(&IntegrityTarget::Executable(executable.clone())) {
                Some(digest) => {
                    set.secure_main_executable_macho_hashes = BTreeSet::from([digest]);
                },
                None => warn!(
                    "from_bundle: no __TEXT,__text in {}, keeping reference digests",
                    executable.display()
                ),
            }
        }

        if let Some(digest) = bundle
            .provisioning_profile()
            .and_then(|path| hash_file(&path).ok())
        {
            set.secure_mobile_provisioning_profile_hashes = BTreeSet::from([digest]);
        }

        for (name, digest) in set.secure_resource_hashes.iter_mut() {
            match bundle.resource_path(name).map(|path| hash_file(&path)) {
                Some(Ok(actual)) => *digest = actual,
                Some(Err(e)) => warn!("from_bundle: resource {} unreadable: {}", name, e),
                None => warn!("from_bundle: resource {} not found in bundle", name),
            }
        }

        set
    }

    /// Whether every list is empty.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// `(populated, total)` signature categories.
    pub fn coverage(&self) -> (usize, usize) {
        let populated = [
            self.secure_standalone_libraries.is_empty(),
            self.secure_entitlement_keys.is_empty(),
            self.secure_main_bundle_identifiers.is_empty(),
            self.secure_mobile_provisioning_profile_hashes.is_empty(),
            self.secure_main_executable_macho_hashes.is_empty(),
            self.secure_resource_hashes.is_empty(),
            self.insecure_environment_variables.is_empty(),
            self.suspicious_executables.is_empty(),
            self.suspicious_library_names.is_empty(),
            self.suspicious_libraries.is_empty(),
            self.suspicious_files.is_empty(),
            self.suspicious_interpreters.is_empty(),
            self.suspicious_accessible_files.is_empty(),
            self.suspicious_accessible_interpreters.is_empty(),
            self.suspicious_accessible_directories.is_empty(),
            self.suspicious_symbolic_links.is_empty(),
            self.suspicious_ports.is_empty(),
            self.suspicious_url_schemes.is_empty(),
            self.suspicious_objc_classes.is_empty(),
        ];
        let total = populated.len();
        (populated.iter().filter(|empty| !**empty).count(), total)
    }
}
