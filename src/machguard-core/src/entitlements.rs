//! Entitlement extraction from the code-signature container.
//!
//! The extractor is total: a corrupt or missing payload yields
//! [`Entitlements::EMPTY`], never a partial map or an error. Only the
//! structural walk leading up to the blob (`read_from_path`) can fail.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Seek};
use std::path::Path;

use crate::error::ParseError;
use crate::macho::{CodeSignatureContainer, MachONavigator};
use crate::reader::BinaryCursor;

const BLOB_HEADER_SIZE: u32 = 8;
// Entitlement payloads are small; anything larger is treated as corruption.
const MAX_PAYLOAD_SIZE: u32 = 1 << 20;

/// Well-known entitlement keys.
pub mod keys {
    /// Debuggability of the process.
    pub const GET_TASK_ALLOW: &str = "get-task-allow";
    /// Team-prefixed application identifier.
    pub const APPLICATION_IDENTIFIER: &str = "application-identifier";
    /// Developer team identifier.
    pub const TEAM_IDENTIFIER: &str = "com.apple.developer.team-identifier";
    /// Keychain sharing groups.
    pub const KEYCHAIN_ACCESS_GROUPS: &str = "keychain-access-groups";
    /// Push notification environment.
    pub const APS_ENVIRONMENT: &str = "aps-environment";
    /// App sandbox (macOS).
    pub const APP_SANDBOX: &str = "com.apple.security.app-sandbox";
    /// Shared app groups.
    pub const APPLICATION_GROUPS: &str = "com.apple.security.application-groups";
    /// Associated domains.
    pub const ASSOCIATED_DOMAINS: &str = "com.apple.developer.associated-domains";
    /// TestFlight builds.
    pub const BETA_REPORTS_ACTIVE: &str = "beta-reports-active";
}

/// Immutable mapping of entitlement keys to property-list values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entitlements {
    values: BTreeMap<String, plist::Value>,
}

impl Entitlements {
    /// The canonical empty instance.
    pub const EMPTY: Entitlements = Entitlements {
        values: BTreeMap::new(),
    };

    /// Build from an already-decoded map.
    pub fn new(values: BTreeMap<String, plist::Value>) -> Self {
        Self { values }
    }

    /// Decode a serialized property list.
    ///
    /// Returns [`Entitlements::EMPTY`] if the payload is not a dictionary.
    pub fn from_plist_bytes(data: &[u8]) -> Self {
        match plist::from_bytes::<plist::Dictionary>(data) {
            Ok(dict) => Self::new(dict.into_iter().collect()),
            Err(e) => {
                tracing::debug!("Entitlements: payload is not a plist dictionary: {}", e);
                Self::EMPTY
            },
        }
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<&plist::Value> {
        self.values.get(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw map.
    pub fn as_map(&self) -> &BTreeMap<String, plist::Value> {
        &self.values
    }

    /// `get-task-allow`, defaulting to `false`.
    pub fn get_task_allow(&self) -> bool {
        self.get(keys::GET_TASK_ALLOW)
            .and_then(plist::Value::as_boolean)
            .unwrap_or(false)
    }

    /// `application-identifier`, if present.
    pub fn application_identifier(&self) -> Option<&str> {
        self.get(keys::APPLICATION_IDENTIFIER)
            .and_then(plist::Value::as_string)
    }

    /// `com.apple.developer.team-identifier`, if present.
    pub fn team_identifier(&self) -> Option<&str> {
        self.get(keys::TEAM_IDENTIFIER).and_then(plist::Value::as_string)
    }

    /// Keys not contained in `trusted`, in sorted order.
    pub fn unknown_keys<'a>(
        &'a self,
        trusted: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.keys().filter(move |key| !trusted.contains(*key))
    }
}

/// Decode the entitlements blob located at `blob_offset`.
///
/// Reads the 4-byte length that follows the blob magic, then `length - 8`
/// payload bytes, and deserializes them. Every failure collapses into
/// [`Entitlements::EMPTY`].
pub fn extract<R: Read + Seek>(cursor: &mut BinaryCursor<R>, blob_offset: u64) -> Entitlements {
    match read_payload(cursor, blob_offset) {
        Ok(payload) => Entitlements::from_plist_bytes(&payload),
        Err(e) => {
            tracing::debug!("extract: entitlements payload unreadable: {}", e);
            Entitlements::EMPTY
        },
    }
}

/// Decode the entitlements of a parsed container, or `EMPTY` if it has none.
pub fn extract_from_container<R: Read + Seek>(
    nav: &mut MachONavigator<R>,
    container: &CodeSignatureContainer,
) -> Entitlements {
    match container.entitlements_offset() {
        Some(offset) => extract(nav.cursor(), offset),
        None => Entitlements::EMPTY,
    }
}

fn read_payload<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    blob_offset: u64,
) -> Result<Vec<u8>, ParseError> {
    cursor.seek(blob_offset + 4)?;
    let length = cursor.read_u32_be()?;
    if !(BLOB_HEADER_SIZE..=MAX_PAYLOAD_SIZE).contains(&length) {
        return Err(ParseError::signature(format!(
            "entitlements blob length {length} out of range"
        )));
    }
    cursor.read_bytes((length - BLOB_HEADER_SIZE) as usize)
}

/// Read the entitlements embedded in the executable at `path`.
///
/// Structural problems (unreadable file, unknown or fat format, no
/// signature, no entitlements blob) are reported as errors; a corrupt
/// payload is not.
pub fn read_from_path(path: impl AsRef<Path>) -> Result<Entitlements, ParseError> {
    let mut nav = MachONavigator::open(path)?;
    let header = nav.classify(0)?;
    let location = nav.find_code_signature(&header)?;
    let container = nav.parse_super_blob(&header, location.file_offset)?;
    let offset = container
        .entitlements_offset()
        .ok_or_else(|| ParseError::signature("no entitlements blob in code signature"))?;
    Ok(extract(nav.cursor(), offset))
}
