//! Embedded code-signature super-blob.
//!
//! Layout (all fields big-endian, see xnu `cs_blobs.h`):
//!
//! ```text
//! SuperBlob { magic: u32, length: u32, count: u32, index: [BlobIndex; count] }
//! BlobIndex { type: u32, offset: u32 }      // offset relative to SuperBlob
//! Blob      { magic: u32, length: u32, payload: [u8; length - 8] }
//! ```

use std::io::{Read, Seek};

use crate::error::ParseError;
use crate::reader::BinaryCursor;

/// Embedded signature super-blob.
pub const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xfade_0cc0;
/// Requirements vector.
pub const CSMAGIC_REQUIREMENTS: u32 = 0xfade_0c01;
/// Code directory.
pub const CSMAGIC_CODEDIRECTORY: u32 = 0xfade_0c02;
/// CMS signature wrapper.
pub const CSMAGIC_BLOBWRAPPER: u32 = 0xfade_0b01;
/// XML plist entitlements.
pub const CSMAGIC_EMBEDDED_ENTITLEMENTS: u32 = 0xfade_7171;
/// DER entitlements.
pub const CSMAGIC_EMBEDDED_DER_ENTITLEMENTS: u32 = 0xfade_7172;

const SUPER_BLOB_HEADER_SIZE: u64 = 12;
const BLOB_INDEX_SIZE: u64 = 8;
// An index larger than this is treated as corruption rather than allocated.
const MAX_BLOB_COUNT: u32 = 4096;

/// One entry of the super-blob index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobIndex {
    /// Slot type (code directory, requirements, entitlements, ...).
    pub blob_type: u32,
    /// Offset of the blob relative to the super-blob start.
    pub offset: u32,
    /// Magic read from the start of the blob.
    pub magic: u32,
}

/// Decoded super-blob header and index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSignatureContainer {
    /// Absolute offset of the super-blob in the input.
    pub offset: u64,
    /// Container magic; always [`CSMAGIC_EMBEDDED_SIGNATURE`] once parsed.
    pub magic: u32,
    /// Declared total length.
    pub length: u32,
    /// Index entries in declaration order.
    pub entries: Vec<BlobIndex>,
}

impl CodeSignatureContainer {
    /// Absolute offset of a blob.
    pub fn blob_offset(&self, entry: &BlobIndex) -> u64 {
        self.offset + u64::from(entry.offset)
    }

    /// First blob carrying the given magic.
    pub fn find_blob(&self, magic: u32) -> Option<&BlobIndex> {
        self.entries.iter().find(|entry| entry.magic == magic)
    }

    /// Absolute offset of the XML entitlements blob, if present.
    pub fn entitlements_offset(&self) -> Option<u64> {
        self.find_blob(CSMAGIC_EMBEDDED_ENTITLEMENTS)
            .map(|entry| self.blob_offset(entry))
    }
}

pub(super) fn parse_super_blob<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    offset: u64,
) -> Result<CodeSignatureContainer, ParseError> {
    cursor.seek(offset)?;
    let magic = cursor.read_u32_be()?;
    if magic != CSMAGIC_EMBEDDED_SIGNATURE {
        return Err(ParseError::signature(format!(
            "unexpected super-blob magic {magic:#010x}"
        )));
    }
    let length = cursor.read_u32_be()?;
    let count = cursor.read_u32_be()?;
    if count > MAX_BLOB_COUNT {
        return Err(ParseError::signature(format!("implausible blob count {count}")));
    }
    if SUPER_BLOB_HEADER_SIZE + u64::from(count) * BLOB_INDEX_SIZE > u64::from(length) {
        return Err(ParseError::signature(format!(
            "index of {count} entries exceeds declared length {length}"
        )));
    }

    let mut raw = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let blob_type = cursor.read_u32_be()?;
        let blob_offset = cursor.read_u32_be()?;
        raw.push((blob_type, blob_offset));
    }

    let mut entries = Vec::with_capacity(raw.len());
    for (blob_type, blob_offset) in raw {
        if blob_offset >= length {
            return Err(ParseError::signature(format!(
                "blob offset {blob_offset} outside container of {length} bytes"
            )));
        }
        cursor.seek(offset + u64::from(blob_offset))?;
        let magic = cursor.read_u32_be()?;
        entries.push(BlobIndex {
            blob_type,
            offset: blob_offset,
            magic,
        });
    }

    tracing::debug!(
        offset,
        length,
        blobs = entries.len(),
        "parse_super_blob: decoded container"
    );

    Ok(CodeSignatureContainer {
        offset,
        magic,
        length,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(magic: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&magic.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn super_blob(blobs: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let header_len = 12 + 8 * blobs.len() as u32;
        let total: u32 = header_len + blobs.iter().map(|(_, b)| b.len() as u32).sum::<u32>();
        let mut out = Vec::new();
        out.extend_from_slice(&CSMAGIC_EMBEDDED_SIGNATURE.to_be_bytes());
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&(blobs.len() as u32).to_be_bytes());
        let mut offset = header_len;
        for (slot, data) in blobs {
            out.extend_from_slice(&slot.to_be_bytes());
            out.extend_from_slice(&offset.to_be_bytes());
            offset += data.len() as u32;
        }
        for (_, data) in blobs {
            out.extend_from_slice(data);
        }
        out
    }

    #[test]
    fn test_parse_indexes_blob_magics() {
        let data = super_blob(&[
            (0, blob(CSMAGIC_CODEDIRECTORY, &[0u8; 4])),
            (5, blob(CSMAGIC_EMBEDDED_ENTITLEMENTS, b"<plist/>")),
        ]);
        let mut cursor = BinaryCursor::from_bytes(&data);
        let container = parse_super_blob(&mut cursor, 0).unwrap();

        assert_eq!(container.entries.len(), 2);
        assert_eq!(container.entries[0].magic, CSMAGIC_CODEDIRECTORY);
        assert_eq!(container.entries[1].blob_type, 5);
        assert_eq!(container.entitlements_offset(), Some(12 + 16 + 12));
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let mut data = super_blob(&[]);
        data[0] = 0;
        let mut cursor = BinaryCursor::from_bytes(&data);
        let err = parse_super_blob(&mut cursor, 0).unwrap_err();
        assert!(matches!(err, ParseError::SignatureReadingError { .. }));
    }

    #[test]
    fn test_offset_outside_container_rejected() {
        let mut data = super_blob(&[(0, blob(CSMAGIC_CODEDIRECTORY, &[]))]);
        // Point the only index entry far past the end.
        data[16..20].copy_from_slice(&0x1000u32.to_be_bytes());
        let mut cursor = BinaryCursor::from_bytes(&data);
        assert!(parse_super_blob(&mut cursor, 0).is_err());
    }
}
