//! Synthetic Mach-O images.
//!
//! Images are laid out as: header, `filler` unrelated load commands, one
//! `LC_SEGMENT_64` with `__TEXT,__text`, optionally `LC_CODE_SIGNATURE`,
//! then the text bytes and the code-signature super-blob. Header fields use
//! the host byte order; code-signature structures are big-endian.

use std::path::{Path, PathBuf};

use machguard_core::macho::{
    CSMAGIC_CODEDIRECTORY, CSMAGIC_EMBEDDED_ENTITLEMENTS, CSMAGIC_EMBEDDED_SIGNATURE,
    FAT_MAGIC, LC_CODE_SIGNATURE, LC_SEGMENT_64, MH_MAGIC_64,
};

const HEADER_SIZE: usize = 32;
const FILLER_SIZE: usize = 16;
const SEGMENT_SIZE: usize = 72 + 80;
const CODE_SIGNATURE_SIZE: usize = 16;
// LC_UUID; never consulted by the navigator.
const FILLER_CMD: u32 = 0x1b;

pub const EMPTY_ENTITLEMENTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict/>
</plist>"#;

/// Builder for a thin 64-bit image.
#[derive(Debug, Clone)]
pub struct Image {
    pub text: Vec<u8>,
    pub filler: u32,
    pub signed: bool,
    pub entitlements: Option<Vec<u8>>,
}

impl Default for Image {
    fn default() -> Self {
        Self {
            text: vec![0x1f, 0x20, 0x03, 0xd5, 0xc0, 0x03, 0x5f, 0xd6],
            filler: 0,
            signed: true,
            entitlements: Some(EMPTY_ENTITLEMENTS.as_bytes().to_vec()),
        }
    }
}

fn name16(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

fn align16(n: usize) -> usize {
    (n + 15) & !15
}

impl Image {
    pub fn with_text(text: &[u8]) -> Self {
        Self {
            text: text.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_entitlements(payload: &[u8]) -> Self {
        Self {
            entitlements: Some(payload.to_vec()),
            ..Self::default()
        }
    }

    /// Number of load commands in the header.
    pub fn ncmds(&self) -> u32 {
        self.filler + 1 + u32::from(self.signed)
    }

    fn super_blob(&self) -> Vec<u8> {
        let mut blobs: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut directory = CSMAGIC_CODEDIRECTORY.to_be_bytes().to_vec();
        directory.extend_from_slice(&8u32.to_be_bytes());
        blobs.push((0, directory));
        if let Some(payload) = &self.entitlements {
            let mut blob = CSMAGIC_EMBEDDED_ENTITLEMENTS.to_be_bytes().to_vec();
            blob.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
            blob.extend_from_slice(payload);
            blobs.push((5, blob));
        }

        let index_end = 12 + 8 * blobs.len();
        let length = index_end + blobs.iter().map(|(_, b)| b.len()).sum::<usize>();
        let mut out = CSMAGIC_EMBEDDED_SIGNATURE.to_be_bytes().to_vec();
        out.extend_from_slice(&(length as u32).to_be_bytes());
        out.extend_from_slice(&(blobs.len() as u32).to_be_bytes());
        let mut offset = index_end;
        for (slot, blob) in &blobs {
            out.extend_from_slice(&slot.to_be_bytes());
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            offset += blob.len();
        }
        for (_, blob) in blobs {
            out.extend_from_slice(&blob);
        }
        out
    }

    pub fn build(&self) -> Vec<u8> {
        let sizeofcmds = self.filler as usize * FILLER_SIZE
            + SEGMENT_SIZE
            + if self.signed { CODE_SIGNATURE_SIZE } else { 0 };
        let text_offset = align16(HEADER_SIZE + sizeofcmds);
        let signature_offset = align16(text_offset + self.text.len());
        let signature = self.super_blob();

        let mut out = Vec::new();
        out.extend_from_slice(&MH_MAGIC_64.to_ne_bytes());
        // cputype (arm64), cpusubtype, filetype (MH_EXECUTE)
        out.extend_from_slice(&0x0100_000cu32.to_ne_bytes());
        out.extend_from_slice(&0u32.to_ne_bytes());
        out.extend_from_slice(&2u32.to_ne_bytes());
        out.extend_from_slice(&self.ncmds().to_ne_bytes());
        out.extend_from_slice(&(sizeofcmds as u32).to_ne_bytes());
        out.extend_from_slice(&0u32.to_ne_bytes());
        out.extend_from_slice(&0u32.to_ne_bytes());

        for _ in 0..self.filler {
            out.extend_from_slice(&FILLER_CMD.to_ne_bytes());
            out.extend_from_slice(&(FILLER_SIZE as u32).to_ne_bytes());
            out.extend_from_slice(&[0u8; 8]);
        }

        out.extend_from_slice(&LC_SEGMENT_64.to_ne_bytes());
        out.extend_from_slice(&(SEGMENT_SIZE as u32).to_ne_bytes());
        out.extend_from_slice(&name16("__TEXT"));
        out.extend_from_slice(&0x1_0000_0000u64.to_ne_bytes());
        out.extend_from_slice(&0x4000u64.to_ne_bytes());
        out.extend_from_slice(&0u64.to_ne_bytes());
        out.extend_from_slice(&(signature_offset as u64).to_ne_bytes());
        out.extend_from_slice(&5u32.to_ne_bytes());
        out.extend_from_slice(&5u32.to_ne_bytes());
        out.extend_from_slice(&1u32.to_ne_bytes());
        out.extend_from_slice(&0u32.to_ne_bytes());
        // section_64
        out.extend_from_slice(&name16("__text"));
        out.extend_from_slice(&name16("__TEXT"));
        out.extend_from_slice(&(0x1_0000_0000u64 + text_offset as u64).to_ne_bytes());
        out.extend_from_slice(&(self.text.len() as u64).to_ne_bytes());
        out.extend_from_slice(&(text_offset as u32).to_ne_bytes());
        out.extend_from_slice(&[0u8; 28]);

        if self.signed {
            out.extend_from_slice(&LC_CODE_SIGNATURE.to_ne_bytes());
            out.extend_from_slice(&(CODE_SIGNATURE_SIZE as u32).to_ne_bytes());
            out.extend_from_slice(&(signature_offset as u32).to_ne_bytes());
            out.extend_from_slice(&(signature.len() as u32).to_ne_bytes());
        }

        out.resize(text_offset, 0);
        out.extend_from_slice(&self.text);
        out.resize(signature_offset, 0);
        out.extend_from_slice(&signature);
        out
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

/// A fat header declaring `nfat_arch` slices, followed by a valid thin image.
pub fn fat_image(nfat_arch: u32) -> Vec<u8> {
    let mut out = FAT_MAGIC.to_be_bytes().to_vec();
    out.extend_from_slice(&nfat_arch.to_be_bytes());
    out.resize(4096, 0);
    out.extend_from_slice(&Image::default().build());
    out
}

/// Serialize a string-keyed dictionary as an XML property list.
pub fn entitlements_xml(entries: &[(String, bool)]) -> Vec<u8> {
    let mut dict = plist::Dictionary::new();
    for (key, value) in entries {
        dict.insert(key.clone(), plist::Value::Boolean(*value));
    }
    let mut out = Vec::new();
    plist::Value::Dictionary(dict).to_writer_xml(&mut out).unwrap();
    out
}
