//! Mach-O navigation.
//!
//! Walks a Mach-O image's header and load commands to locate the
//! code-signature payload, named segments and sections, runtime search
//! paths and declared dylib dependencies. Works over files on disk and
//! over images already mapped into memory (see [`Section::load_address`]).
//!
//! Multi-architecture (fat) images are classified but never sliced:
//! every operation past classification rejects them with
//! [`ParseError::UnsupportedFatBinary`] so that a signature is never
//! validated against the wrong architecture.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use machguard_core::macho::MachONavigator;
//!
//! let mut nav = MachONavigator::open("/Applications/Foo.app/Contents/MacOS/Foo")?;
//! let header = nav.classify(0)?;
//! let signature = nav.find_code_signature(&header)?;
//! let container = nav.parse_super_blob(&header, signature.file_offset)?;
//! ```

mod signature;

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use crate::error::ParseError;
use crate::reader::BinaryCursor;

pub use signature::{
    BlobIndex, CodeSignatureContainer, CSMAGIC_BLOBWRAPPER, CSMAGIC_CODEDIRECTORY,
    CSMAGIC_EMBEDDED_DER_ENTITLEMENTS, CSMAGIC_EMBEDDED_ENTITLEMENTS, CSMAGIC_EMBEDDED_SIGNATURE,
    CSMAGIC_REQUIREMENTS,
};

// =============================================================================
// Constants (<mach-o/loader.h>, <mach-o/fat.h>)
// =============================================================================

/// 32-bit thin Mach-O magic.
pub const MH_MAGIC: u32 = 0xfeed_face;
/// 64-bit thin Mach-O magic.
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
/// Fat header magic (stored big-endian).
pub const FAT_MAGIC: u32 = 0xcafe_babe;
/// 64-bit fat header magic (stored big-endian).
pub const FAT_MAGIC_64: u32 = 0xcafe_babf;

/// Size of `struct mach_header`.
pub const MACH_HEADER_SIZE: u64 = 28;
/// Size of `struct mach_header_64`.
pub const MACH_HEADER_64_SIZE: u64 = 32;

/// 32-bit segment load command.
pub const LC_SEGMENT: u32 = 0x1;
/// Dependent dylib load command.
pub const LC_LOAD_DYLIB: u32 = 0xc;
/// 64-bit segment load command.
pub const LC_SEGMENT_64: u32 = 0x19;
/// Code signature load command (`linkedit_data_command`).
pub const LC_CODE_SIGNATURE: u32 = 0x1d;
/// Weakly linked dylib load command.
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x8000_0018;
/// Runtime search path load command.
pub const LC_RPATH: u32 = 0x8000_001c;

const LOAD_COMMAND_HEADER_SIZE: u64 = 8;
const SEGMENT_NAME_WIDTH: usize = 16;
const SEGMENT_COMMAND_SIZE: u64 = 56;
const SEGMENT_COMMAND_64_SIZE: u64 = 72;
const SECTION_SIZE: u64 = 68;
const SECTION_64_SIZE: u64 = 80;

const RPATH_TOKEN: &str = "@rpath/";
const EXECUTABLE_PATH_TOKEN: &str = "@executable_path/";
const LOADER_PATH_TOKEN: &str = "@loader_path/";

// =============================================================================
// Types
// =============================================================================

/// Word size of a thin image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    /// `mach_header`.
    Bits32,
    /// `mach_header_64`.
    Bits64,
}

/// Header of a thin (single-architecture) image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinHeader {
    /// Absolute offset of the header in the input.
    pub offset: u64,
    /// Word size.
    pub arch: Arch,
    /// Number of load commands.
    pub ncmds: u32,
    /// Total size of the load commands.
    pub sizeofcmds: u32,
}

impl ThinHeader {
    /// Size of the Mach-O header preceding the load commands.
    pub fn header_size(&self) -> u64 {
        match self.arch {
            Arch::Bits32 => MACH_HEADER_SIZE,
            Arch::Bits64 => MACH_HEADER_64_SIZE,
        }
    }

    /// Absolute offset of the first load command.
    pub fn first_command_offset(&self) -> u64 {
        self.offset + self.header_size()
    }
}

/// Result of classifying the start of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageHeader {
    /// A 32- or 64-bit thin Mach-O.
    Thin(ThinHeader),
    /// A multi-architecture container.
    Fat {
        /// Number of architecture slices declared.
        nfat_arch: u32,
    },
}

impl ImageHeader {
    /// The thin header, or the fat-binary rejection.
    pub fn thin(&self) -> Result<&ThinHeader, ParseError> {
        match self {
            Self::Thin(thin) => Ok(thin),
            Self::Fat { .. } => Err(ParseError::UnsupportedFatBinary),
        }
    }

    /// Whether this is a multi-architecture container.
    pub fn is_fat(&self) -> bool {
        matches!(self, Self::Fat { .. })
    }
}

/// A load command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCommand {
    /// Command identifier (`LC_*`).
    pub cmd: u32,
    /// Declared size including the 8-byte header.
    pub cmdsize: u32,
    /// Absolute offset of the command.
    pub offset: u64,
}

/// Location of the code-signature payload declared by `LC_CODE_SIGNATURE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeSignatureLocation {
    /// Absolute offset of the super-blob in the input.
    pub file_offset: u64,
    /// Declared size of the payload.
    pub size: u32,
}

/// A section inside a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name, e.g. `__text`.
    pub name: String,
    /// Owning segment name, e.g. `__TEXT`.
    pub segment_name: String,
    /// Virtual address.
    pub addr: u64,
    /// Size in bytes.
    pub size: u64,
    /// File offset of the section contents.
    pub offset: u32,
}

impl Section {
    /// Address of the section in a loaded image after applying the slide.
    pub fn load_address(&self, slide: i64) -> u64 {
        self.addr.wrapping_add_signed(slide)
    }
}

/// A segment and its sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Segment name, e.g. `__TEXT`.
    pub name: String,
    /// Virtual address.
    pub vmaddr: u64,
    /// Virtual size.
    pub vmsize: u64,
    /// File offset.
    pub fileoff: u64,
    /// File size.
    pub filesize: u64,
    /// Sections declared by the segment command.
    pub sections: Vec<Section>,
}

// =============================================================================
// Navigator
// =============================================================================

/// Walks the structure of one Mach-O image.
///
/// Owns its cursor exclusively; for files the handle closes when the
/// navigator is dropped.
pub struct MachONavigator<R> {
    cursor: BinaryCursor<R>,
}

impl MachONavigator<BufReader<File>> {
    /// Open an image on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        Ok(Self::new(BinaryCursor::open(path)?))
    }
}

impl<'a> MachONavigator<Cursor<&'a [u8]>> {
    /// Navigate an image held in memory. `bytes` must start at the header.
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self::new(BinaryCursor::from_bytes(bytes))
    }
}

impl<R: Read + Seek> MachONavigator<R> {
    /// Wrap an existing cursor.
    pub fn new(cursor: BinaryCursor<R>) -> Self {
        Self { cursor }
    }

    /// Access the underlying cursor.
    pub fn cursor(&mut self) -> &mut BinaryCursor<R> {
        &mut self.cursor
    }

    /// Classify the image starting at `offset`.
    ///
    /// Thin magics are compared in native byte order. Anything else is
    /// re-read as a fat header, whose magic is always big-endian on disk.
    pub fn classify(&mut self, offset: u64) -> Result<ImageHeader, ParseError> {
        self.cursor.seek(offset)?;
        let magic: u32 = self.cursor.read_value()?;

        let arch = match magic {
            MH_MAGIC => Some(Arch::Bits32),
            MH_MAGIC_64 => Some(Arch::Bits64),
            _ => None,
        };

        if let Some(arch) = arch {
            // cputype, cpusubtype, filetype precede ncmds
            self.cursor.seek(offset + 16)?;
            let ncmds: u32 = self.cursor.read_value()?;
            let sizeofcmds: u32 = self.cursor.read_value()?;
            tracing::debug!(
                offset,
                ?arch,
                ncmds,
                "MachONavigator: thin image"
            );
            return Ok(ImageHeader::Thin(ThinHeader {
                offset,
                arch,
                ncmds,
                sizeofcmds,
            }));
        }

        self.cursor.seek(offset)?;
        let fat_magic = self.cursor.read_u32_be()?;
        if fat_magic == FAT_MAGIC || fat_magic == FAT_MAGIC_64 {
            let nfat_arch = self.cursor.read_u32_be()?;
            tracing::debug!(nfat_arch, "MachONavigator: fat image");
            return Ok(ImageHeader::Fat { nfat_arch });
        }

        Err(ParseError::UnknownBinaryFormat { magic })
    }

    /// Visit every load command in declaration order.
    ///
    /// `visit` is called with the cursor positioned just past the command's
    /// 8-byte header. Returning `Some` stops the walk early. The cursor is
    /// re-positioned at the next command regardless of what `visit` read.
    pub fn walk_load_commands<T>(
        &mut self,
        header: &ImageHeader,
        mut visit: impl FnMut(&mut BinaryCursor<R>, &LoadCommand) -> Result<Option<T>, ParseError>,
    ) -> Result<Option<T>, ParseError> {
        let thin = *header.thin()?;
        let mut offset = thin.first_command_offset();

        for _ in 0..thin.ncmds {
            self.cursor.seek(offset)?;
            let cmd: u32 = self.cursor.read_value()?;
            let cmdsize: u32 = self.cursor.read_value()?;
            if u64::from(cmdsize) < LOAD_COMMAND_HEADER_SIZE {
                return Err(ParseError::Truncated {
                    offset,
                    wanted: LOAD_COMMAND_HEADER_SIZE as usize,
                });
            }

            let command = LoadCommand {
                cmd,
                cmdsize,
                offset,
            };
            if let Some(found) = visit(&mut self.cursor, &command)? {
                return Ok(Some(found));
            }
            offset += u64::from(cmdsize);
        }

        Ok(None)
    }

    /// Collect every load command header.
    pub fn load_commands(&mut self, header: &ImageHeader) -> Result<Vec<LoadCommand>, ParseError> {
        let mut commands = Vec::new();
        self.walk_load_commands::<()>(header, |_, command| {
            commands.push(*command);
            Ok(None)
        })?;
        Ok(commands)
    }

    /// Locate the code-signature payload.
    pub fn find_code_signature(
        &mut self,
        header: &ImageHeader,
    ) -> Result<CodeSignatureLocation, ParseError> {
        self.find_code_signature_with(header, |_| {})
    }

    /// Locate the code-signature payload, reporting every examined command
    /// to `on_command`.
    ///
    /// Exhausting `ncmds` without a match is an error, not an empty result.
    pub fn find_code_signature_with(
        &mut self,
        header: &ImageHeader,
        mut on_command: impl FnMut(&LoadCommand),
    ) -> Result<CodeSignatureLocation, ParseError> {
        let thin = *header.thin()?;
        let found = self.walk_load_commands(header, |cursor, command| {
            on_command(command);
            if command.cmd != LC_CODE_SIGNATURE {
                return Ok(None);
            }
            let dataoff: u32 = cursor.read_value()?;
            let datasize: u32 = cursor.read_value()?;
            Ok(Some(CodeSignatureLocation {
                file_offset: thin.offset + u64::from(dataoff),
                size: datasize,
            }))
        })?;

        match found {
            Some(location) => {
                tracing::debug!(
                    offset = location.file_offset,
                    size = location.size,
                    "MachONavigator: found LC_CODE_SIGNATURE"
                );
                Ok(location)
            },
            None => Err(ParseError::CodeSignatureCommandMissing {
                examined: thin.ncmds,
            }),
        }
    }

    /// Decode the code-signature super-blob at `offset`.
    ///
    /// All code-signature structures are big-endian regardless of the
    /// image's byte order.
    pub fn parse_super_blob(
        &mut self,
        header: &ImageHeader,
        offset: u64,
    ) -> Result<CodeSignatureContainer, ParseError> {
        header.thin()?;
        signature::parse_super_blob(&mut self.cursor, offset)
    }

    /// Collect every segment with its sections.
    pub fn segments(&mut self, header: &ImageHeader) -> Result<Vec<Segment>, ParseError> {
        let mut segments = Vec::new();
        self.walk_load_commands::<()>(header, |cursor, command| {
            match command.cmd {
                LC_SEGMENT_64 => segments.push(read_segment(cursor, command, Arch::Bits64)?),
                LC_SEGMENT => segments.push(read_segment(cursor, command, Arch::Bits32)?),
                _ => {},
            }
            Ok(None)
        })?;
        Ok(segments)
    }

    /// Find a section by segment and section name.
    pub fn find_section(
        &mut self,
        header: &ImageHeader,
        segment_name: &str,
        section_name: &str,
    ) -> Result<Option<Section>, ParseError> {
        let segments = self.segments(header)?;
        Ok(segments
            .into_iter()
            .filter(|segment| segment.name == segment_name)
            .flat_map(|segment| segment.sections)
            .find(|section| section.name == section_name))
    }

    /// Runtime search paths declared by `LC_RPATH`, in order.
    pub fn rpaths(&mut self, header: &ImageHeader) -> Result<Vec<String>, ParseError> {
        self.collect_strings(header, |cmd| cmd == LC_RPATH)
    }

    /// Dylib install names declared by `LC_LOAD_DYLIB` and
    /// `LC_LOAD_WEAK_DYLIB`, in order.
    pub fn dylibs(&mut self, header: &ImageHeader) -> Result<Vec<String>, ParseError> {
        self.collect_strings(header, |cmd| cmd == LC_LOAD_DYLIB || cmd == LC_LOAD_WEAK_DYLIB)
    }

    /// Read the `lc_str` stored at offset 8 of every matching command.
    fn collect_strings(
        &mut self,
        header: &ImageHeader,
        matches: impl Fn(u32) -> bool,
    ) -> Result<Vec<String>, ParseError> {
        let mut out = Vec::new();
        self.walk_load_commands::<()>(header, |cursor, command| {
            if !matches(command.cmd) {
                return Ok(None);
            }
            let name_offset: u32 = cursor.read_value()?;
            if name_offset >= command.cmdsize {
                return Ok(None);
            }
            cursor.seek(command.offset + u64::from(name_offset))?;
            let limit = (command.cmdsize - name_offset) as usize;
            out.push(cursor.read_c_string(limit)?);
            Ok(None)
        })?;
        Ok(out)
    }
}

/// Read a segment command with the cursor just past its 8-byte header.
fn read_segment<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    command: &LoadCommand,
    arch: Arch,
) -> Result<Segment, ParseError> {
    let name = cursor.read_fixed_name(SEGMENT_NAME_WIDTH)?;
    let (vmaddr, vmsize, fileoff, filesize) = match arch {
        Arch::Bits64 => (
            cursor.read_value::<u64>()?,
            cursor.read_value::<u64>()?,
            cursor.read_value::<u64>()?,
            cursor.read_value::<u64>()?,
        ),
        Arch::Bits32 => (
            u64::from(cursor.read_value::<u32>()?),
            u64::from(cursor.read_value::<u32>()?),
            u64::from(cursor.read_value::<u32>()?),
            u64::from(cursor.read_value::<u32>()?),
        ),
    };
    // maxprot, initprot
    cursor.skip(8)?;
    let nsects: u32 = cursor.read_value()?;

    let (command_size, section_size) = match arch {
        Arch::Bits64 => (SEGMENT_COMMAND_64_SIZE, SECTION_64_SIZE),
        Arch::Bits32 => (SEGMENT_COMMAND_SIZE, SECTION_SIZE),
    };

    let mut sections = Vec::with_capacity(nsects.min(256) as usize);
    for index in 0..u64::from(nsects) {
        let section_offset = command.offset + command_size + index * section_size;
        if section_offset + section_size > command.offset + u64::from(command.cmdsize) {
            break;
        }
        cursor.seek(section_offset)?;
        let sectname = cursor.read_fixed_name(SEGMENT_NAME_WIDTH)?;
        let segname = cursor.read_fixed_name(SEGMENT_NAME_WIDTH)?;
        let (addr, size) = match arch {
            Arch::Bits64 => (cursor.read_value::<u64>()?, cursor.read_value::<u64>()?),
            Arch::Bits32 => (
                u64::from(cursor.read_value::<u32>()?),
                u64::from(cursor.read_value::<u32>()?),
            ),
        };
        let offset: u32 = cursor.read_value()?;
        sections.push(Section {
            name: sectname,
            segment_name: segname,
            addr,
            size,
            offset,
        });
    }

    Ok(Segment {
        name,
        vmaddr,
        vmsize,
        fileoff,
        filesize,
        sections,
    })
}

// =============================================================================
// Path resolution
// =============================================================================

/// Resolve declared dylib install names into concrete paths.
///
/// Each `@rpath/` name expands to one candidate per runtime search path
/// (none if there are no search paths). Afterwards the first
/// `@executable_path/` or `@loader_path/` token is replaced with
/// `executable_dir`. Search paths may themselves carry those tokens.
pub fn resolve_dylib_paths(dylibs: &[String], rpaths: &[String], executable_dir: &str) -> Vec<String> {
    let expanded = dylibs.iter().flat_map(|dylib| match dylib.find(RPATH_TOKEN) {
        Some(at) => rpaths
            .iter()
            .map(|rpath| replace_at(dylib, at, RPATH_TOKEN.len(), &format!("{rpath}/")))
            .collect::<Vec<_>>(),
        None => vec![dylib.clone()],
    });

    let replacement = format!("{executable_dir}/");
    expanded
        .map(|dylib| {
            if let Some(at) = dylib.find(EXECUTABLE_PATH_TOKEN) {
                replace_at(&dylib, at, EXECUTABLE_PATH_TOKEN.len(), &replacement)
            } else if let Some(at) = dylib.find(LOADER_PATH_TOKEN) {
                replace_at(&dylib, at, LOADER_PATH_TOKEN.len(), &replacement)
            } else {
                dylib
            }
        })
        .collect()
}

fn replace_at(source: &str, at: usize, len: usize, with: &str) -> String {
    let mut out = String::with_capacity(source.len() + with.len());
    out.push_str(&source[..at]);
    out.push_str(with);
    out.push_str(&source[at + len..]);
    out
}

/// Read the resolved dependency paths of the executable at `path`.
pub fn linked_library_paths(path: &Path) -> Result<Vec<String>, ParseError> {
    let mut nav = MachONavigator::open(path)?;
    let header = nav.classify(0)?;
    let rpaths = nav.rpaths(&header)?;
    let dylibs = nav.dylibs(&header)?;
    let executable_dir = path
        .parent()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(resolve_dylib_paths(&dylibs, &rpaths, &executable_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_resolve_rpath_expands_per_search_path() {
        let resolved = resolve_dylib_paths(
            &strings(&["@rpath/Foo.framework/Foo", "/usr/lib/libSystem.B.dylib"]),
            &strings(&["@executable_path/Frameworks", "/opt/lib"]),
            "/Applications/App.app",
        );
        assert_eq!(
            resolved,
            strings(&[
                "/Applications/App.app/Frameworks/Foo.framework/Foo",
                "/opt/lib/Foo.framework/Foo",
                "/usr/lib/libSystem.B.dylib",
            ])
        );
    }

    #[test]
    fn test_resolve_rpath_without_search_paths_drops_entry() {
        let resolved = resolve_dylib_paths(&strings(&["@rpath/Foo.dylib"]), &[], "/bin");
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_resolve_loader_path() {
        let resolved = resolve_dylib_paths(&strings(&["@loader_path/libBar.dylib"]), &[], "/x/y");
        assert_eq!(resolved, strings(&["/x/y/libBar.dylib"]));
    }

    #[test]
    fn test_section_load_address_applies_slide() {
        let section = Section {
            name: "__text".into(),
            segment_name: "__TEXT".into(),
            addr: 0x1_0000_4000,
            size: 16,
            offset: 0x4000,
        };
        assert_eq!(section.load_address(0x1000), 0x1_0000_5000);
        assert_eq!(section.load_address(-0x4000), 0x1_0000_0000);
    }

    #[test]
    fn test_fat_header_is_rejected_past_classification() {
        let mut data = Vec::new();
        data.extend_from_slice(&FAT_MAGIC.to_be_bytes());
        data.extend_from_slice(&2u32.to_be_bytes());
        let mut nav = MachONavigator::from_bytes(&data);
        let header = nav.classify(0).unwrap();
        assert_eq!(header, ImageHeader::Fat { nfat_arch: 2 });
        assert!(nav.find_code_signature(&header).unwrap_err().is_fat());
        assert!(nav.segments(&header).unwrap_err().is_fat());
    }

    #[test]
    fn test_unknown_magic() {
        let data = [0u8; 32];
        let mut nav = MachONavigator::from_bytes(&data);
        assert!(matches!(
            nav.classify(0),
            Err(ParseError::UnknownBinaryFormat { magic: 0 })
        ));
    }
}
