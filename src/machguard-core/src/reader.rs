//! Random-access byte reader over a binary image.
//!
//! `BinaryCursor` wraps any `Read + Seek` source (a file on disk, or a byte
//! slice for images already mapped into memory) and tracks the current
//! offset. Typed reads use the host's native byte order; callers that need
//! big-endian values (code-signature structures) normalize them themselves.
//!
//! Reading past the end of the input is fatal for the current parse and
//! surfaces as [`ParseError::Truncated`]. Files are closed when the cursor
//! is dropped, including on early error returns.

use std::fs::File;
use std::io::{BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::ParseError;

/// A fixed-size value that can be decoded from native-endian bytes.
pub trait Primitive: Sized + Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Decode from exactly `SIZE` bytes in native byte order.
    fn from_native(bytes: &[u8]) -> Self;
}

macro_rules! impl_primitive {
    ($($ty:ty),*) => {
        $(
            impl Primitive for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_native(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_primitive!(u8, u16, u32, u64, i32, i64);

/// Sequential and random-access reader with an explicit byte offset.
pub struct BinaryCursor<R> {
    inner: R,
    offset: u64,
}

impl BinaryCursor<BufReader<File>> {
    /// Open a file on disk for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ParseError::CannotOpenBinary {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("BinaryCursor: opened {}", path.display());
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<'a> BinaryCursor<Cursor<&'a [u8]>> {
    /// Read from an in-memory byte slice.
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> BinaryCursor<R> {
    /// Wrap an arbitrary reader positioned at offset 0.
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Current absolute offset.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Move to an absolute offset.
    pub fn seek(&mut self, offset: u64) -> Result<(), ParseError> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .map_err(|source| ParseError::ReadFailed { offset, source })?;
        self.offset = offset;
        Ok(())
    }

    /// Advance the offset by `count` bytes without reading them.
    pub fn skip(&mut self, count: u64) -> Result<(), ParseError> {
        let target = self.offset.checked_add(count).ok_or(ParseError::Truncated {
            offset: self.offset,
            wanted: usize::MAX,
        })?;
        self.seek(target)
    }

    /// Read one value in native byte order.
    pub fn read_value<T: Primitive>(&mut self) -> Result<T, ParseError> {
        let bytes = self.read_bytes(T::SIZE)?;
        Ok(T::from_native(&bytes))
    }

    /// Read a `u32` stored big-endian, regardless of host order.
    pub fn read_u32_be(&mut self) -> Result<u32, ParseError> {
        Ok(u32::from_be(self.read_value::<u32>()?))
    }

    /// Read exactly `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, ParseError> {
        let mut buf = vec![0u8; count];
        let offset = self.offset;
        self.inner.read_exact(&mut buf).map_err(|source| {
            if source.kind() == ErrorKind::UnexpectedEof {
                ParseError::Truncated {
                    offset,
                    wanted: count,
                }
            } else {
                ParseError::ReadFailed { offset, source }
            }
        })?;
        self.offset += count as u64;
        Ok(buf)
    }

    /// Read a fixed-width, NUL-padded name field.
    pub fn read_fixed_name(&mut self, width: usize) -> Result<String, ParseError> {
        let raw = self.read_bytes(width)?;
        Ok(fixed_name(&raw))
    }

    /// Read a NUL-terminated string starting at the current offset,
    /// stopping after at most `limit` bytes.
    pub fn read_c_string(&mut self, limit: usize) -> Result<String, ParseError> {
        let mut out = Vec::new();
        while out.len() < limit {
            let byte = self.read_value::<u8>()?;
            if byte == 0 {
                break;
            }
            out.push(byte);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// Decode a NUL-padded identifier such as a segment or section name.
pub fn fixed_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_reads_track_offset() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x1122_3344u32.to_ne_bytes());
        data.extend_from_slice(&0xaabbu16.to_ne_bytes());
        let mut cursor = BinaryCursor::from_bytes(&data);

        assert_eq!(cursor.read_value::<u32>().unwrap(), 0x1122_3344);
        assert_eq!(cursor.position(), 4);
        assert_eq!(cursor.read_value::<u16>().unwrap(), 0xaabb);
        assert_eq!(cursor.position(), 6);
    }

    #[test]
    fn test_big_endian_read() {
        let data = 0xfade_0cc0u32.to_be_bytes();
        let mut cursor = BinaryCursor::from_bytes(&data);
        assert_eq!(cursor.read_u32_be().unwrap(), 0xfade_0cc0);
    }

    #[test]
    fn test_read_past_end_is_truncated() {
        let data = [1u8, 2, 3];
        let mut cursor = BinaryCursor::from_bytes(&data);
        cursor.seek(2).unwrap();
        let err = cursor.read_value::<u32>().unwrap_err();
        assert!(matches!(err, ParseError::Truncated { offset: 2, wanted: 4 }));
    }

    #[test]
    fn test_fixed_name_strips_padding() {
        let mut raw = [0u8; 16];
        raw[..6].copy_from_slice(b"__TEXT");
        assert_eq!(fixed_name(&raw), "__TEXT");
        assert_eq!(fixed_name(b"0123456789abcdef"), "0123456789abcdef");
    }

    #[test]
    fn test_c_string_stops_at_nul() {
        let data = b"@rpath/Foo.dylib\0garbage";
        let mut cursor = BinaryCursor::from_bytes(data);
        assert_eq!(cursor.read_c_string(64).unwrap(), "@rpath/Foo.dylib");
    }

    #[test]
    fn test_open_missing_file() {
        let err = BinaryCursor::open("/nonexistent/definitely/missing").err().unwrap();
        assert!(matches!(err, ParseError::CannotOpenBinary { .. }));
    }
}
