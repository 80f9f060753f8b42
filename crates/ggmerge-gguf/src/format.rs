//! GGUF format definitions
//!
//! Magic number, version, header structure, and alignment helpers for the
//! GGUF container dialect handled by this crate: little-endian fields,
//! u32 string length prefixes, 1-byte metadata value tags.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::error::{Error, Result};

/// GGUF magic number: "GGUF" in ASCII
pub const GGUF_MAGIC: [u8; 4] = [b'G', b'G', b'U', b'F'];

/// Default alignment for tensor data when `general.alignment` is absent
pub const GGUF_DEFAULT_ALIGNMENT: u32 = 32;

/// GGUF file magic identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufMagic([u8; 4]);

impl GgufMagic {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Check if this is a valid GGUF magic
    pub fn is_valid(&self) -> bool {
        self.0 == GGUF_MAGIC
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

/// GGUF version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufVersion(pub u32);

impl GgufVersion {
    /// Version 1
    pub const V1: Self = Self(1);

    /// Version 2
    pub const V2: Self = Self(2);

    /// Version 3 (current)
    pub const V3: Self = Self(3);

    /// Check if this version is supported
    pub fn is_supported(&self) -> bool {
        matches!(self.0, 1..=3)
    }
}

/// GGUF file header
#[derive(Debug, Clone)]
pub struct GgufHeader {
    /// Format version
    pub version: GgufVersion,

    /// Number of tensors
    pub tensor_count: u64,

    /// Number of metadata key-value pairs
    pub metadata_kv_count: u64,
}

impl GgufHeader {
    /// Size of the fixed header in bytes: magic + version + tensor_count + kv_count
    pub const SIZE: usize = 4 + 4 + 8 + 8;

    /// Read header from a cursor over the container bytes
    pub fn read_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let mut magic_bytes = [0u8; 4];
        read_exact(cursor, &mut magic_bytes)?;
        let magic = GgufMagic::from_bytes(magic_bytes);

        if !magic.is_valid() {
            return Err(Error::InvalidMagic(magic_bytes));
        }

        let version = GgufVersion(read_u32(cursor)?);
        if !version.is_supported() {
            return Err(Error::UnsupportedVersion(version.0));
        }

        let tensor_count = read_u64(cursor)?;
        let metadata_kv_count = read_u64(cursor)?;

        Ok(Self {
            version,
            tensor_count,
            metadata_kv_count,
        })
    }

    /// Write header to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&GGUF_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.version.0)?;
        writer.write_u64::<LittleEndian>(self.tensor_count)?;
        writer.write_u64::<LittleEndian>(self.metadata_kv_count)?;
        Ok(())
    }
}

/// Align an offset up to the specified alignment
pub fn align_offset(offset: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return offset;
    }
    (offset + alignment - 1) & !(alignment - 1)
}

// Cursor read helpers. Byte sources here are in-memory slices, so the only
// possible failure is running past the end; that maps to `Truncated` with
// the cursor position, which fatal errors must carry per the error contract.

pub(crate) fn read_exact(cursor: &mut Cursor<&[u8]>, buf: &mut [u8]) -> Result<()> {
    let offset = cursor.position();
    std::io::Read::read_exact(cursor, buf).map_err(|_| Error::Truncated {
        offset,
        needed: buf.len(),
    })
}

pub(crate) fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    let offset = cursor.position();
    cursor
        .read_u8()
        .map_err(|_| Error::Truncated { offset, needed: 1 })
}

pub(crate) fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    let offset = cursor.position();
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::Truncated { offset, needed: 4 })
}

pub(crate) fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32> {
    let offset = cursor.position();
    cursor
        .read_i32::<LittleEndian>()
        .map_err(|_| Error::Truncated { offset, needed: 4 })
}

pub(crate) fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let offset = cursor.position();
    cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| Error::Truncated { offset, needed: 8 })
}

pub(crate) fn read_f32(cursor: &mut Cursor<&[u8]>) -> Result<f32> {
    let offset = cursor.position();
    cursor
        .read_f32::<LittleEndian>()
        .map_err(|_| Error::Truncated { offset, needed: 4 })
}

/// Read a u32-length-prefixed UTF-8 string
pub(crate) fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = read_u32(cursor)? as usize;
    let offset = cursor.position();
    let mut buf = vec![0u8; len];
    read_exact(cursor, &mut buf)?;
    String::from_utf8(buf).map_err(|_| Error::InvalidString { offset })
}

/// Write a u32-length-prefixed string
pub(crate) fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    writer.write_u32::<LittleEndian>(s.len() as u32)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gguf_magic() {
        let valid_magic = GgufMagic::from_bytes(GGUF_MAGIC);
        assert!(valid_magic.is_valid());

        let invalid_magic = GgufMagic::from_bytes([b'G', b'G', b'M', b'L']);
        assert!(!invalid_magic.is_valid());
    }

    #[test]
    fn test_gguf_version() {
        assert!(GgufVersion::V1.is_supported());
        assert!(GgufVersion::V2.is_supported());
        assert!(GgufVersion::V3.is_supported());
        assert!(!GgufVersion(0).is_supported());
        assert!(!GgufVersion(4).is_supported());
    }

    #[test]
    fn test_header_size() {
        assert_eq!(GgufHeader::SIZE, 24);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = GgufHeader {
            version: GgufVersion::V3,
            tensor_count: 7,
            metadata_kv_count: 2,
        };

        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), GgufHeader::SIZE);

        let mut cursor = Cursor::new(buf.as_slice());
        let parsed = GgufHeader::read_from(&mut cursor).unwrap();
        assert_eq!(parsed.version, GgufVersion::V3);
        assert_eq!(parsed.tensor_count, 7);
        assert_eq!(parsed.metadata_kv_count, 2);
    }

    #[test]
    fn test_truncated_header() {
        let data = [b'G', b'G', b'U', b'F', 3, 0, 0, 0];
        let mut cursor = Cursor::new(&data[..]);
        let err = GgufHeader::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Truncated { offset: 8, .. }));
    }

    #[test]
    fn test_align_offset() {
        assert_eq!(align_offset(0, 32), 0);
        assert_eq!(align_offset(1, 32), 32);
        assert_eq!(align_offset(31, 32), 32);
        assert_eq!(align_offset(32, 32), 32);
        assert_eq!(align_offset(33, 32), 64);
    }
}
