//! GGUF metadata structures
//!
//! Typed key-value entries for the metadata section. Entries are kept in
//! file order so a writer can re-emit the section byte-identically; lookup
//! helpers scan the (small) table linearly.
//!
//! Every known tag has an exact decode width, so the cursor always advances
//! correctly. Unknown tags are a hard error: this dialect does not declare a
//! byte length for values, so an unknown tag cannot be skipped or preserved
//! opaquely without guessing where the next entry starts.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::error::{Error, Result};
use crate::format::{read_f32, read_i32, read_string, read_u32, read_u64, read_u8, write_string};

/// Metadata value type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetadataValueType {
    /// 32-bit unsigned integer
    UInt32 = 0,
    /// 32-bit signed integer
    Int32 = 1,
    /// 32-bit float
    Float32 = 2,
    /// Boolean (1 byte)
    Bool = 3,
    /// Length-prefixed UTF-8 string
    String = 4,
    /// Homogeneous array: element tag + u64 count + elements
    Array = 5,
}

impl MetadataValueType {
    /// Try to create from a tag byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::UInt32),
            1 => Some(Self::Int32),
            2 => Some(Self::Float32),
            3 => Some(Self::Bool),
            4 => Some(Self::String),
            5 => Some(Self::Array),
            _ => None,
        }
    }
}

/// A metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    UInt32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    Array(Vec<MetadataValue>),
}

impl MetadataValue {
    /// Read a metadata value of the given type from a cursor
    pub fn read_from(cursor: &mut Cursor<&[u8]>, value_type: MetadataValueType) -> Result<Self> {
        match value_type {
            MetadataValueType::UInt32 => Ok(MetadataValue::UInt32(read_u32(cursor)?)),
            MetadataValueType::Int32 => Ok(MetadataValue::Int32(read_i32(cursor)?)),
            MetadataValueType::Float32 => Ok(MetadataValue::Float32(read_f32(cursor)?)),
            MetadataValueType::Bool => Ok(MetadataValue::Bool(read_u8(cursor)? != 0)),
            MetadataValueType::String => Ok(MetadataValue::String(read_string(cursor)?)),
            MetadataValueType::Array => {
                let offset = cursor.position();
                let tag = read_u8(cursor)?;
                let element_type = MetadataValueType::from_u8(tag)
                    .ok_or(Error::UnknownValueType { tag, offset })?;
                let len = read_u64(cursor)? as usize;

                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push(Self::read_from(cursor, element_type)?);
                }
                Ok(MetadataValue::Array(values))
            }
        }
    }

    /// Write the value body (tag is written by the caller)
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            MetadataValue::UInt32(v) => writer.write_u32::<LittleEndian>(*v)?,
            MetadataValue::Int32(v) => writer.write_i32::<LittleEndian>(*v)?,
            MetadataValue::Float32(v) => writer.write_f32::<LittleEndian>(*v)?,
            MetadataValue::Bool(v) => writer.write_u8(u8::from(*v))?,
            MetadataValue::String(s) => write_string(writer, s)?,
            MetadataValue::Array(values) => {
                // Empty arrays default to a u32 element tag; nothing follows
                // the count either way, so the choice only affects the tag byte.
                let element_type = values
                    .first()
                    .map(|v| v.value_type())
                    .unwrap_or(MetadataValueType::UInt32);
                writer.write_u8(element_type as u8)?;
                writer.write_u64::<LittleEndian>(values.len() as u64)?;
                for value in values {
                    value.write_to(writer)?;
                }
            }
        }
        Ok(())
    }

    /// Get value type
    pub fn value_type(&self) -> MetadataValueType {
        match self {
            MetadataValue::UInt32(_) => MetadataValueType::UInt32,
            MetadataValue::Int32(_) => MetadataValueType::Int32,
            MetadataValue::Float32(_) => MetadataValueType::Float32,
            MetadataValue::Bool(_) => MetadataValueType::Bool,
            MetadataValue::String(_) => MetadataValueType::String,
            MetadataValue::Array(_) => MetadataValueType::Array,
        }
    }
}

/// GGUF metadata table, in file order
#[derive(Debug, Clone, Default)]
pub struct GgufMetadata {
    entries: Vec<(String, MetadataValue)>,
}

impl GgufMetadata {
    /// Create a new empty metadata table
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `count` metadata entries from a cursor
    pub fn read_from(cursor: &mut Cursor<&[u8]>, count: u64) -> Result<Self> {
        let mut entries = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let key = read_string(cursor)?;

            let offset = cursor.position();
            let tag = read_u8(cursor)?;
            let value_type = MetadataValueType::from_u8(tag)
                .ok_or(Error::UnknownValueType { tag, offset })?;

            let value = MetadataValue::read_from(cursor, value_type)?;
            entries.push((key, value));
        }

        Ok(Self { entries })
    }

    /// Write all entries in order
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        for (key, value) in &self.entries {
            write_string(writer, key)?;
            writer.write_u8(value.value_type() as u8)?;
            value.write_to(writer)?;
        }
        Ok(())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Get a string value by key
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get a u32 value by key
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.get(key)? {
            MetadataValue::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    /// Get an i32 value by key
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.get(key)? {
            MetadataValue::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// Get a float32 value by key
    pub fn get_f32(&self, key: &str) -> Option<f32> {
        match self.get(key)? {
            MetadataValue::Float32(v) => Some(*v),
            _ => None,
        }
    }

    /// Get a bool value by key
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            MetadataValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// Common metadata keys
pub mod keys {
    pub const GENERAL_ARCHITECTURE: &str = "general.architecture";
    pub const GENERAL_ALIGNMENT: &str = "general.alignment";
    pub const GENERAL_NAME: &str = "general.name";
    pub const GENERAL_QUANTIZATION_VERSION: &str = "general.quantization_version";
}
