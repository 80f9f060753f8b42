//! Error types for GGUF container handling

use std::io;
use thiserror::Error;

use crate::tensor_info::TensorType;

/// Result type alias for GGUF operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing GGUF containers
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid GGUF magic number
    #[error("Invalid GGUF magic: expected 'GGUF', found {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported GGUF version
    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    /// Byte source ended before a declared length was satisfied
    #[error("Truncated container: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: u64, needed: usize },

    /// Unknown metadata value type tag. Tags carry no declared byte length,
    /// so an unknown tag cannot be skipped without desynchronizing the cursor.
    #[error("Unknown metadata value tag {tag} at offset {offset}")]
    UnknownValueType { tag: u8, offset: u64 },

    /// Invalid tensor dtype tag
    #[error("Invalid tensor type: {0}")]
    InvalidTensorType(u32),

    /// Dtype is parseable but not supported for this operation
    #[error("Unsupported tensor dtype: {0:?}")]
    UnsupportedDtype(TensorType),

    /// Invalid UTF-8 in a length-prefixed string
    #[error("Invalid UTF-8 string at offset {offset}")]
    InvalidString { offset: u64 },

    /// Invalid tensor descriptor
    #[error("Invalid tensor info: {0}")]
    InvalidTensorInfo(String),

    /// Two descriptors share a name
    #[error("Duplicate tensor name: {0}")]
    DuplicateTensor(String),

    /// Tensor not found in the container
    #[error("Tensor not found: {0}")]
    TensorNotFound(String),

    /// Buffer too small for a requested view
    #[error("Buffer too small: needed {needed} bytes, but only {available} available")]
    BufferTooSmall { needed: usize, available: usize },
}
