//! Memory-mapped GGUF container reader and streaming writer
//!
//! This crate parses GGUF (GGML Universal File) containers into a read-only
//! in-memory index over a memory map, decodes tensor data to f32, and writes
//! new containers with selected tensors replaced while preserving metadata,
//! descriptor order, and alignment padding.

pub mod dequantize;
pub mod error;
pub mod format;
pub mod metadata;
pub mod reader;
pub mod tensor_info;
pub mod writer;

pub use dequantize::dequantize;
pub use error::{Error, Result};
pub use format::{GgufHeader, GgufMagic, GgufVersion, GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC};
pub use metadata::{GgufMetadata, MetadataValue, MetadataValueType};
pub use reader::GgufFile;
pub use tensor_info::{TensorInfo, TensorType};
pub use writer::{write_merged, ReplacementTensor};
