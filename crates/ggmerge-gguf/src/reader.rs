//! Memory-mapped GGUF container reader
//!
//! Parses a GGUF byte stream into an in-memory index: metadata table in file
//! order, tensor descriptors in ascending-offset order, and the data-section
//! base offset. The file stays memory-mapped; tensor data is handed out as
//! borrowed slices so a merge run never copies unmodified tensors.

use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{align_offset, GgufHeader, GGUF_DEFAULT_ALIGNMENT};
use crate::metadata::{keys, GgufMetadata};
use crate::tensor_info::TensorInfo;

/// A parsed, read-only GGUF container
pub struct GgufFile {
    mmap: Mmap,
    header: GgufHeader,
    metadata: GgufMetadata,
    tensors: Vec<TensorInfo>,
    by_name: HashMap<String, usize>,
    data_offset: u64,
    alignment: u32,
}

impl GgufFile {
    /// Open and parse a GGUF file from a path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(file)
    }

    /// Parse a GGUF container from an open file
    pub fn from_file(file: File) -> Result<Self> {
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_mmap(mmap)
    }

    /// Parse a GGUF container from an existing memory map
    pub fn from_mmap(mmap: Mmap) -> Result<Self> {
        let mut cursor = Cursor::new(&mmap[..]);

        let header = GgufHeader::read_from(&mut cursor)?;
        let metadata = GgufMetadata::read_from(&mut cursor, header.metadata_kv_count)?;

        let alignment = metadata
            .get_u32(keys::GENERAL_ALIGNMENT)
            .unwrap_or(GGUF_DEFAULT_ALIGNMENT);

        let mut tensors = Vec::with_capacity(header.tensor_count as usize);
        let mut by_name = HashMap::with_capacity(header.tensor_count as usize);
        for _ in 0..header.tensor_count {
            let tensor = TensorInfo::read_from(&mut cursor)?;
            if by_name.insert(tensor.name.clone(), tensors.len()).is_some() {
                return Err(Error::DuplicateTensor(tensor.name));
            }
            tensors.push(tensor);
        }

        let data_offset = align_offset(cursor.position(), alignment as u64);

        validate_layout(&tensors, data_offset, alignment as u64, mmap.len() as u64)?;

        debug!(
            tensors = tensors.len(),
            kv_pairs = metadata.len(),
            data_offset,
            alignment,
            "parsed GGUF container"
        );

        Ok(Self {
            mmap,
            header,
            metadata,
            tensors,
            by_name,
            data_offset,
            alignment,
        })
    }

    /// Get the file header
    pub fn header(&self) -> &GgufHeader {
        &self.header
    }

    /// Get the metadata table
    pub fn metadata(&self) -> &GgufMetadata {
        &self.metadata
    }

    /// Tensor descriptors in ascending-offset order
    pub fn tensors(&self) -> &[TensorInfo] {
        &self.tensors
    }

    /// Get information about a specific tensor
    pub fn tensor_info(&self, name: &str) -> Option<&TensorInfo> {
        self.by_name.get(name).map(|&i| &self.tensors[i])
    }

    /// Check whether the container holds a tensor with this name
    pub fn contains_tensor(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Raw bytes of a tensor, borrowed from the memory map
    pub fn tensor_data(&self, name: &str) -> Result<&[u8]> {
        let tensor = self
            .tensor_info(name)
            .ok_or_else(|| Error::TensorNotFound(name.to_string()))?;

        let start = (self.data_offset + tensor.offset) as usize;
        let len = tensor.data_size() as usize;
        if start + len > self.mmap.len() {
            return Err(Error::BufferTooSmall {
                needed: start + len,
                available: self.mmap.len(),
            });
        }
        Ok(&self.mmap[start..start + len])
    }

    /// Typed view of a non-quantized tensor's data
    ///
    /// Tensor data starts on an alignment boundary, so the cast is valid for
    /// the primitive dtypes; quantized tensors must go through
    /// [`crate::dequantize`] instead.
    pub fn tensor_data_as<T: bytemuck::Pod>(&self, name: &str) -> Result<&[T]> {
        let tensor = self
            .tensor_info(name)
            .ok_or_else(|| Error::TensorNotFound(name.to_string()))?;

        if tensor.dtype.is_quantized() {
            return Err(Error::UnsupportedDtype(tensor.dtype));
        }
        let element_size = tensor.dtype.element_size()?;
        if element_size != std::mem::size_of::<T>() {
            return Err(Error::InvalidTensorInfo(format!(
                "type size mismatch for '{}': element is {} bytes, requested {}",
                name,
                element_size,
                std::mem::size_of::<T>()
            )));
        }

        let data = self.tensor_data(name)?;
        bytemuck::try_cast_slice(data)
            .map_err(|e| Error::InvalidTensorInfo(format!("cast failed for '{}': {}", name, e)))
    }

    /// The raw container bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Offset of the first byte of the data section
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Alignment used for tensor data
    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Total file size in bytes
    pub fn file_size(&self) -> usize {
        self.mmap.len()
    }

    /// Model architecture from metadata, if present
    pub fn architecture(&self) -> Option<&str> {
        self.metadata.get_string(keys::GENERAL_ARCHITECTURE)
    }

    /// Model name from metadata, if present
    pub fn model_name(&self) -> Option<&str> {
        self.metadata.get_string(keys::GENERAL_NAME)
    }
}

/// Enforce the descriptor invariant: offsets ascend and are contiguous
/// modulo the alignment, and all data fits inside the file. The writer's
/// offset recomputation relies on this to reproduce the input byte-for-byte.
fn validate_layout(
    tensors: &[TensorInfo],
    data_offset: u64,
    alignment: u64,
    file_len: u64,
) -> Result<()> {
    let mut expected = 0u64;
    for tensor in tensors {
        if tensor.offset != expected {
            return Err(Error::InvalidTensorInfo(format!(
                "tensor '{}' at offset {} but expected {} (alignment {})",
                tensor.name, tensor.offset, expected, alignment
            )));
        }
        let end = tensor.offset.checked_add(tensor.data_size()).ok_or_else(|| {
            Error::InvalidTensorInfo(format!(
                "tensor '{}' data extends past the addressable range",
                tensor.name
            ))
        })?;
        expected = align_offset(end, alignment);
    }

    // The loop verified each offset+size addition; the actual end may be
    // unpadded, and a tensor-free container may stop before the aligned base
    let last_end = tensors
        .last()
        .map(|t| data_offset.saturating_add(t.offset + t.data_size()))
        .unwrap_or(0);
    if last_end > file_len {
        return Err(Error::Truncated {
            offset: file_len,
            needed: (last_end - file_len) as usize,
        });
    }
    Ok(())
}
