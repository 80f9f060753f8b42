//! Tensor descriptors and dtype handling
//!
//! Descriptor layout: length-prefixed name, dimension count, dimensions as
//! u64, dtype tag, then the data offset relative to the data-section base.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::error::{Error, Result};
use crate::format::{read_string, read_u32, read_u64, write_string};

/// Maximum number of dimensions a descriptor may carry
pub const MAX_DIMS: u32 = 4;

/// Tensor data types, tag values shared with GGML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[allow(non_camel_case_types)]
pub enum TensorType {
    /// 32-bit float
    F32 = 0,
    /// 16-bit float
    F16 = 1,
    /// 4-bit quantization (type 0)
    Q4_0 = 2,
    /// 4-bit quantization (type 1)
    Q4_1 = 3,
    /// 5-bit quantization (type 0)
    Q5_0 = 6,
    /// 5-bit quantization (type 1)
    Q5_1 = 7,
    /// 8-bit quantization (type 0)
    Q8_0 = 8,
    /// 2-bit K-quantization
    Q2_K = 10,
    /// 3-bit K-quantization
    Q3_K = 11,
    /// 4-bit K-quantization
    Q4_K = 12,
    /// 5-bit K-quantization
    Q5_K = 13,
    /// 6-bit K-quantization
    Q6_K = 14,
    /// 8-bit K-quantization
    Q8_K = 15,
    /// 8-bit integer
    I8 = 24,
    /// 16-bit integer
    I16 = 25,
    /// 32-bit integer
    I32 = 26,
    /// 64-bit integer
    I64 = 27,
    /// 64-bit float
    F64 = 28,
}

impl TensorType {
    /// Try to create from a u32 tag
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::F32),
            1 => Some(Self::F16),
            2 => Some(Self::Q4_0),
            3 => Some(Self::Q4_1),
            6 => Some(Self::Q5_0),
            7 => Some(Self::Q5_1),
            8 => Some(Self::Q8_0),
            10 => Some(Self::Q2_K),
            11 => Some(Self::Q3_K),
            12 => Some(Self::Q4_K),
            13 => Some(Self::Q5_K),
            14 => Some(Self::Q6_K),
            15 => Some(Self::Q8_K),
            24 => Some(Self::I8),
            25 => Some(Self::I16),
            26 => Some(Self::I32),
            27 => Some(Self::I64),
            28 => Some(Self::F64),
            _ => None,
        }
    }

    /// Size of a single element in bytes, for non-quantized types
    pub fn element_size(&self) -> Result<usize> {
        match self {
            Self::F32 => Ok(4),
            Self::F16 => Ok(2),
            Self::F64 => Ok(8),
            Self::I8 => Ok(1),
            Self::I16 => Ok(2),
            Self::I32 => Ok(4),
            Self::I64 => Ok(8),
            _ => Err(Error::UnsupportedDtype(*self)),
        }
    }

    /// Elements per quantization block (1 for non-quantized types)
    pub fn block_size(&self) -> usize {
        match self {
            Self::Q4_0 | Self::Q4_1 | Self::Q5_0 | Self::Q5_1 | Self::Q8_0 => 32,
            Self::Q2_K | Self::Q3_K | Self::Q4_K | Self::Q5_K | Self::Q6_K | Self::Q8_K => 256,
            _ => 1,
        }
    }

    /// Bytes per quantization block (element size for non-quantized types)
    pub fn type_size(&self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
            Self::F64 => 8,
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 => 4,
            Self::I64 => 8,
            Self::Q4_0 => 18,
            Self::Q4_1 => 20,
            Self::Q5_0 => 22,
            Self::Q5_1 => 24,
            Self::Q8_0 => 34,
            Self::Q2_K => 84,
            Self::Q3_K => 110,
            Self::Q4_K => 144,
            Self::Q5_K => 176,
            Self::Q6_K => 210,
            Self::Q8_K => 292,
        }
    }

    /// Check if this is a quantized type
    pub fn is_quantized(&self) -> bool {
        !matches!(
            self,
            Self::F32 | Self::F16 | Self::F64 | Self::I8 | Self::I16 | Self::I32 | Self::I64
        )
    }
}

/// A tensor descriptor within the container
#[derive(Debug, Clone)]
pub struct TensorInfo {
    /// Tensor name, unique within the container
    pub name: String,

    /// Dimensions (shape), 1 to 4 entries
    pub dims: Vec<u64>,

    /// Data type
    pub dtype: TensorType,

    /// Byte offset relative to the data-section base
    pub offset: u64,
}

impl TensorInfo {
    /// Read a descriptor from a cursor
    pub fn read_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let name = read_string(cursor)?;

        let n_dims = read_u32(cursor)?;
        if n_dims == 0 || n_dims > MAX_DIMS {
            return Err(Error::InvalidTensorInfo(format!(
                "tensor '{}' has {} dimensions, expected 1 to {}",
                name, n_dims, MAX_DIMS
            )));
        }

        let mut dims = Vec::with_capacity(n_dims as usize);
        for _ in 0..n_dims {
            dims.push(read_u64(cursor)?);
        }

        let type_tag = read_u32(cursor)?;
        let dtype = TensorType::from_u32(type_tag).ok_or(Error::InvalidTensorType(type_tag))?;

        let offset = read_u64(cursor)?;

        // A crafted descriptor can declare dims whose product wraps u64,
        // which would defeat every downstream size check.
        let n_elements = dims
            .iter()
            .try_fold(1u64, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                Error::InvalidTensorInfo(format!(
                    "tensor '{}' dimensions {:?} overflow the element count",
                    name, dims
                ))
            })?;
        let n_blocks = n_elements.div_ceil(dtype.block_size() as u64);
        if n_blocks.checked_mul(dtype.type_size() as u64).is_none() {
            return Err(Error::InvalidTensorInfo(format!(
                "tensor '{}' byte length overflows for {} elements of {:?}",
                name, n_elements, dtype
            )));
        }

        Ok(Self {
            name,
            dims,
            dtype,
            offset,
        })
    }

    /// Write the descriptor
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_string(writer, &self.name)?;
        writer.write_u32::<LittleEndian>(self.dims.len() as u32)?;
        for dim in &self.dims {
            writer.write_u64::<LittleEndian>(*dim)?;
        }
        writer.write_u32::<LittleEndian>(self.dtype as u32)?;
        writer.write_u64::<LittleEndian>(self.offset)?;
        Ok(())
    }

    /// Number of elements in the tensor
    ///
    /// Descriptors produced by [`TensorInfo::read_from`] are checked against
    /// u64 overflow of both the element count and the byte size.
    pub fn n_elements(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Size of the tensor data in bytes
    pub fn data_size(&self) -> u64 {
        data_size_for(self.dtype, self.n_elements())
    }

    /// Get the shape as a slice
    pub fn shape(&self) -> &[u64] {
        &self.dims
    }
}

/// Compute the byte size of `n_elements` values of `dtype`
pub fn data_size_for(dtype: TensorType, n_elements: u64) -> u64 {
    let block_size = dtype.block_size() as u64;
    let type_size = dtype.type_size() as u64;
    let n_blocks = n_elements.div_ceil(block_size);
    n_blocks * type_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_type_sizes() {
        assert_eq!(TensorType::F32.element_size().unwrap(), 4);
        assert_eq!(TensorType::F16.element_size().unwrap(), 2);
        assert!(TensorType::Q4_0.element_size().is_err());

        assert_eq!(TensorType::Q4_0.block_size(), 32);
        assert_eq!(TensorType::Q4_0.type_size(), 18);
        assert_eq!(TensorType::Q4_K.block_size(), 256);
        assert_eq!(TensorType::Q4_K.type_size(), 144);

        assert!(TensorType::Q8_0.is_quantized());
        assert!(!TensorType::F32.is_quantized());
    }

    #[test]
    fn test_size_calculation() {
        let tensor = TensorInfo {
            name: "test".to_string(),
            dims: vec![4, 8],
            dtype: TensorType::F32,
            offset: 0,
        };
        assert_eq!(tensor.n_elements(), 32);
        assert_eq!(tensor.data_size(), 128);

        let quantized = TensorInfo {
            name: "test_q".to_string(),
            dims: vec![64, 64],
            dtype: TensorType::Q4_0,
            offset: 0,
        };
        // 4096 elements / 32 per block = 128 blocks of 18 bytes
        assert_eq!(quantized.n_elements(), 4096);
        assert_eq!(quantized.data_size(), 2304);
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let tensor = TensorInfo {
            name: "layer.0.q_proj".to_string(),
            dims: vec![16, 32],
            dtype: TensorType::F16,
            offset: 256,
        };

        let mut buf = Vec::new();
        tensor.write_to(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf.as_slice());
        let parsed = TensorInfo::read_from(&mut cursor).unwrap();
        assert_eq!(parsed.name, tensor.name);
        assert_eq!(parsed.dims, tensor.dims);
        assert_eq!(parsed.dtype, tensor.dtype);
        assert_eq!(parsed.offset, tensor.offset);
    }

    #[test]
    fn test_dimension_overflow_rejected() {
        // dims [u64::MAX, 16]: the element-count product wraps u64
        let mut buf = Vec::new();
        write_string(&mut buf, "big").unwrap();
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf.extend_from_slice(&16u64.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // F32
        buf.extend_from_slice(&0u64.to_le_bytes());

        let mut cursor = Cursor::new(buf.as_slice());
        let err = TensorInfo::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::InvalidTensorInfo(ref msg) if msg.contains("big")));
    }

    #[test]
    fn test_byte_size_overflow_rejected() {
        // Element count fits u64 but the f32 byte length does not
        let mut buf = Vec::new();
        write_string(&mut buf, "huge").unwrap();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&(u64::MAX / 2).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // F32
        buf.extend_from_slice(&0u64.to_le_bytes());

        let mut cursor = Cursor::new(buf.as_slice());
        let err = TensorInfo::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::InvalidTensorInfo(ref msg) if msg.contains("huge")));
    }

    #[test]
    fn test_invalid_dim_count() {
        let mut buf = Vec::new();
        write_string(&mut buf, "bad").unwrap();
        buf.extend_from_slice(&5u32.to_le_bytes());

        let mut cursor = Cursor::new(buf.as_slice());
        let err = TensorInfo::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::InvalidTensorInfo(_)));
    }
}
