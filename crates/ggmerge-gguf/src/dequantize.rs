//! Tensor dequantization
//!
//! Scalar decoders from GGML storage formats to f32, the canonical
//! computation dtype for merging. Block layouts follow llama.cpp.

use half::f16;

use crate::error::{Error, Result};
use crate::tensor_info::TensorType;

/// Decode tensor bytes of the given dtype into f32 values
pub fn dequantize(data: &[u8], dtype: TensorType, n_elements: usize) -> Result<Vec<f32>> {
    match dtype {
        TensorType::F32 => dequantize_f32(data, n_elements),
        TensorType::F16 => dequantize_f16(data, n_elements),
        TensorType::Q4_0 => dequantize_q4_0(data, n_elements),
        TensorType::Q4_1 => dequantize_q4_1(data, n_elements),
        TensorType::Q5_0 => dequantize_q5_0(data, n_elements),
        TensorType::Q5_1 => dequantize_q5_1(data, n_elements),
        TensorType::Q8_0 => dequantize_q8_0(data, n_elements),
        other => Err(Error::UnsupportedDtype(other)),
    }
}

fn check_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        return Err(Error::BufferTooSmall {
            needed,
            available: data.len(),
        });
    }
    Ok(())
}

fn dequantize_f32(data: &[u8], n_elements: usize) -> Result<Vec<f32>> {
    check_len(data, n_elements * 4)?;
    Ok(data
        .chunks_exact(4)
        .take(n_elements)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn dequantize_f16(data: &[u8], n_elements: usize) -> Result<Vec<f32>> {
    check_len(data, n_elements * 2)?;
    Ok(data
        .chunks_exact(2)
        .take(n_elements)
        .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
        .collect())
}

// Q4_0: 32 4-bit values packed into 16 bytes, one f16 scale. 18 bytes/block.
fn dequantize_q4_0(data: &[u8], n_elements: usize) -> Result<Vec<f32>> {
    const BLOCK: usize = 32;
    const BLOCK_BYTES: usize = 18;
    let n_blocks = n_elements.div_ceil(BLOCK);
    check_len(data, n_blocks * BLOCK_BYTES)?;

    let mut result = Vec::with_capacity(n_elements);
    for block in data.chunks_exact(BLOCK_BYTES).take(n_blocks) {
        let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
        let qs = &block[2..18];
        for i in 0..BLOCK {
            if result.len() >= n_elements {
                break;
            }
            let q = if i < 16 {
                (qs[i] & 0x0F) as i8 - 8
            } else {
                ((qs[i - 16] >> 4) & 0x0F) as i8 - 8
            };
            result.push(q as f32 * d);
        }
    }
    Ok(result)
}

// Q4_1: like Q4_0 plus an f16 minimum. 20 bytes/block.
fn dequantize_q4_1(data: &[u8], n_elements: usize) -> Result<Vec<f32>> {
    const BLOCK: usize = 32;
    const BLOCK_BYTES: usize = 20;
    let n_blocks = n_elements.div_ceil(BLOCK);
    check_len(data, n_blocks * BLOCK_BYTES)?;

    let mut result = Vec::with_capacity(n_elements);
    for block in data.chunks_exact(BLOCK_BYTES).take(n_blocks) {
        let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
        let m = f16::from_le_bytes([block[2], block[3]]).to_f32();
        let qs = &block[4..20];
        for i in 0..BLOCK {
            if result.len() >= n_elements {
                break;
            }
            let q = if i < 16 {
                qs[i] & 0x0F
            } else {
                (qs[i - 16] >> 4) & 0x0F
            };
            result.push(q as f32 * d + m);
        }
    }
    Ok(result)
}

// Q5_0: 4-bit low nibbles plus a 32-bit high-bit mask, f16 scale. 22 bytes/block.
fn dequantize_q5_0(data: &[u8], n_elements: usize) -> Result<Vec<f32>> {
    const BLOCK: usize = 32;
    const BLOCK_BYTES: usize = 22;
    let n_blocks = n_elements.div_ceil(BLOCK);
    check_len(data, n_blocks * BLOCK_BYTES)?;

    let mut result = Vec::with_capacity(n_elements);
    for block in data.chunks_exact(BLOCK_BYTES).take(n_blocks) {
        let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
        let qh = u32::from_le_bytes([block[2], block[3], block[4], block[5]]);
        let qs = &block[6..22];
        for i in 0..BLOCK {
            if result.len() >= n_elements {
                break;
            }
            let low = if i < 16 {
                qs[i] & 0x0F
            } else {
                (qs[i - 16] >> 4) & 0x0F
            };
            let high = ((qh >> i) & 1) as u8;
            let q = ((high << 4) | low) as i8 - 16;
            result.push(q as f32 * d);
        }
    }
    Ok(result)
}

// Q5_1: Q5_0 plus an f16 minimum. 24 bytes/block.
fn dequantize_q5_1(data: &[u8], n_elements: usize) -> Result<Vec<f32>> {
    const BLOCK: usize = 32;
    const BLOCK_BYTES: usize = 24;
    let n_blocks = n_elements.div_ceil(BLOCK);
    check_len(data, n_blocks * BLOCK_BYTES)?;

    let mut result = Vec::with_capacity(n_elements);
    for block in data.chunks_exact(BLOCK_BYTES).take(n_blocks) {
        let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
        let m = f16::from_le_bytes([block[2], block[3]]).to_f32();
        let qh = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
        let qs = &block[8..24];
        for i in 0..BLOCK {
            if result.len() >= n_elements {
                break;
            }
            let low = if i < 16 {
                qs[i] & 0x0F
            } else {
                (qs[i - 16] >> 4) & 0x0F
            };
            let high = ((qh >> i) & 1) as u8;
            let q = (high << 4) | low;
            result.push(q as f32 * d + m);
        }
    }
    Ok(result)
}

// Q8_0: one f16 scale, 32 signed bytes. 34 bytes/block.
fn dequantize_q8_0(data: &[u8], n_elements: usize) -> Result<Vec<f32>> {
    const BLOCK: usize = 32;
    const BLOCK_BYTES: usize = 34;
    let n_blocks = n_elements.div_ceil(BLOCK);
    check_len(data, n_blocks * BLOCK_BYTES)?;

    let mut result = Vec::with_capacity(n_elements);
    for block in data.chunks_exact(BLOCK_BYTES).take(n_blocks) {
        let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
        for &byte in block[2..34].iter().take(n_elements - result.len()) {
            result.push(byte as i8 as f32 * d);
        }
    }
    Ok(result)
}
