//! GGUF container writer
//!
//! Streams a new container from an existing parsed file plus an overlay of
//! replacement tensor buffers. Metadata and descriptor order are preserved;
//! descriptor offsets are recomputed so replacements whose dtype was
//! promoted (and whose byte length therefore changed) shift all downstream
//! tensors. Padding regions, including any trailing padding after the last
//! tensor, are copied from the source, so with an empty overlay the output
//! is byte-identical to the input.
//!
//! Output goes to a `.tmp` sibling first and is renamed over the
//! destination only after a successful flush, so a failed run never leaves
//! a valid-looking but truncated container behind.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::format::align_offset;
use crate::reader::GgufFile;
use crate::tensor_info::{data_size_for, TensorInfo, TensorType};

/// A replacement buffer for one tensor
///
/// The shape never changes in a merge; the dtype may differ from the
/// original descriptor when precision promotion occurred.
#[derive(Debug, Clone)]
pub struct ReplacementTensor {
    /// Data type of `bytes`
    pub dtype: TensorType,
    /// Encoded tensor data
    pub bytes: Vec<u8>,
}

/// Write a container combining `file` with the `replacements` overlay
pub fn write_merged(
    file: &GgufFile,
    replacements: &BTreeMap<String, ReplacementTensor>,
    dest: &Path,
) -> Result<()> {
    for name in replacements.keys() {
        if !file.contains_tensor(name) {
            return Err(Error::TensorNotFound(name.clone()));
        }
    }

    let tmp_path = tmp_sibling(dest);
    let result = write_to_tmp(file, replacements, &tmp_path);

    match result {
        Ok(()) => {
            fs::rename(&tmp_path, dest)?;
            info!(dest = %dest.display(), replaced = replacements.len(), "container written");
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

fn write_to_tmp(
    file: &GgufFile,
    replacements: &BTreeMap<String, ReplacementTensor>,
    tmp_path: &Path,
) -> Result<()> {
    let alignment = file.alignment() as u64;

    // Recompute descriptors: same order, new dtypes/lengths where replaced,
    // offsets re-packed contiguously modulo alignment.
    let mut descriptors = Vec::with_capacity(file.tensors().len());
    let mut next_offset = 0u64;
    for tensor in file.tensors() {
        let (dtype, size) = match replacements.get(&tensor.name) {
            Some(replacement) => {
                let expected = data_size_for(replacement.dtype, tensor.n_elements());
                if replacement.bytes.len() as u64 != expected {
                    return Err(Error::InvalidTensorInfo(format!(
                        "replacement for '{}' is {} bytes, expected {} for dtype {:?}",
                        tensor.name,
                        replacement.bytes.len(),
                        expected,
                        replacement.dtype
                    )));
                }
                (replacement.dtype, expected)
            }
            None => (tensor.dtype, tensor.data_size()),
        };

        descriptors.push(TensorInfo {
            name: tensor.name.clone(),
            dims: tensor.dims.clone(),
            dtype,
            offset: next_offset,
        });
        next_offset = align_offset(next_offset + size, alignment);
    }

    let out = File::create(tmp_path)?;
    let mut writer = BufWriter::new(out);

    file.header().write_to(&mut writer)?;
    file.metadata().write_to(&mut writer)?;

    let mut position = file.header_and_metadata_len()?;
    for descriptor in &descriptors {
        let mut buf = Vec::new();
        descriptor.write_to(&mut buf)?;
        writer.write_all(&buf)?;
        position += buf.len() as u64;
    }

    // Pad up to the data-section base, copying the source bytes verbatim.
    // An empty container may end before the aligned base; it gets no pad.
    let data_offset = align_offset(position, alignment);
    let pad_end = data_offset.min(file.file_size() as u64);
    if pad_end > position {
        writer.write_all(&file.as_bytes()[position as usize..pad_end as usize])?;
    }

    // Data section: replacement buffers spliced in, everything else copied
    // verbatim from the source map. Inter-tensor gaps are zero padding.
    let mut written = 0u64;
    for (original, descriptor) in file.tensors().iter().zip(&descriptors) {
        write_zeros(&mut writer, (descriptor.offset - written) as usize)?;
        written = descriptor.offset;

        let bytes: &[u8] = match replacements.get(&original.name) {
            Some(replacement) => &replacement.bytes,
            None => file.tensor_data(&original.name)?,
        };
        writer.write_all(bytes)?;
        written += bytes.len() as u64;

        debug!(
            tensor = %descriptor.name,
            offset = descriptor.offset,
            len = bytes.len(),
            replaced = replacements.contains_key(&original.name),
            "tensor written"
        );
    }

    // Preserve any trailing padding the producer wrote after the last tensor
    let tail_start = file
        .tensors()
        .last()
        .map(|t| file.data_offset() + t.offset + t.data_size())
        .unwrap_or(pad_end);
    writer.write_all(&file.as_bytes()[tail_start as usize..])?;

    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}

fn write_zeros<W: Write>(writer: &mut W, count: usize) -> Result<()> {
    const ZEROS: [u8; 64] = [0u8; 64];
    let mut remaining = count;
    while remaining > 0 {
        let chunk = remaining.min(ZEROS.len());
        writer.write_all(&ZEROS[..chunk])?;
        remaining -= chunk;
    }
    Ok(())
}

fn tmp_sibling(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dest.with_file_name(name)
}

impl GgufFile {
    /// Byte length of the header plus metadata section
    fn header_and_metadata_len(&self) -> Result<u64> {
        let mut buf = Vec::new();
        self.header().write_to(&mut buf)?;
        self.metadata().write_to(&mut buf)?;
        Ok(buf.len() as u64)
    }
}
