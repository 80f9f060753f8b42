//! LoRA checkpoint reader
//!
//! The checkpoint format is not fully standardized across producers, so two
//! layouts are accepted: a structured record (a JSON header starting at byte
//! zero, followed by the raw tensor data section) and a fallback where the
//! header is embedded somewhere in a producer-specific preamble. If neither
//! parses, the whole input is treated as anonymous tensor bytes with the
//! historical defaults `rank=8, alpha=16` and the checkpoint is flagged as
//! degraded instead of failing.
//!
//! The embedded header's bounds are found by brace-depth counting with
//! string and escape tracking; scanning for the first `}` would truncate any
//! header whose `target_modules` or tensor map nests objects.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use ggmerge_gguf::TensorType;

use crate::error::{MergeError, Result};

/// Default rank when checkpoint metadata cannot be recovered
pub const DEFAULT_RANK: u32 = 8;

/// Default alpha when checkpoint metadata cannot be recovered
pub const DEFAULT_ALPHA: f32 = 16.0;

/// A parsed LoRA checkpoint
#[derive(Debug, Clone)]
pub struct LoraCheckpoint {
    /// Adaptation rank, the shared inner dimension of each A/B pair
    pub rank: u32,

    /// Scaling numerator; the applied factor is `alpha / rank`
    pub alpha: f32,

    /// Module names the adapter targets
    pub target_modules: BTreeSet<String>,

    /// Named tensors, keyed `lora_A/<layer>` and `lora_B/<layer>`
    pub tensors: BTreeMap<String, RawTensor>,

    /// True when metadata was recovered via the degraded fallback
    pub degraded: bool,
}

/// A named tensor extracted from the checkpoint data section
#[derive(Debug, Clone)]
pub struct RawTensor {
    /// Element dtype, f32 or f16
    pub dtype: TensorType,

    /// Shape, row-major
    pub shape: Vec<u64>,

    /// Encoded element data
    pub bytes: Vec<u8>,
}

impl RawTensor {
    /// Number of elements
    pub fn n_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Decode to f32, promoting f16
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        Ok(ggmerge_gguf::dequantize(
            &self.bytes,
            self.dtype,
            self.n_elements() as usize,
        )?)
    }
}

/// JSON header of a structured checkpoint
#[derive(Debug, Deserialize)]
struct CheckpointHeader {
    #[serde(rename = "lora_r")]
    rank: u32,

    #[serde(rename = "lora_alpha")]
    alpha: f32,

    #[serde(default)]
    target_modules: BTreeSet<String>,

    #[serde(default)]
    tensors: BTreeMap<String, TensorEntry>,
}

#[derive(Debug, Deserialize)]
struct TensorEntry {
    dtype: String,

    shape: Vec<u64>,

    /// Byte offset into the data section following the header
    offset: u64,

    /// Encoded byte length
    size: u64,
}

impl LoraCheckpoint {
    /// Read and parse a checkpoint from a path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MergeError::AdapterNotFound(path.to_path_buf()),
            _ => MergeError::Io(e),
        })?;
        Self::from_bytes(&data)
    }

    /// Parse a checkpoint from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        match json_object_span(data) {
            Some((start, end)) => match serde_json::from_slice::<CheckpointHeader>(&data[start..end]) {
                Ok(header) => Self::from_header(header, &data[end..]),
                Err(e) => {
                    warn!(error = %e, "checkpoint header found but unparseable, using degraded defaults");
                    Ok(Self::degraded_fallback())
                }
            },
            None => {
                warn!("no checkpoint header found, using degraded defaults");
                Ok(Self::degraded_fallback())
            }
        }
    }

    fn from_header(header: CheckpointHeader, data_section: &[u8]) -> Result<Self> {
        if header.rank == 0 {
            return Err(MergeError::Checkpoint("lora_r must be positive".into()));
        }
        if !(header.alpha > 0.0) {
            return Err(MergeError::Checkpoint("lora_alpha must be positive".into()));
        }

        let mut tensors = BTreeMap::new();
        for (name, entry) in header.tensors {
            let dtype = match entry.dtype.as_str() {
                "f32" | "F32" => TensorType::F32,
                "f16" | "F16" => TensorType::F16,
                other => {
                    return Err(MergeError::Checkpoint(format!(
                        "tensor '{}' has unsupported dtype '{}'",
                        name, other
                    )))
                }
            };

            let n_elements: u64 = entry.shape.iter().product();
            let element_size = match dtype {
                TensorType::F32 => 4u64,
                _ => 2u64,
            };
            if entry.size != n_elements * element_size {
                return Err(MergeError::Checkpoint(format!(
                    "tensor '{}' declares {} bytes but shape {:?} needs {}",
                    name,
                    entry.size,
                    entry.shape,
                    n_elements * element_size
                )));
            }

            let start = entry.offset as usize;
            let end = start
                .checked_add(entry.size as usize)
                .filter(|&e| e <= data_section.len())
                .ok_or_else(|| {
                    MergeError::Checkpoint(format!(
                        "tensor '{}' extends past the checkpoint data section",
                        name
                    ))
                })?;

            tensors.insert(
                name,
                RawTensor {
                    dtype,
                    shape: entry.shape,
                    bytes: data_section[start..end].to_vec(),
                },
            );
        }

        debug!(
            rank = header.rank,
            alpha = header.alpha,
            tensors = tensors.len(),
            "checkpoint parsed"
        );

        Ok(Self {
            rank: header.rank,
            alpha: header.alpha,
            target_modules: header.target_modules,
            tensors,
            degraded: false,
        })
    }

    fn degraded_fallback() -> Self {
        Self {
            rank: DEFAULT_RANK,
            alpha: DEFAULT_ALPHA,
            target_modules: BTreeSet::new(),
            tensors: BTreeMap::new(),
            degraded: true,
        }
    }

    /// The applied scale factor `alpha / rank`
    pub fn scale(&self) -> f32 {
        self.alpha / self.rank as f32
    }
}

/// Locate the first top-level JSON object in `data`, returning its byte span.
///
/// Tracks brace depth, string state, and escapes so braces inside string
/// values and nested objects do not terminate the scan early. Returns `None`
/// when no balanced object exists.
fn json_object_span(data: &[u8]) -> Option<(usize, usize)> {
    let start = data.iter().position(|&b| b == b'{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &byte) in data[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_json(tensors: &str) -> String {
        format!(
            r#"{{"lora_r": 4, "lora_alpha": 8.0, "target_modules": ["q_proj"], "tensors": {tensors}}}"#
        )
    }

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_json_object_span_nested() {
        let data = br#"junk {"a": {"b": {"c": 1}}, "d": 2} trailing"#;
        let (start, end) = json_object_span(data).unwrap();
        assert_eq!(&data[start..end], br#"{"a": {"b": {"c": 1}}, "d": 2}"#);
    }

    #[test]
    fn test_json_object_span_braces_in_strings() {
        let data = br#"{"note": "a } inside", "esc": "quote \" and }"} rest"#;
        let (start, end) = json_object_span(data).unwrap();
        assert_eq!(end, data.len() - 5);
        assert_eq!(start, 0);
    }

    #[test]
    fn test_json_object_span_unbalanced() {
        assert!(json_object_span(br#"{"open": 1"#).is_none());
        assert!(json_object_span(b"no braces at all").is_none());
    }

    #[test]
    fn test_structured_layout() {
        let tensor_data = f32_bytes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let header = header_json(
            r#"{"lora_A/layer.0.q_proj": {"dtype": "f32", "shape": [2, 4], "offset": 0, "size": 32}}"#,
        );
        let mut data = header.into_bytes();
        data.extend_from_slice(&tensor_data);

        let checkpoint = LoraCheckpoint::from_bytes(&data).unwrap();
        assert_eq!(checkpoint.rank, 4);
        assert_eq!(checkpoint.alpha, 8.0);
        assert_eq!(checkpoint.scale(), 2.0);
        assert!(!checkpoint.degraded);
        assert!(checkpoint.target_modules.contains("q_proj"));

        let tensor = &checkpoint.tensors["lora_A/layer.0.q_proj"];
        assert_eq!(tensor.shape, vec![2, 4]);
        assert_eq!(tensor.to_f32().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_embedded_header_layout() {
        // Producer preamble before the header
        let mut data = b"LORAv2\x00\x01".to_vec();
        let header = header_json(
            r#"{"lora_A/l": {"dtype": "f16", "shape": [2], "offset": 0, "size": 4}}"#,
        );
        data.extend_from_slice(header.as_bytes());
        data.extend_from_slice(&half::f16::from_f32(1.5).to_le_bytes());
        data.extend_from_slice(&half::f16::from_f32(-0.5).to_le_bytes());

        let checkpoint = LoraCheckpoint::from_bytes(&data).unwrap();
        assert!(!checkpoint.degraded);
        let tensor = &checkpoint.tensors["lora_A/l"];
        assert_eq!(tensor.dtype, TensorType::F16);
        assert_eq!(tensor.to_f32().unwrap(), vec![1.5, -0.5]);
    }

    #[test]
    fn test_degraded_fallback() {
        let checkpoint = LoraCheckpoint::from_bytes(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert!(checkpoint.degraded);
        assert_eq!(checkpoint.rank, DEFAULT_RANK);
        assert_eq!(checkpoint.alpha, DEFAULT_ALPHA);
        assert!(checkpoint.tensors.is_empty());
    }

    #[test]
    fn test_unparseable_header_degrades() {
        let checkpoint = LoraCheckpoint::from_bytes(br#"{"lora_r": "not a number"}"#).unwrap();
        assert!(checkpoint.degraded);
    }

    #[test]
    fn test_invalid_rank_rejected() {
        let data = br#"{"lora_r": 0, "lora_alpha": 16.0}"#;
        assert!(matches!(
            LoraCheckpoint::from_bytes(data),
            Err(MergeError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_tensor_out_of_bounds_rejected() {
        let header = header_json(
            r#"{"lora_A/l": {"dtype": "f32", "shape": [4], "offset": 0, "size": 16}}"#,
        );
        let mut data = header.into_bytes();
        data.extend_from_slice(&[0u8; 8]); // only half the declared bytes

        assert!(matches!(
            LoraCheckpoint::from_bytes(&data),
            Err(MergeError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_size_shape_mismatch_rejected() {
        let header = header_json(
            r#"{"lora_A/l": {"dtype": "f32", "shape": [4], "offset": 0, "size": 12}}"#,
        );
        let mut data = header.into_bytes();
        data.extend_from_slice(&[0u8; 16]);

        assert!(matches!(
            LoraCheckpoint::from_bytes(&data),
            Err(MergeError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_open_missing_path() {
        assert!(matches!(
            LoraCheckpoint::open("/nonexistent/adapter.bin"),
            Err(MergeError::AdapterNotFound(_))
        ));
    }
}
