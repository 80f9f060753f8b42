//! Merge engine
//!
//! Pairs `lora_A/<layer>` with `lora_B/<layer>`, computes
//! `delta = (A @ B) * (alpha / rank)` per pair, and adds it to the decoded
//! base tensor, producing a replacement-buffer overlay for the writer plus a
//! per-layer report.
//!
//! The run has two phases. Validation walks pairs in lexicographic name
//! order and fails fast on fatal defects (missing target, duplicate target,
//! shape mismatch outside permissive mode) before any delta is computed.
//! Computation then runs the surviving pairs, in parallel when the
//! `parallel` feature is on; results are collected in validation order so
//! output bytes never depend on thread scheduling.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use ggmerge_gguf::{dequantize, write_merged, GgufFile, ReplacementTensor, TensorType};

use crate::checkpoint::LoraCheckpoint;
use crate::error::{MergeError, Result};
use crate::matmul::{DefaultGemm, Gemm};
use crate::report::{MergeOp, MergeReport, MergeStatus, SkipReason};

const LORA_A_MARKER: &str = "lora_A";
const LORA_B_MARKER: &str = "lora_B";

/// Merge policy knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Downgrade per-layer shape mismatches to skip-and-warn
    pub permissive: bool,

    /// Re-encode f16 base tensors as f32 instead of failing when merged
    /// values overflow the f16 range
    pub promote: bool,
}

/// Result of a merge run: the overlay for the writer plus the report
#[derive(Debug)]
pub struct MergeOutcome {
    /// Replacement buffers keyed by base tensor name
    pub replacements: BTreeMap<String, ReplacementTensor>,

    /// Per-layer outcomes
    pub report: MergeReport,
}

/// A pair that survived validation, queued for the compute phase
struct PlannedMerge {
    op_index: usize,
    layer: String,
    a_name: String,
    b_name: String,
    m: usize,
    k: usize,
    n: usize,
    base_dtype: TensorType,
}

/// Merge `checkpoint` into `base`, returning the replacement overlay
pub fn merge_checkpoint(
    base: &GgufFile,
    checkpoint: &LoraCheckpoint,
    options: &MergeOptions,
) -> Result<MergeOutcome> {
    let scale = checkpoint.scale();
    let mut ops: Vec<MergeOp> = Vec::new();
    let mut planned: Vec<PlannedMerge> = Vec::new();

    // Validation phase, lexicographic by tensor name
    for (a_name, a_tensor) in &checkpoint.tensors {
        if !a_name.contains(LORA_A_MARKER) {
            continue;
        }
        let b_name = pair_name(a_name);
        let layer = target_name(a_name);
        let a_shape = a_tensor.shape.clone();

        if !matches_target(&layer, checkpoint) {
            debug!(layer = %layer, "layer not in target modules, skipping");
            ops.push(MergeOp {
                layer,
                a_shape,
                b_shape: None,
                status: MergeStatus::Skipped {
                    reason: SkipReason::NotTargeted,
                },
            });
            continue;
        }

        let Some(b_tensor) = checkpoint.tensors.get(&b_name) else {
            warn!(layer = %layer, "unpaired {} tensor, skipping", LORA_A_MARKER);
            ops.push(MergeOp {
                layer,
                a_shape,
                b_shape: None,
                status: MergeStatus::Skipped {
                    reason: SkipReason::Unpaired,
                },
            });
            continue;
        };
        let b_shape = b_tensor.shape.clone();

        let compatible = a_shape.len() == 2 && b_shape.len() == 2 && a_shape[1] == b_shape[0];
        if !compatible {
            let err = MergeError::ShapeMismatch {
                layer: layer.clone(),
                a_shape: a_shape.clone(),
                b_shape: b_shape.clone(),
            };
            if !options.permissive {
                return Err(err);
            }
            warn!(error = %err, "permissive mode, skipping layer");
            ops.push(MergeOp {
                layer,
                a_shape,
                b_shape: Some(b_shape),
                status: MergeStatus::Skipped {
                    reason: SkipReason::ShapeMismatch,
                },
            });
            continue;
        }
        let (m, k, n) = (a_shape[0] as usize, a_shape[1] as usize, b_shape[1] as usize);

        let base_tensor = base
            .tensor_info(&layer)
            .ok_or_else(|| MergeError::TargetNotFound {
                layer: layer.clone(),
            })?;
        if base_tensor.n_elements() != (m * n) as u64 {
            let err = MergeError::BaseShapeMismatch {
                layer: layer.clone(),
                delta: vec![m as u64, n as u64],
                base: base_tensor.dims.clone(),
            };
            if !options.permissive {
                return Err(err);
            }
            warn!(error = %err, "permissive mode, skipping layer");
            ops.push(MergeOp {
                layer,
                a_shape,
                b_shape: Some(b_shape),
                status: MergeStatus::Skipped {
                    reason: SkipReason::ShapeMismatch,
                },
            });
            continue;
        }

        if planned.iter().any(|p| p.layer == layer) {
            return Err(MergeError::DuplicateTarget { name: layer });
        }

        planned.push(PlannedMerge {
            op_index: ops.len(),
            layer: layer.clone(),
            a_name: a_name.clone(),
            b_name,
            m,
            k,
            n,
            base_dtype: base_tensor.dtype,
        });
        ops.push(MergeOp {
            layer,
            a_shape,
            b_shape: Some(b_shape),
            status: MergeStatus::Merged { delta_norm: 0.0 },
        });
    }

    // Compute phase; collection preserves validation order
    let gemm = DefaultGemm::default();
    #[cfg(feature = "parallel")]
    let computed: Vec<Result<(ReplacementTensor, f64)>> = {
        use rayon::prelude::*;
        planned
            .par_iter()
            .map(|plan| compute_one(base, checkpoint, plan, scale, options, &gemm))
            .collect()
    };
    #[cfg(not(feature = "parallel"))]
    let computed: Vec<Result<(ReplacementTensor, f64)>> = planned
        .iter()
        .map(|plan| compute_one(base, checkpoint, plan, scale, options, &gemm))
        .collect();

    let mut replacements = BTreeMap::new();
    for (plan, result) in planned.iter().zip(computed) {
        let (replacement, delta_norm) = result?;
        debug!(layer = %plan.layer, delta_norm, "layer merged");
        ops[plan.op_index].status = MergeStatus::Merged { delta_norm };
        replacements.insert(plan.layer.clone(), replacement);
    }

    let report = MergeReport {
        scale,
        degraded: checkpoint.degraded,
        ops,
    };
    info!(
        merged = report.merged_count(),
        skipped = report.skipped_count(),
        scale,
        "merge computed"
    );
    Ok(MergeOutcome {
        replacements,
        report,
    })
}

/// Open both inputs, merge, and write the result to `dest`
pub fn merge_files(
    model: &Path,
    adapter: &Path,
    dest: &Path,
    options: &MergeOptions,
) -> Result<MergeReport> {
    let base = GgufFile::open(model)?;
    let checkpoint = LoraCheckpoint::open(adapter)?;
    if checkpoint.degraded {
        warn!(
            adapter = %adapter.display(),
            "checkpoint metadata unrecoverable, nothing will be merged"
        );
    }

    let outcome = merge_checkpoint(&base, &checkpoint, options)?;
    write_merged(&base, &outcome.replacements, dest)?;
    Ok(outcome.report)
}

fn compute_one(
    base: &GgufFile,
    checkpoint: &LoraCheckpoint,
    plan: &PlannedMerge,
    scale: f32,
    options: &MergeOptions,
    gemm: &impl Gemm,
) -> Result<(ReplacementTensor, f64)> {
    let a = checkpoint.tensors[&plan.a_name].to_f32()?;
    let b = checkpoint.tensors[&plan.b_name].to_f32()?;

    let mut delta = vec![0.0f32; plan.m * plan.n];
    gemm.gemm(&a, &b, plan.m, plan.k, plan.n, &mut delta);

    let base_values = dequantize(
        base.tensor_data(&plan.layer)?,
        plan.base_dtype,
        plan.m * plan.n,
    )?;

    let mut norm_sq = 0.0f64;
    let mut merged = Vec::with_capacity(delta.len());
    for (d, w) in delta.iter().zip(&base_values) {
        let scaled = scale * d;
        norm_sq += f64::from(scaled) * f64::from(scaled);
        merged.push(w + scaled);
    }

    let replacement = encode_replacement(&plan.layer, plan.base_dtype, &base_values, &merged, options)?;
    Ok((replacement, norm_sq.sqrt()))
}

/// Re-encode merged values in the base tensor's dtype.
///
/// Quantized bases are always promoted to f32 since the merge cannot
/// reproduce the original quantization. A value is a precision loss only
/// when it left the target dtype's representable range: a base weight that
/// was already non-finite re-encodes losslessly and passes through.
fn encode_replacement(
    name: &str,
    dtype: TensorType,
    base: &[f32],
    merged: &[f32],
    options: &MergeOptions,
) -> Result<ReplacementTensor> {
    if dtype == TensorType::F16 && !options.promote {
        let f16_max = f32::from(half::f16::MAX);
        let mut bytes = Vec::with_capacity(merged.len() * 2);
        for (&value, &base) in merged.iter().zip(base) {
            if base.is_finite() && (!value.is_finite() || value.abs() > f16_max) {
                return Err(MergeError::PrecisionLoss {
                    tensor: name.to_string(),
                    value,
                });
            }
            bytes.extend_from_slice(&half::f16::from_f32(value).to_le_bytes());
        }
        return Ok(ReplacementTensor {
            dtype: TensorType::F16,
            bytes,
        });
    }

    if dtype == TensorType::F16 {
        debug!(tensor = name, "promoting f16 tensor to f32");
    } else if dtype != TensorType::F32 {
        debug!(tensor = name, dtype = ?dtype, "promoting quantized tensor to f32");
    }
    for (&value, &base) in merged.iter().zip(base) {
        if !value.is_finite() && base.is_finite() {
            return Err(MergeError::PrecisionLoss {
                tensor: name.to_string(),
                value,
            });
        }
    }
    Ok(encode_f32(merged))
}

fn encode_f32(values: &[f32]) -> ReplacementTensor {
    ReplacementTensor {
        dtype: TensorType::F32,
        bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

/// Derive the `lora_B` name from a `lora_A` name
fn pair_name(a_name: &str) -> String {
    a_name.replacen(LORA_A_MARKER, LORA_B_MARKER, 1)
}

/// Strip the pair prefix to get the base tensor name
fn target_name(a_name: &str) -> String {
    a_name.replacen(&format!("{}/", LORA_A_MARKER), "", 1)
}

fn matches_target(layer: &str, checkpoint: &LoraCheckpoint) -> bool {
    checkpoint.target_modules.is_empty()
        || checkpoint
            .target_modules
            .iter()
            .any(|module| layer.contains(module.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_and_target_names() {
        assert_eq!(pair_name("lora_A/layer.0.q_proj"), "lora_B/layer.0.q_proj");
        assert_eq!(target_name("lora_A/layer.0.q_proj"), "layer.0.q_proj");
    }

    #[test]
    fn test_encode_f16_overflow() {
        let options = MergeOptions::default();
        let base = [1.0, 2.0];
        let err = encode_replacement("t", TensorType::F16, &base, &[1.0, 70000.0], &options)
            .unwrap_err();
        assert!(matches!(
            err,
            MergeError::PrecisionLoss { ref tensor, value } if tensor == "t" && value == 70000.0
        ));
    }

    #[test]
    fn test_encode_f16_promotes_on_request() {
        let options = MergeOptions {
            promote: true,
            ..Default::default()
        };
        let base = [1.0, 2.0];
        let replacement =
            encode_replacement("t", TensorType::F16, &base, &[1.0, 70000.0], &options).unwrap();
        assert_eq!(replacement.dtype, TensorType::F32);
        assert_eq!(replacement.bytes.len(), 8);
    }

    #[test]
    fn test_encode_rejects_newly_non_finite() {
        let options = MergeOptions {
            promote: true,
            ..Default::default()
        };
        assert!(matches!(
            encode_replacement("t", TensorType::F32, &[1.0], &[f32::INFINITY], &options),
            Err(MergeError::PrecisionLoss { .. })
        ));
    }

    #[test]
    fn test_encode_keeps_non_finite_base() {
        // A base weight that was already infinite stays infinite after the
        // delta is added; that is a lossless re-encode, not an overflow.
        let options = MergeOptions::default();
        let base = [f32::INFINITY, 1.0];
        let merged = [f32::INFINITY, 1.5];

        let replacement =
            encode_replacement("t", TensorType::F32, &base, &merged, &options).unwrap();
        assert_eq!(replacement.dtype, TensorType::F32);

        let replacement =
            encode_replacement("t", TensorType::F16, &base, &merged, &options).unwrap();
        assert_eq!(replacement.dtype, TensorType::F16);
        let first = half::f16::from_le_bytes([replacement.bytes[0], replacement.bytes[1]]);
        assert!(first.is_infinite());
    }

    #[test]
    fn test_encode_quantized_promotes() {
        let options = MergeOptions::default();
        let base = [0.0, 0.0];
        let replacement =
            encode_replacement("t", TensorType::Q8_0, &base, &[0.5, -0.5], &options).unwrap();
        assert_eq!(replacement.dtype, TensorType::F32);
    }
}
