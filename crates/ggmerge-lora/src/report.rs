//! Per-layer merge outcomes
//!
//! The engine returns a structured report instead of printing progress; the
//! caller decides how to render it (table, JSON, log lines).

use serde::Serialize;

/// Why a layer was skipped rather than merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `lora_A` tensor present with no matching `lora_B`
    Unpaired,
    /// Layer name matches none of the checkpoint's target modules
    NotTargeted,
    /// Inner dimensions incompatible, permissive mode downgraded the error
    ShapeMismatch,
}

/// Outcome of one layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeStatus {
    /// Delta computed and applied to the base tensor
    Merged {
        /// Euclidean norm of the flattened scaled delta
        delta_norm: f64,
    },
    /// Layer left untouched
    Skipped { reason: SkipReason },
}

/// One layer's record in the report
#[derive(Debug, Clone, Serialize)]
pub struct MergeOp {
    /// Base tensor name the pair addresses
    pub layer: String,

    /// Shape of the `lora_A` matrix
    pub a_shape: Vec<u64>,

    /// Shape of the `lora_B` matrix, absent when unpaired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b_shape: Option<Vec<u64>>,

    #[serde(flatten)]
    pub status: MergeStatus,
}

/// Full report of one merge run
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    /// Applied scale factor `alpha / rank`
    pub scale: f32,

    /// True when checkpoint metadata came from the degraded fallback
    pub degraded: bool,

    /// Per-layer records in processing order
    pub ops: Vec<MergeOp>,
}

impl MergeReport {
    /// Number of layers actually merged
    pub fn merged_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op.status, MergeStatus::Merged { .. }))
            .count()
    }

    /// Number of layers skipped
    pub fn skipped_count(&self) -> usize {
        self.ops.len() - self.merged_count()
    }

    /// True when at least one layer was skipped
    pub fn is_partial(&self) -> bool {
        self.skipped_count() > 0
    }
}
