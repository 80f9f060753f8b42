//! Error types for checkpoint parsing and merging

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for merge operations
pub type Result<T> = std::result::Result<T, MergeError>;

/// Errors that can occur while loading a checkpoint or merging it
#[derive(Error, Debug)]
pub enum MergeError {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Container-level error from the GGUF layer
    #[error(transparent)]
    Gguf(#[from] ggmerge_gguf::Error),

    /// Adapter path does not resolve to readable bytes
    #[error("Adapter not found: {0}")]
    AdapterNotFound(PathBuf),

    /// Structured checkpoint is present but malformed
    #[error("Malformed checkpoint: {0}")]
    Checkpoint(String),

    /// A and B matrices have incompatible inner dimensions
    #[error(
        "Shape mismatch for layer '{layer}': A is {a_shape:?}, B is {b_shape:?}"
    )]
    ShapeMismatch {
        layer: String,
        a_shape: Vec<u64>,
        b_shape: Vec<u64>,
    },

    /// The merged delta does not have the base tensor's shape
    #[error("Delta for layer '{layer}' is {delta:?} but the base tensor is {base:?}")]
    BaseShapeMismatch {
        layer: String,
        delta: Vec<u64>,
        base: Vec<u64>,
    },

    /// The checkpoint references a layer the base model does not have
    #[error("Base model has no tensor for adapted layer '{layer}'")]
    TargetNotFound { layer: String },

    /// Two adapter pairs address the same base tensor
    #[error("Duplicate adapter target: '{name}'")]
    DuplicateTarget { name: String },

    /// Merged value cannot be represented in the tensor's original dtype
    #[error("Precision loss re-encoding '{tensor}': {value} does not fit the original dtype")]
    PrecisionLoss { tensor: String, value: f32 },
}
