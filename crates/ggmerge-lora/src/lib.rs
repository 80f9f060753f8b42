//! LoRA checkpoint parsing and GGUF merge engine
//!
//! Applies `W' = W + (A @ B) * (alpha / rank)` to the tensors of a GGUF
//! container. Checkpoint parsing tolerates non-standard producers, the merge
//! itself validates strictly before computing, and all outcomes are returned
//! as a structured per-layer report.

pub mod checkpoint;
pub mod error;
pub mod matmul;
pub mod merge;
pub mod report;

pub use checkpoint::{LoraCheckpoint, RawTensor, DEFAULT_ALPHA, DEFAULT_RANK};
pub use error::{MergeError, Result};
pub use matmul::{DefaultGemm, Gemm, NaiveGemm};
pub use merge::{merge_checkpoint, merge_files, MergeOptions, MergeOutcome};
pub use report::{MergeOp, MergeReport, MergeStatus, SkipReason};
