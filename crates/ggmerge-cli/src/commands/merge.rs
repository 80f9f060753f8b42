//! Merge command implementation

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};
use tracing::info;

use ggmerge_lora::{merge_files, MergeOptions, MergeReport, MergeStatus, SkipReason};

use crate::commands::Command;

#[derive(Args, Debug)]
pub struct MergeCommand {
    /// Path to the base model (GGUF format)
    #[arg(short, long)]
    pub model: PathBuf,

    /// Path to the LoRA adapter checkpoint
    #[arg(short, long)]
    pub adapter: PathBuf,

    /// Path of the merged output model
    #[arg(short, long)]
    pub out: PathBuf,

    /// Skip layers with incompatible shapes instead of failing
    #[arg(long)]
    pub permissive: bool,

    /// Re-encode f16 tensors as f32 when merged values overflow f16
    #[arg(long)]
    pub promote: bool,
}

#[derive(Tabled)]
struct LayerRow {
    layer: String,
    a_shape: String,
    b_shape: String,
    status: String,
    delta_norm: String,
}

impl Command for MergeCommand {
    fn execute(&self, json_output: bool) -> Result<()> {
        info!(
            model = %self.model.display(),
            adapter = %self.adapter.display(),
            out = %self.out.display(),
            "merging adapter"
        );

        let options = MergeOptions {
            permissive: self.permissive,
            promote: self.promote,
        };
        let report = merge_files(&self.model, &self.adapter, &self.out, &options)
            .context("merge failed")?;

        if json_output {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            self.print_human_readable(&report);
        }
        Ok(())
    }
}

impl MergeCommand {
    fn print_human_readable(&self, report: &MergeReport) {
        if report.degraded {
            println!(
                "{} adapter metadata unrecoverable, no layers merged",
                style("Warning:").yellow().bold()
            );
        }

        if !report.ops.is_empty() {
            let rows: Vec<LayerRow> = report.ops.iter().map(|op| LayerRow {
                layer: op.layer.clone(),
                a_shape: format!("{:?}", op.a_shape),
                b_shape: op
                    .b_shape
                    .as_ref()
                    .map(|s| format!("{s:?}"))
                    .unwrap_or_else(|| "-".to_string()),
                status: match &op.status {
                    MergeStatus::Merged { .. } => "merged".to_string(),
                    MergeStatus::Skipped { reason } => format!("skipped ({})", describe(*reason)),
                },
                delta_norm: match &op.status {
                    MergeStatus::Merged { delta_norm } => format!("{delta_norm:.6}"),
                    MergeStatus::Skipped { .. } => "-".to_string(),
                },
            })
            .collect();
            println!("{}", Table::new(rows).with(Style::modern()));
        }

        let summary = format!(
            "Merged {} layers (skipped {}) at scale {} into {}",
            report.merged_count(),
            report.skipped_count(),
            report.scale,
            self.out.display()
        );
        if report.is_partial() {
            println!("{} {}", style("Partial:").yellow().bold(), summary);
        } else {
            println!("{} {}", style("Done:").green().bold(), summary);
        }
    }
}

fn describe(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::Unpaired => "unpaired",
        SkipReason::NotTargeted => "not targeted",
        SkipReason::ShapeMismatch => "shape mismatch",
    }
}
