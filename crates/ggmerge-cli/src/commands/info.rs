//! Info command implementation
//!
//! Displays header, metadata, and tensor details of a GGUF container.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use serde_json::json;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};
use tracing::info;

use ggmerge_gguf::{GgufFile, MetadataValue};

use crate::commands::Command;

#[derive(Args, Debug)]
pub struct InfoCommand {
    /// Path to the model file (GGUF format)
    #[arg(short, long)]
    pub model: PathBuf,

    /// Show the full tensor table
    #[arg(long)]
    pub tensors: bool,

    /// Show all metadata key-value pairs
    #[arg(long)]
    pub metadata: bool,
}

#[derive(Tabled)]
struct TensorRow {
    name: String,
    shape: String,
    dtype: String,
    size_mb: String,
}

#[derive(Tabled)]
struct MetadataRow {
    key: String,
    value: String,
}

impl Command for InfoCommand {
    fn execute(&self, json_output: bool) -> Result<()> {
        info!(model = %self.model.display(), "inspecting model");
        let gguf = GgufFile::open(&self.model).context("failed to load GGUF file")?;

        if json_output {
            println!("{}", serde_json::to_string_pretty(&self.to_json(&gguf))?);
        } else {
            self.print_human_readable(&gguf);
        }
        Ok(())
    }
}

impl InfoCommand {
    fn to_json(&self, gguf: &GgufFile) -> serde_json::Value {
        let total_size: u64 = gguf.tensors().iter().map(|t| t.data_size()).sum();
        let mut out = json!({
            "file_info": {
                "format": "GGUF",
                "version": gguf.header().version.0,
                "tensor_count": gguf.tensors().len(),
                "metadata_count": gguf.metadata().len(),
                "alignment": gguf.alignment(),
                "total_tensor_bytes": total_size,
            },
            "architecture": gguf.architecture(),
            "name": gguf.model_name(),
        });

        if self.tensors {
            out["tensors"] = gguf
                .tensors()
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "shape": t.dims,
                        "dtype": format!("{:?}", t.dtype),
                        "offset": t.offset,
                        "size_bytes": t.data_size(),
                    })
                })
                .collect();
        }
        if self.metadata {
            out["metadata"] = gguf
                .metadata()
                .iter()
                .map(|(k, v)| json!({ "key": k, "value": value_to_string(v) }))
                .collect();
        }
        out
    }

    fn print_human_readable(&self, gguf: &GgufFile) {
        let total_size: u64 = gguf.tensors().iter().map(|t| t.data_size()).sum();

        println!("{}", style("File Information").bold().cyan());
        println!("Format: GGUF v{}", gguf.header().version.0);
        println!("Tensors: {}", gguf.tensors().len());
        println!("Metadata entries: {}", gguf.metadata().len());
        println!("Alignment: {} bytes", gguf.alignment());
        println!(
            "Tensor data: {:.2} MB",
            total_size as f64 / (1024.0 * 1024.0)
        );
        if let Some(architecture) = gguf.architecture() {
            println!("Architecture: {architecture}");
        }
        if let Some(name) = gguf.model_name() {
            println!("Name: {name}");
        }

        if self.tensors && !gguf.tensors().is_empty() {
            println!();
            println!("{}", style("Tensors").bold().cyan());
            let rows: Vec<TensorRow> = gguf
                .tensors()
                .iter()
                .map(|t| TensorRow {
                    name: t.name.clone(),
                    shape: format!("{:?}", t.dims),
                    dtype: format!("{:?}", t.dtype),
                    size_mb: format!("{:.2}", t.data_size() as f64 / (1024.0 * 1024.0)),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::modern()));
        }

        if self.metadata && !gguf.metadata().is_empty() {
            println!();
            println!("{}", style("Metadata").bold().cyan());
            let rows: Vec<MetadataRow> = gguf
                .metadata()
                .iter()
                .map(|(k, v)| MetadataRow {
                    key: k.to_string(),
                    value: value_to_string(v),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::modern()));
        }
    }
}

fn value_to_string(value: &MetadataValue) -> String {
    match value {
        MetadataValue::UInt32(v) => v.to_string(),
        MetadataValue::Int32(v) => v.to_string(),
        MetadataValue::Float32(v) => v.to_string(),
        MetadataValue::Bool(v) => v.to_string(),
        MetadataValue::String(v) => v.clone(),
        MetadataValue::Array(v) => format!("[array of {} items]", v.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&MetadataValue::UInt32(42)), "42");
        assert_eq!(value_to_string(&MetadataValue::String("test".into())), "test");
        assert_eq!(value_to_string(&MetadataValue::Bool(true)), "true");
        assert_eq!(
            value_to_string(&MetadataValue::Array(vec![MetadataValue::Int32(1)])),
            "[array of 1 items]"
        );
    }
}
