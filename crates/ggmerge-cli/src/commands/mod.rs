//! Command implementations for the ggmerge CLI

pub mod info;
pub mod merge;

use anyhow::Result;

/// Trait for CLI command execution
pub trait Command {
    /// Execute the command
    fn execute(&self, json_output: bool) -> Result<()>;
}
