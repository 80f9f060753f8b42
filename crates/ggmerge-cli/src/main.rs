//! ggmerge CLI
//!
//! Merges LoRA adapter checkpoints into GGUF model files and inspects GGUF
//! containers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

mod commands;

use commands::{info::InfoCommand, merge::MergeCommand, Command};

#[derive(Parser)]
#[command(
    name = "ggmerge",
    version = env!("CARGO_PKG_VERSION"),
    about = "Merge LoRA adapters into GGUF models",
    long_about = "Applies W' = W + (A @ B) * (alpha / rank) to the tensors of a GGUF model \
                  using a LoRA adapter checkpoint, writing a new container."
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// JSON output format
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a LoRA adapter into a model
    #[command(name = "merge", alias = "m")]
    Merge(MergeCommand),

    /// Display model information
    #[command(name = "info", alias = "i")]
    Info(InfoCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;
    debug!("ggmerge v{} starting", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Merge(cmd) => cmd.execute(cli.json),
        Commands::Info(cmd) => cmd.execute(cli.json),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
