//! testbed - declarative test orchestration CLI
//!
//! Loads action and scenario definitions, runs every scenario instance and
//! exits non-zero when any instance fails.

use std::path::PathBuf;

use clap::Parser;
use testbed::common::{config::Config, logging};
use testbed::{cli, commands};
use commands::Commands;

#[derive(Parser)]
#[command(name = "testbed", about = "Declarative test orchestration")]
#[command(version, long_about = None)]
struct Cli {
    /// Verbose output: rendered commands and debug logs
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Append run logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_file = cli.log_file.or_else(|| config.logging.file.clone());
    let guard = logging::init_cli(cli.verbose, log_file.as_deref());

    let code = match cli::dispatch(cli.command, config, cli.verbose).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };

    // Flush the log file before exiting
    drop(guard);
    std::process::exit(code);
}
