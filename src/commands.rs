//! CLI command definitions
//!
//! Defines the clap commands for the testbed CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate definitions and run every scenario instance
    Run {
        #[command(flatten)]
        sources: Sources,

        /// Only run instances whose label contains this text
        #[arg(long)]
        filter: Option<String>,

        /// Number of instances to run concurrently
        #[arg(long, short)]
        jobs: Option<usize>,

        /// Stop scheduling new instances after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Write a JSON report of the run to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Directory for one log file per instance
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Load and validate definitions without running anything
    Validate {
        #[command(flatten)]
        sources: Sources,
    },

    /// List scenarios and their expanded instances
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        sources: Sources,

        /// Only list instances whose label contains this text
        #[arg(long)]
        filter: Option<String>,
    },
}

/// Where definitions are read from
#[derive(Args, Debug, Clone)]
pub struct Sources {
    /// Scenario files or directories (default: [paths] scenarios from config)
    pub scenarios: Vec<PathBuf>,

    /// Action definition file or directory; can be given several times
    #[arg(long, short)]
    pub actions: Vec<PathBuf>,
}
