//! CLI command definitions for the `flowpilot` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod plan;
pub mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Run and serve UI automation workflows.
#[derive(Parser)]
#[command(name = "flowpilot", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a plan file for structural errors.
    Validate {
        /// Plan file (.json, .yaml or .yml).
        file: PathBuf,
    },

    /// Report dependency problems in a valid plan file.
    Lint {
        /// Plan file (.json, .yaml or .yml).
        file: PathBuf,
    },

    /// Execute a plan file and stream its progress.
    Run(RunArgs),

    /// Start the REST/WebSocket API server.
    Serve {
        /// Port to listen on (defaults to [server] port in config.toml).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (defaults to [server] host in config.toml).
        #[arg(long)]
        host: Option<String>,

        /// Device agent base URL, overriding [actuator] endpoint.
        #[arg(long, env = "FLOWPILOT_ENDPOINT")]
        endpoint: Option<String>,

        /// Answer actions from a scripted actuator instead of a device agent.
        #[arg(long)]
        dry_run: bool,

        /// Actuator script for --dry-run (YAML or JSON).
        #[arg(long, requires = "dry_run")]
        script: Option<PathBuf>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Plan file (.json, .yaml or .yml).
    pub file: PathBuf,

    /// Initial run context as a JSON object.
    #[arg(long)]
    pub context: Option<String>,

    /// Answer actions from a scripted actuator instead of a device agent.
    #[arg(long, conflicts_with = "endpoint")]
    pub dry_run: bool,

    /// Actuator script for --dry-run (YAML or JSON).
    #[arg(long, requires = "dry_run")]
    pub script: Option<PathBuf>,

    /// Device agent base URL, overriding [actuator] endpoint.
    #[arg(long, env = "FLOWPILOT_ENDPOINT")]
    pub endpoint: Option<String>,
}
