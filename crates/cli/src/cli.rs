//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// ETL Dispatcher - fan-out work-queue dispatcher for object-store pipelines
#[derive(Parser, Debug)]
#[command(
    name = "etl-dispatcher",
    author,
    version,
    about = "Fan-out ETL work-queue dispatcher",
    long_about = "Pulls work items from a transactional queue, runs the transform bound to \n\
                  each item's bucket, and writes provenance-keyed output back to object \n\
                  storage, retrying failed items a bounded number of times."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "ETL_DISPATCHER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "ETL_DISPATCHER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the dispatcher
    Run(RunArgs),

    /// Validate a settings file without running
    Validate(ValidateArgs),

    /// Display settings information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to settings file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "etl.toml",
        env = "ETL_DISPATCHER_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the number of workers
    #[arg(long, env = "ETL_DISPATCHER_WORKERS")]
    pub workers: Option<usize>,

    /// Keep polling an empty queue until interrupted
    #[arg(long, env = "ETL_DISPATCHER_WAIT_FOREVER")]
    pub wait_forever: bool,

    /// Bucket for manually enqueued keys
    #[arg(long, requires = "key")]
    pub bucket: Option<String>,

    /// Key to enqueue before starting (repeatable)
    #[arg(long, requires = "bucket")]
    pub key: Vec<String>,

    /// JSON-lines file of work items to enqueue before starting
    #[arg(long, env = "ETL_DISPATCHER_SEED")]
    pub seed: Option<PathBuf>,

    /// Validate settings and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "ETL_DISPATCHER_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to settings file to validate
    #[arg(short, long, default_value = "etl.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to settings file
    #[arg(short, long, default_value = "etl.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show notify targets per route
    #[arg(long)]
    pub notify: bool,

    /// Show built-in transform ids
    #[arg(long)]
    pub transforms: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
