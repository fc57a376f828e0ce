// ABOUTME: CLI argument parsing and command routing for tenantgate
//
// Provides command-line interface for:
// - Running the tenant pool (run)
// - Validating configuration (check)

pub mod check;
pub mod run;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Multi-tenant gateway over pooled agent connections
#[derive(Parser)]
#[command(name = "tenantgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: first existing .tenantgate/config.toml in cwd, home, then /etc/tenantgate/config.toml)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Log line format on stderr
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,
}

/// Output format for commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Log formatter selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Keep the tenant pool reconciled until interrupted
    Run(RunArgs),

    /// Validate the configuration and summarize tenants
    Check,
}

/// Arguments for the run command
#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Run a single reconciliation tick, report it and exit
    #[arg(long)]
    pub once: bool,

    /// Log a pool status line every N seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    pub status_interval: u64,
}
