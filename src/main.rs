// ABOUTME: Main entry point for tenantgate
//
// Binary: tenantgate
// Usage: tenantgate [--config PATH] <COMMAND>
// - run: keep the tenant pool reconciled until SIGINT/SIGTERM
// - check: validate the configuration and summarize tenants

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;

use tenantgate::cli::{self, Commands, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    setup_logging(args.log_format);

    match args.command {
        Commands::Run(run_args) => cli::run::execute(run_args, args.config, args.format).await,
        Commands::Check => cli::check::execute(args.config.as_deref(), args.format),
    }
}

fn setup_logging(format: LogFormat) {
    use tracing_subscriber::prelude::*;

    let (json, text) = match format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            ),
            None,
        ),
        LogFormat::Text => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(json)
        .with(text)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tenantgate=info".into()),
        )
        .init();
}
