// ABOUTME: CLI run command - reconcile the tenant pool until interrupted
//
// Builds a PoolManager over the config file and the loopback client, then
// either runs a single reconciliation tick (--once) or keeps the pool alive
// until Ctrl+C / SIGTERM.

use super::{OutputFormat, RunArgs};
use crate::config::{ConfigSource, FileConfigSource, GatewayConfig};
use crate::gateway::{LoopbackFactory, PoolManager, ReconcileReport, TenantStatus};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Execute the run command
pub async fn execute(args: RunArgs, config_path: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let (config, path) = GatewayConfig::load(config_path.as_deref())?;
    info!(
        path = %path.display(),
        tenants = config.tenants.len(),
        "Loaded gateway config"
    );

    let source: Arc<dyn ConfigSource> = Arc::new(FileConfigSource::new(&path));
    let manager = Arc::new(PoolManager::new(
        config.gateway.clone(),
        source,
        Arc::new(LoopbackFactory),
    ));

    if args.once {
        let report = manager
            .reconcile_once()
            .await
            .context("Reconciliation tick failed");
        let tenants = manager.tenants().await;
        manager.stop().await;

        output_report(&report?, &tenants, format)?;
        return Ok(());
    }

    manager.start().await?;

    let status = (args.status_interval > 0).then(|| {
        let manager = Arc::clone(&manager);
        let period = Duration::from_secs(args.status_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                log_status(&manager.tenants().await);
            }
        })
    });

    shutdown_signal().await;

    if let Some(handle) = status {
        handle.abort();
    }
    manager.stop().await;

    let snapshot = manager.metrics().snapshot();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Text => println!(
            "Stopped. requests={} errors={} timeouts={} wakes={} sleeps={} ticks={}",
            snapshot.total_requests,
            snapshot.total_errors,
            snapshot.total_timeouts,
            snapshot.wakes,
            snapshot.sleeps,
            snapshot.reconcile_ticks
        ),
    }

    Ok(())
}

fn log_status(tenants: &[TenantStatus]) {
    for t in tenants {
        info!(
            tenant = %t.identity,
            state = %t.state,
            connect_attempts = t.connect_attempts,
            "Tenant status"
        );
    }
}

fn output_report(report: &ReconcileReport, tenants: &[TenantStatus], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "report": report,
                "tenants": tenants,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            for identity in &report.started {
                println!("started  {identity}");
            }
            for (identity, reason) in &report.stopped {
                println!("stopped  {identity} ({reason})");
            }
            for identity in &report.skipped {
                println!("skipped  {identity}");
            }
            if report.is_noop() && report.skipped.is_empty() {
                println!("No changes.");
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
