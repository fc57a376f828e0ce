// ABOUTME: CLI check command - validate the gateway config and summarize its tenants
//
// Loads the config the same way `run` does and prints one row per tenant
// with its resolved settings. Secrets and tokens are never printed.

use super::OutputFormat;
use crate::config::{GatewayConfig, GatewaySettings, TenantConfig};
use anyhow::Result;
use serde::Serialize;
use std::path::Path;

/// Resolved view of one tenant, safe to print
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantSummary {
    pub identity: String,
    pub host: String,
    pub vhost: String,
    /// Seconds; absent when the tenant never sleeps
    pub idle_timeout_secs: Option<u64>,
    pub auth_tokens: usize,
    pub keep_feeddata: usize,
    pub keep_controlreq: usize,
    pub keep_unsolicited: usize,
}

impl From<&TenantConfig> for TenantSummary {
    fn from(config: &TenantConfig) -> Self {
        Self {
            identity: config.identity.clone(),
            host: config.host.clone(),
            vhost: config.vhost.clone(),
            idle_timeout_secs: config.idle_timeout.map(|d| d.as_secs()),
            // Without an explicit list the connection token doubles as the auth token
            auth_tokens: config.auth_tokens.len().max(1),
            keep_feeddata: config.keep_feeddata,
            keep_controlreq: config.keep_controlreq,
            keep_unsolicited: config.keep_unsolicited,
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckReport<'a> {
    path: String,
    gateway: &'a GatewaySettings,
    tenants: Vec<TenantSummary>,
}

/// Execute the check command
pub fn execute(config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let (config, path) = GatewayConfig::load(config_path)?;
    let tenants = summarize(&config)?;

    match format {
        OutputFormat::Json => {
            let report = CheckReport {
                path: path.display().to_string(),
                gateway: &config.gateway,
                tenants,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("Config OK: {}", path.display());
            output_text(&tenants);
        }
    }

    Ok(())
}

/// Resolve every tenant, sorted by identity
pub fn summarize(config: &GatewayConfig) -> Result<Vec<TenantSummary>> {
    let mut tenants: Vec<TenantSummary> = config
        .tenant_configs()?
        .iter()
        .map(TenantSummary::from)
        .collect();
    tenants.sort_by(|a, b| a.identity.cmp(&b.identity));
    Ok(tenants)
}

fn output_text(tenants: &[TenantSummary]) {
    if tenants.is_empty() {
        println!("No tenants configured.");
        return;
    }

    println!(
        "{:<20} {:<30} {:<12} {:<6} {:<6} RETAIN (feed/ctrl/unsol)",
        "IDENTITY", "HOST", "VHOST", "IDLE", "TOKENS"
    );
    println!("{}", "-".repeat(100));

    for t in tenants {
        let idle = t
            .idle_timeout_secs
            .map_or_else(|| "never".to_string(), |s| format!("{s}s"));
        println!(
            "{:<20} {:<30} {:<12} {:<6} {:<6} {}/{}/{}",
            truncate(&t.identity, 20),
            truncate(&t.host, 30),
            truncate(&t.vhost, 12),
            idle,
            t.auth_tokens,
            t.keep_feeddata,
            t.keep_controlreq,
            t.keep_unsolicited
        );
    }
}

/// Truncate a string to fit in the given width (character-aware for UTF-8)
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
