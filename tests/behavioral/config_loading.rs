// ABOUTME: Behavioral tests for loading tenants from TOML files
//
// FileConfigSource re-reads its file on every listing, so edits show up on
// the next reconciliation tick.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;
use tenantgate::config::{ConfigError, ConfigSource, FileConfigSource, GatewayConfig};
use tenantgate::gateway::{ClientFactory, DetachReason, GatewayError, PoolManager};

use crate::fixtures::{fast_settings, ScriptedFactory};

const TWO_TENANTS: &str = r#"
[gateway]
request_timeout = 3

[defaults]
vhost = "shared"
idle_timeout = 120

[[tenant]]
identity = "alpha"
host = "wss://agent.test"
secret = "s-alpha"
token = "t-alpha"

[[tenant]]
identity = "beta"
host = "wss://agent.test"
secret = "s-beta"
token = "t-beta"
idle_timeout = 0
keep_feeddata = 5
"#;

fn write_config(file: &mut NamedTempFile, content: &str) {
    let f = file.as_file_mut();
    f.set_len(0).unwrap();
    std::io::Seek::rewind(f).unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f.flush().unwrap();
}

#[test]
fn test_defaults_fill_omitted_fields() {
    let config = GatewayConfig::from_toml_str(TWO_TENANTS).unwrap();
    assert_eq!(config.gateway.request_timeout, Duration::from_secs(3));
    assert_eq!(config.gateway.connect_attempts, 6);

    let tenants = config.tenant_configs().unwrap();
    let alpha = &tenants[0];
    assert_eq!(alpha.vhost, "shared");
    assert_eq!(alpha.idle_timeout, Some(Duration::from_secs(120)));
    assert_eq!(alpha.queue_size, 128);
    assert_eq!(alpha.throttle, "540/30,1890/300");
    assert_eq!(alpha.keep_feeddata, 50);

    let beta = &tenants[1];
    assert_eq!(beta.idle_timeout, None);
    assert_eq!(beta.keep_feeddata, 5);
    assert_eq!(beta.keep_controlreq, 50);
}

#[test]
fn test_invalid_documents_rejected() {
    let duplicate = r#"
[[tenant]]
identity = "a"
host = "h"
secret = "s"
token = "t"

[[tenant]]
identity = "a"
host = "h"
secret = "s"
token = "t"
"#;
    assert!(matches!(
        GatewayConfig::from_toml_str(duplicate),
        Err(ConfigError::Invalid(_))
    ));

    let bad_throttle = r#"
[[tenant]]
identity = "a"
host = "h"
secret = "s"
token = "t"
throttle = "fast"
"#;
    assert!(matches!(
        GatewayConfig::from_toml_str(bad_throttle),
        Err(ConfigError::Invalid(_))
    ));

    let missing_secret = r#"
[[tenant]]
identity = "a"
host = "h"
token = "t"
"#;
    assert!(matches!(
        GatewayConfig::from_toml_str(missing_secret),
        Err(ConfigError::Parse(_))
    ));

    let zero_attempts = "[gateway]\nconnect_attempts = 0\n";
    assert!(GatewayConfig::from_toml_str(zero_attempts).is_err());
}

#[test]
fn test_load_explicit_path() {
    let mut file = NamedTempFile::new().unwrap();
    write_config(&mut file, TWO_TENANTS);

    let (config, path) = GatewayConfig::load(Some(file.path())).unwrap();
    assert_eq!(path, file.path());
    assert_eq!(config.tenants.len(), 2);
}

#[tokio::test]
async fn test_file_source_sees_edits() {
    let mut file = NamedTempFile::new().unwrap();
    write_config(&mut file, TWO_TENANTS);
    let source = FileConfigSource::new(file.path());

    let ids = source.list_identities().await.unwrap();
    assert_eq!(ids, vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(source.read_tenant("beta").await.unwrap().secret, "s-beta");

    write_config(
        &mut file,
        "[[tenant]]\nidentity = \"gamma\"\nhost = \"h\"\nsecret = \"s\"\ntoken = \"t\"\n",
    );
    let ids = source.list_identities().await.unwrap();
    assert_eq!(ids, vec!["gamma".to_string()]);
    assert!(matches!(
        source.read_tenant("alpha").await,
        Err(ConfigError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_broken_file_keeps_pool_running() {
    let mut file = NamedTempFile::new().unwrap();
    write_config(&mut file, TWO_TENANTS);

    let factory = Arc::new(ScriptedFactory::new());
    let manager = Arc::new(PoolManager::new(
        fast_settings(),
        Arc::new(FileConfigSource::new(file.path())),
        Arc::clone(&factory) as Arc<dyn ClientFactory>,
    ));
    let report = manager.reconcile_once().await.unwrap();
    assert_eq!(report.started.len(), 2);

    write_config(&mut file, "this is not toml [");
    assert!(matches!(
        manager.reconcile_once().await,
        Err(GatewayError::ConfigUnavailable(ConfigError::Parse(_)))
    ));
    assert_eq!(manager.tenants().await.len(), 2);

    // Rotating a tenant's secret restarts only that tenant
    write_config(&mut file, &TWO_TENANTS.replace("s-alpha", "s-alpha-2"));
    let report = manager.reconcile_once().await.unwrap();
    assert_eq!(report.stopped, vec![("alpha".to_string(), DetachReason::Drifted)]);
    assert_eq!(report.started, vec!["alpha".to_string()]);
    assert_eq!(factory.created_for("beta"), 1);

    manager.stop().await;
}

#[tokio::test]
async fn test_invalid_tenant_does_not_freeze_others() {
    const GOOD_AND_BAD: &str = r#"
[[tenant]]
identity = "good"
host = "wss://agent.test"
secret = "s"
token = "t"

[[tenant]]
identity = "bad"
host = "wss://agent.test"
secret = "s"
token = "t"
throttle = "fast"
"#;
    let mut file = NamedTempFile::new().unwrap();
    write_config(&mut file, GOOD_AND_BAD);

    let manager = Arc::new(PoolManager::new(
        fast_settings(),
        Arc::new(FileConfigSource::new(file.path())),
        Arc::new(ScriptedFactory::new()) as Arc<dyn ClientFactory>,
    ));
    let report = manager.reconcile_once().await.unwrap();
    assert_eq!(report.started, vec!["good".to_string()]);
    assert_eq!(report.skipped, vec!["bad".to_string()]);

    // Adding a tenant still works while "bad" stays broken
    let with_third = format!(
        "{GOOD_AND_BAD}\n[[tenant]]\nidentity = \"third\"\nhost = \"h\"\nsecret = \"s\"\ntoken = \"t\"\n"
    );
    write_config(&mut file, &with_third);
    let report = manager.reconcile_once().await.unwrap();
    assert_eq!(report.started, vec!["third".to_string()]);
    assert_eq!(report.skipped, vec!["bad".to_string()]);

    // Fixing the entry brings it up on the next tick
    write_config(&mut file, &with_third.replace("throttle = \"fast\"", ""));
    let report = manager.reconcile_once().await.unwrap();
    assert_eq!(report.started, vec!["bad".to_string()]);
    assert!(report.skipped.is_empty());

    manager.stop().await;
}
