// ABOUTME: Polled sources of tenant configuration for the reconciliation loop
// ABOUTME: File-backed source re-reads TOML each tick; memory source is mutable at runtime

//! Configuration sources.
//!
//! The pool manager asks its [`ConfigSource`] for the current identity list
//! once per reconciliation tick, then reads each identity's [`TenantConfig`].
//! A source never pushes changes; everything is polled.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::tenant::TenantConfig;
use super::GatewayConfig;

/// Errors reading tenant configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Identity listed but has no readable config
    #[error("No configuration for tenant '{0}'")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where tenant configuration comes from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Identities that should currently have a connection
    async fn list_identities(&self) -> Result<Vec<String>, ConfigError>;

    /// Settings for one identity
    async fn read_tenant(&self, identity: &str) -> Result<TenantConfig, ConfigError>;
}

// === File Source ===

/// TOML file re-read on every listing.
///
/// `read_tenant` answers from the snapshot taken by the most recent
/// `list_identities`, so one reconciliation tick sees one version of the file.
#[derive(Debug)]
pub struct FileConfigSource {
    path: PathBuf,
    /// Per identity: the resolved config, or why it failed to resolve
    snapshot: Mutex<HashMap<String, Result<TenantConfig, String>>>,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<GatewayConfig, ConfigError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        GatewayConfig::from_toml_str_lenient(&content)
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn list_identities(&self) -> Result<Vec<String>, ConfigError> {
        let config = self.load().await?;
        let resolved = config.resolve_each();
        let identities: Vec<String> = resolved.iter().map(|(id, _)| id.clone()).collect();
        let invalid = resolved.iter().filter(|(_, r)| r.is_err()).count();

        debug!(
            path = %self.path.display(),
            count = identities.len(),
            invalid,
            "Reloaded tenant config"
        );

        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        *snapshot = resolved
            .into_iter()
            .map(|(id, result)| {
                let result = result.map_err(|e| match e {
                    ConfigError::Invalid(reason) => reason,
                    other => other.to_string(),
                });
                (id, result)
            })
            .collect();
        Ok(identities)
    }

    async fn read_tenant(&self, identity: &str) -> Result<TenantConfig, ConfigError> {
        let snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        match snapshot.get(identity) {
            Some(Ok(config)) => Ok(config.clone()),
            Some(Err(reason)) => Err(ConfigError::Invalid(reason.clone())),
            None => Err(ConfigError::NotFound(identity.to_string())),
        }
    }
}

// === Memory Source ===

/// In-process source whose tenants can be changed while the pool runs
#[derive(Debug, Default)]
pub struct MemoryConfigSource {
    tenants: RwLock<BTreeMap<String, TenantConfig>>,
    unavailable: AtomicBool,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenants(tenants: impl IntoIterator<Item = TenantConfig>) -> Self {
        let source = Self::new();
        for tenant in tenants {
            source.upsert(tenant);
        }
        source
    }

    /// Add or replace a tenant
    pub fn upsert(&self, config: TenantConfig) {
        self.tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.identity.clone(), config);
    }

    pub fn remove(&self, identity: &str) -> Option<TenantConfig> {
        self.tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
    }

    /// Make listing fail until cleared, like an unreachable backing store
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    async fn list_identities(&self) -> Result<Vec<String>, ConfigError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "config store unavailable",
            )));
        }
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tenants.keys().cloned().collect())
    }

    async fn read_tenant(&self, identity: &str) -> Result<TenantConfig, ConfigError> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        tenants
            .get(identity)
            .cloned()
            .ok_or_else(|| ConfigError::NotFound(identity.to_string()))
    }
}
