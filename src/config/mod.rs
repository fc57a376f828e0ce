// ABOUTME: Configuration management for tenantgate
// Gateway timings, tenant defaults and the tenant list, loaded from TOML

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod source;
pub mod tenant;

pub use source::{ConfigError, ConfigSource, FileConfigSource, MemoryConfigSource};
pub use tenant::{TenantConfig, TenantEntry};

/// Whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub gateway: GatewaySettings,
    pub defaults: TenantDefaults,
    #[serde(rename = "tenant", skip_serializing_if = "Vec::is_empty")]
    pub tenants: Vec<TenantEntry>,
}

/// Pool-wide timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Time between reconciliation ticks
    #[serde(with = "duration_secs")]
    pub reconcile_interval: Duration,

    /// Deadline for one bridged request
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Worker idle-check tick
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,

    /// Connection attempts before a worker is marked failed
    pub connect_attempts: u32,

    /// Wait between connection attempts
    #[serde(with = "duration_secs")]
    pub connect_backoff: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            connect_attempts: 6,
            connect_backoff: Duration::from_secs(5),
        }
    }
}

/// Values filled into tenants that leave them out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantDefaults {
    pub vhost: String,
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sslca: Option<String>,
    pub queue_size: usize,
    pub throttle: String,
    pub keep_feeddata: usize,
    pub keep_controlreq: usize,
    pub keep_unsolicited: usize,
    /// Zero disables sleeping
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
}

impl Default for TenantDefaults {
    fn default() -> Self {
        Self {
            vhost: "container1".to_string(),
            prefix: String::new(),
            sslca: None,
            queue_size: 128,
            throttle: "540/30,1890/300".to_string(),
            keep_feeddata: 50,
            keep_controlreq: 50,
            keep_unsolicited: 50,
            idle_timeout: Duration::ZERO,
        }
    }
}

impl GatewayConfig {
    /// Load from `explicit`, or the first file found on the search path.
    ///
    /// Returns the config together with the path it came from.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, PathBuf)> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::get_config_paths()
                .into_iter()
                .find(|p| p.exists())
                .with_context(|| {
                    format!(
                        "No configuration file found (searched {})",
                        Self::get_config_paths()
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                })?,
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Ok((config, path))
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check gateway settings and that every tenant resolves
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_gateway()?;
        self.tenant_configs().map(|_| ())
    }

    /// Parse a TOML document, checking only the `[gateway]` table.
    ///
    /// Tenant entries are left unresolved; see [`Self::resolve_each`].
    pub fn from_toml_str_lenient(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate_gateway()?;
        Ok(config)
    }

    fn validate_gateway(&self) -> Result<(), ConfigError> {
        if self.gateway.connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "gateway.connect_attempts must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("reconcile_interval", self.gateway.reconcile_interval),
            ("request_timeout", self.gateway.request_timeout),
            ("poll_interval", self.gateway.poll_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "gateway.{name} must be at least 1 second"
                )));
            }
        }
        Ok(())
    }

    /// Resolve every tenant entry against the defaults
    pub fn tenant_configs(&self) -> Result<Vec<TenantConfig>, ConfigError> {
        let mut seen = HashSet::new();
        self.tenants
            .iter()
            .map(|entry| {
                if !seen.insert(entry.identity.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate tenant identity '{}'",
                        entry.identity
                    )));
                }
                entry.resolve(&self.defaults)
            })
            .collect()
    }

    /// Resolve every tenant entry independently, in file order.
    ///
    /// One result per distinct identity. An identity declared more than once
    /// fails as a whole; other tenants are unaffected.
    pub fn resolve_each(&self) -> Vec<(String, Result<TenantConfig, ConfigError>)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for entry in &self.tenants {
            *counts.entry(entry.identity.as_str()).or_default() += 1;
        }

        let mut seen = HashSet::new();
        self.tenants
            .iter()
            .filter(|entry| seen.insert(entry.identity.as_str()))
            .map(|entry| {
                let result = if counts[entry.identity.as_str()] > 1 {
                    Err(ConfigError::Invalid(format!(
                        "duplicate tenant identity '{}'",
                        entry.identity
                    )))
                } else {
                    entry.resolve(&self.defaults)
                };
                (entry.identity.clone(), result)
            })
            .collect()
    }

    /// Configuration file paths in order of precedence
    pub fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        // 1. Local project config
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(".tenantgate").join("config.toml"));
        }

        // 2. User config
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".tenantgate").join("config.toml"));
        }

        // 3. System config
        paths.push(PathBuf::from("/etc/tenantgate/config.toml"));

        paths
    }
}

/// Serde helper for Duration as seconds (u64)
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
