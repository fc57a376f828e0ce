// ABOUTME: Per-tenant connection settings and their resolution against gateway defaults
// ABOUTME: Also owns drift comparison and auth token acceptance for a tenant

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::source::ConfigError;
use super::TenantDefaults;
use crate::gateway::transport::ClientSettings;

lazy_static! {
    /// `N/S` pairs: at most N requests per S seconds, comma separated
    static ref THROTTLE_RE: Regex = Regex::new(r"^\d+/\d+(,\d+/\d+)*$").unwrap();
}

/// A `[[tenant]]` table as written in the config file
///
/// Fields left out fall back to the `[defaults]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantEntry {
    pub identity: String,
    pub host: String,
    pub secret: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_tokens: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vhost: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sslca: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_feeddata: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_controlreq: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_unsolicited: Option<usize>,
    /// Seconds without requests before the connection sleeps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<u64>,
}

impl TenantEntry {
    /// Fill omitted fields from `defaults` and validate the result
    pub fn resolve(&self, defaults: &TenantDefaults) -> Result<TenantConfig, ConfigError> {
        let idle_secs = self
            .idle_timeout
            .unwrap_or_else(|| defaults.idle_timeout.as_secs());

        let config = TenantConfig {
            identity: self.identity.clone(),
            host: self.host.clone(),
            vhost: self.vhost.clone().unwrap_or_else(|| defaults.vhost.clone()),
            prefix: self.prefix.clone().unwrap_or_else(|| defaults.prefix.clone()),
            sslca: self.sslca.clone().or_else(|| defaults.sslca.clone()),
            secret: self.secret.clone(),
            token: self.token.clone(),
            auth_tokens: self.auth_tokens.clone(),
            queue_size: self.queue_size.unwrap_or(defaults.queue_size),
            throttle: self
                .throttle
                .clone()
                .unwrap_or_else(|| defaults.throttle.clone()),
            keep_feeddata: self.keep_feeddata.unwrap_or(defaults.keep_feeddata),
            keep_controlreq: self.keep_controlreq.unwrap_or(defaults.keep_controlreq),
            keep_unsolicited: self.keep_unsolicited.unwrap_or(defaults.keep_unsolicited),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Fully resolved settings for one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantConfig {
    pub identity: String,
    pub host: String,
    pub vhost: String,
    pub prefix: String,
    pub sslca: Option<String>,
    pub secret: String,
    pub token: String,
    /// Tokens callers may present; empty means only `token` is accepted
    pub auth_tokens: Vec<String>,
    pub queue_size: usize,
    pub throttle: String,
    pub keep_feeddata: usize,
    pub keep_controlreq: usize,
    pub keep_unsolicited: usize,
    /// `None` disables sleeping
    pub idle_timeout: Option<Duration>,
}

impl TenantConfig {
    /// Config with gateway defaults for everything but the credentials
    pub fn new(
        identity: impl Into<String>,
        host: impl Into<String>,
        secret: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let defaults = TenantDefaults::default();
        Self {
            identity: identity.into(),
            host: host.into(),
            vhost: defaults.vhost,
            prefix: defaults.prefix,
            sslca: defaults.sslca,
            secret: secret.into(),
            token: token.into(),
            auth_tokens: Vec::new(),
            queue_size: defaults.queue_size,
            throttle: defaults.throttle,
            keep_feeddata: defaults.keep_feeddata,
            keep_controlreq: defaults.keep_controlreq,
            keep_unsolicited: defaults.keep_unsolicited,
            idle_timeout: None,
        }
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = (!idle_timeout.is_zero()).then_some(idle_timeout);
        self
    }

    #[must_use]
    pub fn with_auth_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Same retention limit for all three event queues
    #[must_use]
    pub const fn with_retention(mut self, keep: usize) -> Self {
        self.keep_feeddata = keep;
        self.keep_controlreq = keep;
        self.keep_unsolicited = keep;
        self
    }

    /// Whether a caller presenting `token` may act as this tenant
    pub fn accepts_token(&self, token: &str) -> bool {
        if self.auth_tokens.is_empty() {
            self.token == token
        } else {
            self.auth_tokens.iter().any(|t| t == token)
        }
    }

    /// True when the two snapshots would run the same connection.
    ///
    /// Both sides are resolved against defaults, so `None` for `sslca` or
    /// `idle_timeout` is a setting ("no CA", "never sleep") and is compared
    /// like any other value.
    pub fn matches(&self, other: &Self) -> bool {
        self == other
    }

    /// Settings handed to the agent client factory
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            identity: self.identity.clone(),
            host: self.host.clone(),
            vhost: self.vhost.clone(),
            prefix: self.prefix.clone(),
            sslca: self.sslca.clone(),
            secret: self.secret.clone(),
            token: self.token.clone(),
            queue_size: self.queue_size,
            throttle: self.throttle.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("identity", &self.identity),
            ("host", &self.host),
            ("secret", &self.secret),
            ("token", &self.token),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tenant '{}': {field} must not be empty",
                    self.identity
                )));
            }
        }

        if !THROTTLE_RE.is_match(&self.throttle) {
            return Err(ConfigError::Invalid(format!(
                "tenant '{}': throttle '{}' must look like 540/30,1890/300",
                self.identity, self.throttle
            )));
        }

        if self.auth_tokens.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "tenant '{}': auth_tokens must not contain empty tokens",
                self.identity
            )));
        }

        Ok(())
    }
}
