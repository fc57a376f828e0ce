// ABOUTME: Error taxonomy handed from the pool core up to the gateway layer
//
// Every tenant-scoped call resolves to either an Outcome or one of these.
// The gateway maps them onto its own wire status codes.

use std::time::Duration;

use thiserror::Error;

use super::transport::ClientError;
use crate::config::ConfigError;

/// Errors surfaced by the connection pool and request bridge
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The configuration source could not be read this tick
    #[error("Configuration unavailable: {0}")]
    ConfigUnavailable(#[from] ConfigError),

    /// The tenant's agent connection could not be established
    #[error("Connection failed for tenant {identity}: {reason}")]
    ConnectionFailed { identity: String, reason: String },

    /// Unknown tenant identity or rejected token; the two are indistinguishable
    #[error("Unauthorized: no such tenant or bad token")]
    Unauthorized,

    /// No completion arrived before the bridge deadline
    #[error("Request timeout: {operation} did not complete within {timeout:?}")]
    RequestTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The agent reported failure for the request
    #[error("Remote operation failed: {0}")]
    RemoteOperationFailed(String),

    /// Caller-supplied arguments were rejected before forwarding
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Pool manager is already running when start is called
    #[error("Pool manager is already running")]
    AlreadyRunning,

    /// Pool manager is not running when an operation requires it
    #[error("Pool manager is not running")]
    NotRunning,
}

impl GatewayError {
    /// Suggested HTTP status for a gateway fronting the pool
    pub const fn status_hint(&self) -> u16 {
        match self {
            Self::Unauthorized => 403,
            Self::MalformedRequest(_) => 400,
            Self::NotRunning => 503,
            _ => 500,
        }
    }

    pub(crate) fn connection_failed(identity: &str, reason: impl ToString) -> Self {
        Self::ConnectionFailed {
            identity: identity.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Map a transport error raised while talking to `identity`'s client
    pub(crate) fn from_client(identity: &str, err: ClientError) -> Self {
        match err {
            ClientError::Connect(reason) | ClientError::NotConnected(reason) => {
                Self::connection_failed(identity, reason)
            }
            ClientError::Link(reason) => Self::RemoteOperationFailed(format!("link error: {reason}")),
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
