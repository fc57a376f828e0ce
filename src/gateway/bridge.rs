// ABOUTME: Turns an asynchronous agent completion into a synchronous result with a deadline
// ABOUTME: Maps success, CRUD side-events and recent-data samples into an Outcome

//! Request bridge.
//!
//! ```text
//! caller ──submit──▶ client ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─▶ Completion
//!    │                                                │
//!    └──── await_completion(timeout) ◀────────────────┘
//!                 │
//!                 ├─ deadline passed     -> RequestTimeout
//!                 ├─ sender dropped      -> RemoteOperationFailed
//!                 ├─ success = false     -> RemoteOperationFailed(message)
//!                 └─ success             -> Outcome { kind, payload }
//! ```
//!
//! For CRUD requests the first created/duplicated/renamed/deleted/reassigned
//! event replaces the payload and names the outcome. Recent-data events append
//! their decoded samples to `payload.samples`.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::codec::{decode_sample, Decoded};
use super::error::{GatewayError, GatewayResult};
use super::operation::Operation;
use super::transport::{Completion, CompletionEventKind, CompletionHandle, RawSample};

/// What a successful request turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Complete,
    Created,
    Duplicated,
    Renamed,
    Deleted,
    Reassigned,
    /// Completed and carried recent samples
    Samples,
}

impl OutcomeKind {
    /// Suggested HTTP status for a gateway fronting the pool
    pub const fn status_hint(self) -> u16 {
        match self {
            Self::Created => 201,
            Self::Deleted => 204,
            _ => 200,
        }
    }

    const fn from_crud(kind: CompletionEventKind) -> Option<Self> {
        match kind {
            CompletionEventKind::Created => Some(Self::Created),
            CompletionEventKind::Duplicated => Some(Self::Duplicated),
            CompletionEventKind::Renamed => Some(Self::Renamed),
            CompletionEventKind::Deleted => Some(Self::Deleted),
            CompletionEventKind::Reassigned => Some(Self::Reassigned),
            CompletionEventKind::RecentData | CompletionEventKind::Other => None,
        }
    }
}

/// Result of a successful tenant-scoped call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub payload: Option<Value>,
}

/// Waits for completions with a fixed deadline
#[derive(Debug, Clone, Copy)]
pub struct RequestBridge {
    timeout: Duration,
}

impl RequestBridge {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for `handle` to complete and map the result.
    ///
    /// The wait never outlives the bridge timeout. A completion arriving
    /// after the deadline is discarded by the client's send failing.
    pub async fn await_completion(
        &self,
        operation: Operation,
        handle: CompletionHandle,
    ) -> GatewayResult<Outcome> {
        let (request_id, receiver) = handle.into_parts();

        match tokio::time::timeout(self.timeout, receiver).await {
            Err(_) => {
                warn!(
                    operation = %operation,
                    request_id = %request_id,
                    timeout = ?self.timeout,
                    "Request timed out"
                );
                Err(GatewayError::RequestTimeout {
                    operation: operation.name(),
                    timeout: self.timeout,
                })
            }
            Ok(Err(_)) => {
                warn!(operation = %operation, request_id = %request_id, "Completion dropped by client");
                Err(GatewayError::RemoteOperationFailed(
                    "completion dropped".to_string(),
                ))
            }
            Ok(Ok(completion)) => {
                debug!(
                    operation = %operation,
                    request_id = %request_id,
                    success = completion.success,
                    "Request completed"
                );
                map_completion(completion)
            }
        }
    }
}

/// Map a finished completion into an outcome or error
pub fn map_completion(completion: Completion) -> GatewayResult<Outcome> {
    if !completion.success {
        return Err(GatewayError::RemoteOperationFailed(
            completion
                .failure
                .unwrap_or_else(|| "request failed".to_string()),
        ));
    }

    let mut kind = OutcomeKind::Complete;
    let mut payload = completion.payload;
    let mut samples = Vec::new();

    for event in completion.events {
        if completion.is_crud {
            if let Some(crud) = OutcomeKind::from_crud(event.kind) {
                kind = crud;
                payload = Some(event.payload);
                break;
            }
        }
        if event.kind == CompletionEventKind::RecentData {
            if event.samples.is_empty() {
                warn!("Recent data event carried no samples");
            }
            samples.extend(event.samples.iter().map(sample_to_json));
        }
    }

    if kind == OutcomeKind::Complete && !samples.is_empty() {
        kind = OutcomeKind::Samples;
        payload = Some(append_samples(payload, samples));
    }

    Ok(Outcome { kind, payload })
}

/// Append to `payload.samples`, turning a missing or non-object payload into `{samples: []}`
fn append_samples(payload: Option<Value>, samples: Vec<Value>) -> Value {
    let mut map = match payload {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    match map.get_mut("samples") {
        Some(Value::Array(existing)) => existing.extend(samples),
        _ => {
            map.insert("samples".to_string(), Value::Array(samples));
        }
    }
    Value::Object(map)
}

fn sample_to_json(sample: &RawSample) -> Value {
    let (data, mime) = match decode_sample(&sample.data, sample.mime.as_deref()) {
        Decoded::Json(value) => (value, None),
        Decoded::Text(text) => (Value::String(text), None),
        Decoded::Bytes { data, mime } => (Value::String(BASE64.encode(data)), mime),
    };
    json!({
        "data": data,
        "mime": mime,
        "time": sample.time.to_rfc3339(),
    })
}
