// ABOUTME: Seam between the pool and a tenant's agent client library
// ABOUTME: Defines the client/factory traits and the completion handle a request resolves through

//! Agent client interface.
//!
//! The pool never speaks the agent wire protocol itself. A [`ClientFactory`]
//! builds one [`AgentClient`] per tenant from [`ClientSettings`]; the client
//! delivers unsolicited events into registered [`EventQueue`]s and answers
//! each submitted request through a [`CompletionHandle`].
//!
//! # Flow
//!
//! 1. Worker calls `client.submit(&request)` and gets a handle back
//! 2. Client finishes the request on its own task and sends a [`Completion`]
//! 3. Request bridge awaits the handle with a deadline

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::operation::OperationRequest;
use super::queue::EventQueue;

// === Client Errors ===

/// Errors raised by an agent client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Could not establish the connection
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Connection broke while a request was in flight
    #[error("Link error: {0}")]
    Link(String),

    /// Request submitted to a client that is not started
    #[error("Not connected: {0}")]
    NotConnected(String),
}

// === Client Settings ===

/// Everything a factory needs to build a tenant's client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub identity: String,
    pub host: String,
    pub vhost: String,
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sslca: Option<String>,
    pub secret: String,
    pub token: String,
    /// Outbound request queue size inside the client
    pub queue_size: usize,
    /// Rate limits, `N/S` pairs separated by commas
    pub throttle: String,
}

// === Event Hooks ===

/// Unsolicited event streams a client can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventHook {
    FeedData,
    ControlRequest,
    Reassigned,
    Subscription,
}

impl EventHook {
    pub const ALL: [Self; 4] = [
        Self::FeedData,
        Self::ControlRequest,
        Self::Reassigned,
        Self::Subscription,
    ];
}

// === Completions ===

/// Kind of an auxiliary event attached to a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionEventKind {
    Created,
    Duplicated,
    Renamed,
    Deleted,
    Reassigned,
    /// Carries recent samples of a point
    RecentData,
    Other,
}

/// One stored value of a point, as shipped by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
    pub data: Vec<u8>,
    /// Declared content type; may be an `idx/N` alias
    pub mime: Option<String>,
    pub time: DateTime<Utc>,
}

/// Auxiliary event the agent attached to a request's completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub kind: CompletionEventKind,
    pub payload: Value,
    /// Only populated for [`CompletionEventKind::RecentData`]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<RawSample>,
}

impl CompletionEvent {
    pub const fn new(kind: CompletionEventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            samples: Vec::new(),
        }
    }

    /// Recent-data event carrying raw samples
    pub const fn recent_data(samples: Vec<RawSample>) -> Self {
        Self {
            kind: CompletionEventKind::RecentData,
            payload: Value::Null,
            samples,
        }
    }
}

/// Final state of a request as reported by the agent client
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Completion {
    pub success: bool,
    pub payload: Option<Value>,
    pub events: Vec<CompletionEvent>,
    pub failure: Option<String>,
    /// Request was a create/update/delete, so CRUD events may override the payload
    pub is_crud: bool,
}

impl Completion {
    /// Successful completion with an optional payload
    pub fn ok(payload: Option<Value>) -> Self {
        Self {
            success: true,
            payload,
            ..Self::default()
        }
    }

    /// Failed completion carrying the agent's message
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_event(mut self, event: CompletionEvent) -> Self {
        self.events.push(event);
        self
    }

    #[must_use]
    pub const fn crud(mut self) -> Self {
        self.is_crud = true;
        self
    }
}

/// Unique id attached to each in-flight request, used for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiving half of one request's completion
#[derive(Debug)]
pub struct CompletionHandle {
    id: RequestId,
    receiver: oneshot::Receiver<Completion>,
}

impl CompletionHandle {
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Split into the id and the raw receiver
    pub fn into_parts(self) -> (RequestId, oneshot::Receiver<Completion>) {
        (self.id, self.receiver)
    }
}

/// Sending half, kept by the client until the request finishes
#[derive(Debug)]
pub struct CompletionSender {
    id: RequestId,
    sender: oneshot::Sender<Completion>,
}

impl CompletionSender {
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Deliver the completion; returns false if the caller stopped waiting
    pub fn complete(self, completion: Completion) -> bool {
        self.sender.send(completion).is_ok()
    }
}

/// Create a linked sender/handle pair for one request
pub fn completion_pair() -> (CompletionSender, CompletionHandle) {
    let id = RequestId::new();
    let (sender, receiver) = oneshot::channel();
    (CompletionSender { id, sender }, CompletionHandle { id, receiver })
}

// === Traits ===

/// One tenant's connection to the agent service
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Establish the connection
    async fn start(&self) -> Result<(), ClientError>;

    /// Tear down the connection; safe to call when not started
    async fn stop(&self);

    /// Route one unsolicited event stream into `queue`
    fn register(&self, hook: EventHook, queue: EventQueue);

    /// Forward a request; the completion arrives through the returned handle
    async fn submit(&self, request: &OperationRequest) -> Result<CompletionHandle, ClientError>;
}

/// Builds agent clients for tenants
pub trait ClientFactory: Send + Sync {
    fn create(&self, settings: &ClientSettings) -> Arc<dyn AgentClient>;
}
