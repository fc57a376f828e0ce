// ABOUTME: In-process agent client that answers every request locally
// ABOUTME: Lets the gateway run end to end without an agent service

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::operation::{Operation, OperationRequest};
use super::queue::EventQueue;
use super::transport::{
    completion_pair, AgentClient, ClientError, ClientFactory, ClientSettings, Completion,
    CompletionEvent, CompletionEventKind, CompletionHandle, EventHook,
};

/// Client that completes requests immediately, echoing their arguments
#[derive(Debug)]
pub struct LoopbackClient {
    identity: String,
    live: AtomicBool,
}

impl LoopbackClient {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            live: AtomicBool::new(false),
        }
    }

    fn crud_kind(operation: Operation) -> Option<CompletionEventKind> {
        let name = operation.name();
        if operation == Operation::EntityReassign {
            Some(CompletionEventKind::Reassigned)
        } else if name.ends_with("_create") || name.starts_with("sub_create") {
            Some(CompletionEventKind::Created)
        } else if name.ends_with("_rename") {
            Some(CompletionEventKind::Renamed)
        } else if name.ends_with("_delete") {
            Some(CompletionEventKind::Deleted)
        } else {
            None
        }
    }
}

#[async_trait]
impl AgentClient for LoopbackClient {
    async fn start(&self) -> Result<(), ClientError> {
        self.live.store(true, Ordering::SeqCst);
        debug!(tenant = %self.identity, "Loopback client started");
        Ok(())
    }

    async fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        debug!(tenant = %self.identity, "Loopback client stopped");
    }

    fn register(&self, hook: EventHook, _queue: EventQueue) {
        debug!(tenant = %self.identity, hook = ?hook, "Loopback hook registered");
    }

    async fn submit(&self, request: &OperationRequest) -> Result<CompletionHandle, ClientError> {
        if !self.live.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected(self.identity.clone()));
        }

        let echo = json!({
            "operation": request.operation().name(),
            "args": request.args(),
        });
        let completion = match Self::crud_kind(request.operation()) {
            Some(kind) => Completion::ok(None)
                .crud()
                .with_event(CompletionEvent::new(kind, echo)),
            None => Completion::ok(Some(echo)),
        };

        let (sender, handle) = completion_pair();
        sender.complete(completion);
        Ok(handle)
    }
}

/// Builds a [`LoopbackClient`] per tenant
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackFactory;

impl ClientFactory for LoopbackFactory {
    fn create(&self, settings: &ClientSettings) -> Arc<dyn AgentClient> {
        Arc::new(LoopbackClient::new(settings.identity.clone()))
    }
}
