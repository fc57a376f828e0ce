// ABOUTME: Tenant connection pool behind a request/response gateway surface
//
// One long-lived agent connection per tenant, reconciled against a polled
// configuration source. Idle connections sleep and wake on the next request.
//
// Key components:
// - queue: bounded, oldest-first evicting event buffers
// - operation: dispatch table of tenant-scoped operations with validation
// - transport: agent client and factory traits, completion handles
// - worker: per-tenant connection state machine and control task
// - manager: identity -> worker map and reconciliation loop
// - bridge: deadline-bounded completion waits mapped to outcomes
// - codec: UBJSON and text sample decoding
// - loopback: in-process client for dry runs

pub mod backoff;
pub mod bridge;
pub mod codec;
pub mod error;
pub mod loopback;
pub mod manager;
pub mod metrics;
pub mod operation;
pub mod queue;
pub mod transport;
pub mod worker;

// Re-exports for convenient access
pub use bridge::{Outcome, OutcomeKind, RequestBridge};
pub use error::{GatewayError, GatewayResult};
pub use loopback::{LoopbackClient, LoopbackFactory};
pub use manager::{DetachReason, PoolManager, ReconcileReport, TenantStatus};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use operation::{Foc, Operation, OperationRequest};
pub use queue::{EventKind, EventQueue, EvictingQueue, InboundEvent};
pub use transport::{
    AgentClient, ClientError, ClientFactory, ClientSettings, Completion, CompletionEvent,
    CompletionEventKind, CompletionHandle, EventHook, RawSample,
};
pub use worker::{ConnectionState, TenantConnection};
