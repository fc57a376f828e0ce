// ABOUTME: Shared test fixtures for behavioral tests
//
// Provides:
// - ScriptedClient: agent client with scripted start failures and replies
// - ScriptedFactory: hands out ScriptedClients and remembers them per tenant
// - fast_settings(), tenant(): short timings and ready-made tenant configs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tenantgate::config::{GatewaySettings, MemoryConfigSource, TenantConfig};
use tenantgate::gateway::transport::{completion_pair, CompletionSender};
use tenantgate::gateway::{
    AgentClient, ClientError, ClientFactory, ClientSettings, Completion, ConnectionState,
    EventHook, EventKind, EventQueue, InboundEvent, OperationRequest, PoolManager,
    TenantConnection,
};

/// Timings small enough that a full connect/sleep/wake cycle takes milliseconds
pub fn fast_settings() -> GatewaySettings {
    GatewaySettings {
        reconcile_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        connect_attempts: 3,
        connect_backoff: Duration::from_millis(5),
    }
}

pub fn tenant(identity: &str) -> TenantConfig {
    TenantConfig::new(
        identity,
        "wss://agent.test",
        "secret",
        format!("{identity}-token"),
    )
}

pub fn token(identity: &str) -> String {
    format!("{identity}-token")
}

/// What a scripted client answers with
#[derive(Debug, Clone)]
pub enum Reply {
    /// Complete with the given completion
    Complete(Completion),
    /// Never complete; the sender is parked until the client is dropped
    Hang,
}

/// Agent client whose behavior is set by the test
pub struct ScriptedClient {
    pub identity: String,
    fail_starts: AtomicU32,
    live: AtomicBool,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    reply: Mutex<Reply>,
    submitted: Mutex<Vec<OperationRequest>>,
    hooks: Mutex<HashMap<EventHook, EventQueue>>,
    parked: Mutex<Vec<CompletionSender>>,
}

impl ScriptedClient {
    pub fn new(identity: &str, fail_starts: u32, reply: Reply) -> Self {
        Self {
            identity: identity.to_string(),
            fail_starts: AtomicU32::new(fail_starts),
            live: AtomicBool::new(false),
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            reply: Mutex::new(reply),
            submitted: Mutex::new(Vec::new()),
            hooks: Mutex::new(HashMap::new()),
            parked: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `n` starts fail
    pub fn fail_next_starts(&self, n: u32) {
        self.fail_starts.store(n, Ordering::SeqCst);
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Requests that reached the client, in order
    pub fn submitted(&self) -> Vec<OperationRequest> {
        self.submitted.lock().unwrap().clone()
    }

    /// Push an unsolicited event into the queue registered for `hook`
    pub fn emit(&self, hook: EventHook, payload: Value) -> bool {
        let kind = match hook {
            EventHook::FeedData => EventKind::FeedData,
            EventHook::ControlRequest => EventKind::ControlRequest,
            EventHook::Reassigned => EventKind::Reassigned,
            EventHook::Subscription => EventKind::Subscription,
        };
        let hooks = self.hooks.lock().unwrap();
        let queue = hooks.get(&hook).expect("hook not registered");
        queue.push(InboundEvent::new(kind, payload))
    }
}

#[async_trait]
impl AgentClient for ScriptedClient {
    async fn start(&self) -> Result<(), ClientError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_starts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_starts.store(remaining - 1, Ordering::SeqCst);
            return Err(ClientError::Connect("scripted failure".to_string()));
        }
        self.live.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
    }

    fn register(&self, hook: EventHook, queue: EventQueue) {
        self.hooks.lock().unwrap().insert(hook, queue);
    }

    async fn submit(
        &self,
        request: &OperationRequest,
    ) -> Result<tenantgate::gateway::CompletionHandle, ClientError> {
        if !self.is_live() {
            return Err(ClientError::NotConnected(self.identity.clone()));
        }
        self.submitted.lock().unwrap().push(request.clone());

        let (sender, handle) = completion_pair();
        match self.reply.lock().unwrap().clone() {
            Reply::Complete(completion) => {
                sender.complete(completion);
            }
            Reply::Hang => self.parked.lock().unwrap().push(sender),
        }
        Ok(handle)
    }
}

/// Factory that builds scripted clients and keeps every one it built
pub struct ScriptedFactory {
    fail_starts: AtomicU32,
    reply: Mutex<Reply>,
    created: Mutex<Vec<Arc<ScriptedClient>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            fail_starts: AtomicU32::new(0),
            reply: Mutex::new(Reply::Complete(Completion::ok(Some(json!({"ok": true}))))),
            created: Mutex::new(Vec::new()),
        }
    }

    /// New clients fail their first `n` starts
    pub fn failing(n: u32) -> Self {
        let factory = Self::new();
        factory.fail_starts.store(n, Ordering::SeqCst);
        factory
    }

    /// New clients answer with `reply`
    pub fn replying(reply: Reply) -> Self {
        let factory = Self::new();
        *factory.reply.lock().unwrap() = reply;
        factory
    }

    /// Most recently built client for `identity`
    pub fn client(&self, identity: &str) -> Option<Arc<ScriptedClient>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.identity == identity)
            .cloned()
    }

    /// How many clients were built for `identity`
    pub fn created_for(&self, identity: &str) -> usize {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.identity == identity)
            .count()
    }
}

impl ClientFactory for ScriptedFactory {
    fn create(&self, settings: &ClientSettings) -> Arc<dyn AgentClient> {
        let client = Arc::new(ScriptedClient::new(
            &settings.identity,
            self.fail_starts.load(Ordering::SeqCst),
            self.reply.lock().unwrap().clone(),
        ));
        self.created.lock().unwrap().push(Arc::clone(&client));
        client
    }
}

/// Pool over an in-memory source and a scripted factory
pub struct TestPool {
    pub manager: Arc<PoolManager>,
    pub source: Arc<MemoryConfigSource>,
    pub factory: Arc<ScriptedFactory>,
}

impl TestPool {
    pub fn new(settings: GatewaySettings, factory: ScriptedFactory, tenants: Vec<TenantConfig>) -> Self {
        let source = Arc::new(MemoryConfigSource::with_tenants(tenants));
        let factory = Arc::new(factory);
        let manager = Arc::new(PoolManager::new(
            settings,
            Arc::clone(&source) as Arc<dyn tenantgate::config::ConfigSource>,
            Arc::clone(&factory) as Arc<dyn ClientFactory>,
        ));
        Self {
            manager,
            source,
            factory,
        }
    }

    pub async fn worker(&self, identity: &str) -> Arc<TenantConnection> {
        self.manager
            .worker(identity)
            .await
            .unwrap_or_else(|| panic!("no worker for {identity}"))
    }

    /// Wait for `identity`'s current worker to reach `state`
    pub async fn wait_state(&self, identity: &str, state: ConnectionState) {
        let reached = self
            .worker(identity)
            .await
            .wait_for_state(|s| s == state, Duration::from_secs(5))
            .await;
        assert_eq!(reached, Some(state), "{identity} never reached {state}");
    }
}
