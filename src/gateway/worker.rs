// ABOUTME: One tenant's long-lived agent connection with its own control task
// ABOUTME: Retries startup, sleeps when idle, wakes on demand, buffers unsolicited events

//! Tenant connection lifecycle.
//!
//! ```text
//!            start()
//!   New ──────────────▶ Connecting ──(attempts exhausted)──▶ Failed
//!                           │
//!                       connected
//!                           ▼
//!                         Awake ◀──────(request wakes)────── Asleep
//!                           └──────(idle_timeout on tick)───────▲
//!
//!   any state ──stop()──▶ Stopping ──▶ Stopped
//! ```
//!
//! The control task owns startup and idle evaluation. Requests arrive on the
//! caller's task and may wake a sleeping connection; the `link` mutex makes
//! waking, sleeping and teardown mutually exclusive so a request is never
//! forwarded to a client that is being stopped underneath it.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::backoff::ConnectBackoff;
use super::error::{GatewayError, GatewayResult};
use super::metrics::GatewayMetrics;
use super::operation::OperationRequest;
use super::queue::{EventQueue, InboundEvent};
use super::transport::{AgentClient, CompletionHandle, EventHook};
use crate::config::{GatewaySettings, TenantConfig};

// === Connection State ===

/// Lifecycle state of a tenant connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Constructed; control task not started
    New,
    /// Attempting `client.start()`
    Connecting,
    /// Client live and accepting requests
    Awake,
    /// Client stopped for idleness; next request reconnects
    Asleep,
    /// Stop requested; client being torn down
    Stopping,
    /// Client stopped and control task gone
    Stopped,
    /// Every startup attempt failed; control task has exited
    Failed,
}

impl ConnectionState {
    /// No further transitions happen without outside action
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Awake => "awake",
            Self::Asleep => "asleep",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Timings a worker takes from the gateway settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
}

impl From<&GatewaySettings> for WorkerSettings {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            poll_interval: settings.poll_interval,
            connect_attempts: settings.connect_attempts,
            connect_backoff: settings.connect_backoff,
        }
    }
}

// === Tenant Connection ===

/// Owns one agent client for one tenant
pub struct TenantConnection {
    config: TenantConfig,
    settings: WorkerSettings,
    client: Arc<dyn AgentClient>,
    metrics: Arc<GatewayMetrics>,

    state: watch::Sender<ConnectionState>,
    /// Held while the client is being started, stopped or handed a request
    link: Mutex<()>,
    last_activity: StdMutex<Instant>,
    connect_attempts: AtomicU32,

    feed_data: EventQueue,
    control_requests: EventQueue,
    unsolicited: EventQueue,

    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantConnection")
            .field("identity", &self.config.identity)
            .field("state", &self.state())
            .field("connect_attempts", &self.connect_attempts())
            .finish_non_exhaustive()
    }
}

impl TenantConnection {
    pub fn new(
        config: TenantConfig,
        settings: WorkerSettings,
        client: Arc<dyn AgentClient>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::New);
        let (stop_tx, _) = watch::channel(false);

        Self {
            feed_data: EventQueue::new(config.keep_feeddata),
            control_requests: EventQueue::new(config.keep_controlreq),
            unsolicited: EventQueue::new(config.keep_unsolicited),
            config,
            settings,
            client,
            metrics,
            state,
            link: Mutex::new(()),
            last_activity: StdMutex::new(Instant::now()),
            connect_attempts: AtomicU32::new(0),
            stop_tx,
            task: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub const fn config(&self) -> &TenantConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Startup attempts made so far
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Time since the last forwarded request or successful connect
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn check_auth_token(&self, token: &str) -> bool {
        self.config.accepts_token(token)
    }

    /// Whether this worker is still running with `config`
    pub fn check_config_matches(&self, config: &TenantConfig) -> bool {
        self.config.matches(config)
    }

    // === Lifecycle ===

    /// Spawn the control task.
    ///
    /// `shutdown` is the manager-wide stop flag; the worker also stops when it
    /// flips to true.
    pub async fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> GatewayResult<()> {
        let mut task = self.task.lock().await;
        if task.is_some() || self.state() != ConnectionState::New {
            return Err(GatewayError::AlreadyRunning);
        }

        let worker = Arc::clone(self);
        let stop = self.stop_tx.subscribe();
        *task = Some(tokio::spawn(async move {
            worker.run(stop, shutdown).await;
        }));

        debug!(tenant = %self.identity(), "Worker task spawned");
        Ok(())
    }

    /// Stop the control task and the client.
    ///
    /// Idempotent. Returns once the task has exited and the state is `Stopped`.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);

        {
            let mut task = self.task.lock().await;
            if let Some(handle) = task.take() {
                if let Err(e) = handle.await {
                    warn!(tenant = %self.identity(), error = %e, "Worker task ended abnormally");
                }
            }
        }

        self.teardown().await;
    }

    /// Wait until the state satisfies `pred`, or `timeout` passes
    pub async fn wait_for_state<F>(&self, pred: F, timeout: Duration) -> Option<ConnectionState>
    where
        F: Fn(ConnectionState) -> bool,
    {
        let mut rx = self.state.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|s| pred(*s))).await;
        match result {
            Ok(Ok(state)) => Some(*state),
            _ => None,
        }
    }

    // === Requests ===

    /// Make sure the client is live, reconnecting once if asleep
    pub async fn ensure_awake(&self) -> GatewayResult<()> {
        let _link = self.link.lock().await;
        self.wake_locked().await
    }

    /// Forward a request, waking the connection first if needed
    pub async fn submit(&self, request: OperationRequest) -> GatewayResult<CompletionHandle> {
        let request = request.normalized();

        let _link = self.link.lock().await;
        self.wake_locked().await?;
        self.touch();

        debug!(tenant = %self.identity(), operation = %request.operation(), "Forwarding request");
        self.client
            .submit(&request)
            .await
            .map_err(|e| GatewayError::from_client(self.identity(), e))
    }

    pub fn drain_feed_data(&self) -> Vec<InboundEvent> {
        self.feed_data.drain()
    }

    pub fn drain_control_requests(&self) -> Vec<InboundEvent> {
        self.control_requests.drain()
    }

    pub fn drain_unsolicited(&self) -> Vec<InboundEvent> {
        self.unsolicited.drain()
    }

    // === Internals ===

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(tenant = %self.identity(), from = %previous, to = %state, "State change");
        }
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn register_hooks(&self) {
        for hook in EventHook::ALL {
            let queue = match hook {
                EventHook::FeedData => &self.feed_data,
                EventHook::ControlRequest => &self.control_requests,
                EventHook::Reassigned | EventHook::Subscription => &self.unsolicited,
            };
            self.client.register(hook, queue.clone());
        }
    }

    /// Caller holds `link`
    async fn wake_locked(&self) -> GatewayResult<()> {
        match self.state() {
            ConnectionState::Awake => Ok(()),
            ConnectionState::Asleep => {
                info!(tenant = %self.identity(), "Waking connection");
                if let Err(e) = self.client.start().await {
                    warn!(tenant = %self.identity(), error = %e, "Wake failed");
                    return Err(GatewayError::from_client(self.identity(), e));
                }
                self.register_hooks();
                self.touch();
                self.set_state(ConnectionState::Awake);
                self.metrics.increment_wakes();
                Ok(())
            }
            ConnectionState::New | ConnectionState::Connecting => Err(
                GatewayError::connection_failed(self.identity(), "connection not established yet"),
            ),
            ConnectionState::Failed => Err(GatewayError::connection_failed(
                self.identity(),
                "connection attempts exhausted",
            )),
            ConnectionState::Stopping | ConnectionState::Stopped => Err(
                GatewayError::connection_failed(self.identity(), "connection stopped"),
            ),
        }
    }

    async fn run(
        self: Arc<Self>,
        mut stop: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if self.connect(&mut stop, &mut shutdown).await {
            self.idle_loop(&mut stop, &mut shutdown).await;
        }

        if self.state() != ConnectionState::Failed {
            self.teardown().await;
        }
        debug!(tenant = %self.identity(), "Worker task exited");
    }

    /// Startup with bounded retries; false if stopped or failed
    async fn connect(
        &self,
        stop: &mut watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        self.set_state(ConnectionState::Connecting);
        let mut backoff =
            ConnectBackoff::fixed(self.settings.connect_backoff, self.settings.connect_attempts);

        loop {
            let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;

            let result = {
                let _link = self.link.lock().await;
                tokio::select! {
                    result = self.client.start() => result,
                    () = stop_signal(stop, shutdown) => return false,
                }
            };

            match result {
                Ok(()) => {
                    self.register_hooks();
                    self.touch();
                    self.set_state(ConnectionState::Awake);
                    info!(tenant = %self.identity(), attempt, "Connected");
                    return true;
                }
                Err(e) => {
                    warn!(tenant = %self.identity(), attempt, error = %e, "Connection attempt failed");
                    let Some(delay) = backoff.next_delay() else {
                        error!(
                            tenant = %self.identity(),
                            attempts = attempt,
                            "Giving up on connection"
                        );
                        self.set_state(ConnectionState::Failed);
                        return false;
                    };
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = stop_signal(stop, shutdown) => return false,
                    }
                }
            }
        }
    }

    async fn idle_loop(
        &self,
        stop: &mut watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval(self.settings.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => self.sleep_if_idle().await,
                () = stop_signal(stop, shutdown) => return,
            }
        }
    }

    async fn sleep_if_idle(&self) {
        let Some(idle_timeout) = self.config.idle_timeout else {
            return;
        };

        let _link = self.link.lock().await;
        if self.state() != ConnectionState::Awake {
            return;
        }
        let idle = self.idle_for();
        if !idle_expired(idle, idle_timeout) {
            return;
        }

        info!(tenant = %self.identity(), idle_secs = idle.as_secs(), "Putting idle connection to sleep");
        self.client.stop().await;
        self.set_state(ConnectionState::Asleep);
        self.metrics.increment_sleeps();
    }

    /// Stop the client and settle in `Stopped`; no-op once stopped
    async fn teardown(&self) {
        let _link = self.link.lock().await;
        if self.state() == ConnectionState::Stopped {
            return;
        }

        self.set_state(ConnectionState::Stopping);
        self.client.stop().await;
        self.set_state(ConnectionState::Stopped);
        info!(tenant = %self.identity(), "Connection stopped");
    }
}

/// Idle strictly longer than the timeout
fn idle_expired(idle: Duration, idle_timeout: Duration) -> bool {
    idle > idle_timeout
}

/// Resolves once either stop flag is set or its sender is gone
async fn stop_signal(stop: &mut watch::Receiver<bool>, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = stop.wait_for(|stopped| *stopped) => {}
        _ = shutdown.wait_for(|stopped| *stopped) => {}
    }
}
