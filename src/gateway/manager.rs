// ABOUTME: Pool of tenant connections reconciled against a polled configuration source
// ABOUTME: Resolves identity and token before every tenant-scoped call and bridges requests

//! Connection pool manager.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         PoolManager                          │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ workers: RwLock<HashMap<String, Arc<TenantConnection>>> │  │
//! │  │    - ep-1 -> TenantConnection (awake)                   │  │
//! │  │    - ep-2 -> TenantConnection (asleep)                  │  │
//! │  │    - ep-3 -> TenantConnection (connecting)              │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! │  ┌──────────────┐  ┌───────────────┐  ┌──────────────────┐   │
//! │  │ ConfigSource │  │ ClientFactory │  │  RequestBridge   │   │
//! │  │ (polled)     │  │ (per tenant)  │  │  (deadline)      │   │
//! │  └──────────────┘  └───────────────┘  └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Reconciliation
//!
//! Each tick lists identities, reads their configs, then detaches workers
//! that are gone, drifted or failed. Detached workers are stopped outside the
//! map lock; missing workers are created and started under it. While a drifted
//! tenant is being replaced its requests see `Unauthorized`.
//!
//! # Usage
//!
//! ```ignore
//! let manager = Arc::new(PoolManager::new(settings, source, factory));
//! manager.start().await?;
//!
//! let request = OperationRequest::parse("entity_list", json!({"limit": 10}))?;
//! let outcome = manager.invoke("ep-1", "token", request).await?;
//!
//! manager.stop().await;
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bridge::{Outcome, RequestBridge};
use super::error::{GatewayError, GatewayResult};
use super::metrics::GatewayMetrics;
use super::operation::OperationRequest;
use super::queue::InboundEvent;
use super::transport::{ClientFactory, CompletionHandle};
use super::worker::{ConnectionState, TenantConnection, WorkerSettings};
use crate::config::{ConfigSource, GatewaySettings, TenantConfig};

/// Why a worker was removed during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetachReason {
    Removed,
    Drifted,
    Failed,
}

impl fmt::Display for DetachReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Removed => "removed",
            Self::Drifted => "config changed",
            Self::Failed => "failed",
        })
    }
}

/// What one reconciliation tick changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<(String, DetachReason)>,
    /// Listed but unreadable this tick; left untouched
    pub skipped: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// Status line for one pooled tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantStatus {
    pub identity: String,
    pub state: ConnectionState,
    pub connect_attempts: u32,
}

/// Owns one connection per configured tenant
pub struct PoolManager {
    settings: GatewaySettings,
    source: Arc<dyn ConfigSource>,
    factory: Arc<dyn ClientFactory>,
    bridge: RequestBridge,
    metrics: Arc<GatewayMetrics>,

    workers: RwLock<HashMap<String, Arc<TenantConnection>>>,
    /// Serializes reconciliation ticks and teardown
    reconcile_lock: Mutex<()>,

    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("settings", &self.settings)
            .field("shutdown", &*self.shutdown.borrow())
            .finish_non_exhaustive()
    }
}

impl PoolManager {
    /// Create a manager with an empty pool; call `start()` to begin reconciling
    pub fn new(
        settings: GatewaySettings,
        source: Arc<dyn ConfigSource>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            bridge: RequestBridge::new(settings.request_timeout),
            settings,
            source,
            factory,
            metrics: Arc::new(GatewayMetrics::new()),
            workers: RwLock::new(HashMap::new()),
            reconcile_lock: Mutex::new(()),
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub const fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub const fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    // === Lifecycle ===

    /// Launch the reconciliation loop
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if the loop is already active.
    pub async fn start(self: &Arc<Self>) -> GatewayResult<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(GatewayError::AlreadyRunning);
        }

        self.shutdown.send_replace(false);
        let manager = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(async move {
            manager.run(shutdown).await;
        }));

        info!(
            interval_secs = self.settings.reconcile_interval.as_secs(),
            "Pool manager started"
        );
        Ok(())
    }

    /// Stop the loop and every worker.
    ///
    /// Idempotent. All workers are `Stopped` when this returns.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);

        {
            let mut task = self.task.lock().await;
            if let Some(handle) = task.take() {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Reconciliation task ended abnormally");
                }
            }
        }

        let _tick = self.reconcile_lock.lock().await;
        let workers: Vec<Arc<TenantConnection>> = {
            let mut map = self.workers.write().await;
            map.drain().map(|(_, worker)| worker).collect()
        };

        if !workers.is_empty() {
            info!(count = workers.len(), "Stopping tenant connections");
        }
        join_all(workers.iter().map(|w| w.stop())).await;
        self.metrics.set_active_tenants(0);

        info!("Pool manager stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.reconcile_once().await {
                debug!(error = %e, "Reconciliation tick ended early");
            }

            tokio::select! {
                () = tokio::time::sleep(self.settings.reconcile_interval) => {}
                _ = shutdown.wait_for(|stopped| *stopped) => break,
            }
        }
        debug!("Reconciliation loop exited");
    }

    // === Reconciliation ===

    /// Run one reconciliation tick.
    ///
    /// # Errors
    ///
    /// `ConfigUnavailable` when identities cannot be listed (the pool is left
    /// untouched); `NotRunning` after `stop()`.
    pub async fn reconcile_once(&self) -> GatewayResult<ReconcileReport> {
        let _tick = self.reconcile_lock.lock().await;
        if *self.shutdown.borrow() {
            return Err(GatewayError::NotRunning);
        }

        let identities = match self.source.list_identities().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to list tenant identities; pool left unchanged");
                self.metrics.reconcile_tick(true);
                return Err(e.into());
            }
        };

        let mut report = ReconcileReport::default();
        let mut desired: HashMap<String, TenantConfig> = HashMap::new();
        let mut skipped: HashSet<String> = HashSet::new();

        for identity in identities {
            match self.source.read_tenant(&identity).await {
                Ok(config) if config.identity == identity => {
                    desired.insert(identity, config);
                }
                Ok(config) => {
                    warn!(
                        tenant = %identity,
                        found = %config.identity,
                        "Config identity mismatch; skipping tenant this tick"
                    );
                    skipped.insert(identity);
                }
                Err(e) => {
                    warn!(tenant = %identity, error = %e, "Failed to read tenant config; skipping this tick");
                    skipped.insert(identity);
                }
            }
        }

        // Detach under the lock, stop outside it
        let detached: Vec<(Arc<TenantConnection>, DetachReason)> = {
            let mut workers = self.workers.write().await;
            let stale: Vec<(String, DetachReason)> = workers
                .iter()
                .filter(|(id, _)| !skipped.contains(*id))
                .filter_map(|(id, worker)| {
                    let reason = match desired.get(id) {
                        None => DetachReason::Removed,
                        Some(_) if worker.state() == ConnectionState::Failed => DetachReason::Failed,
                        Some(config) if !worker.check_config_matches(config) => DetachReason::Drifted,
                        Some(_) => return None,
                    };
                    Some((id.clone(), reason))
                })
                .collect();

            stale
                .into_iter()
                .filter_map(|(id, reason)| workers.remove(&id).map(|w| (w, reason)))
                .collect()
        };

        for (worker, reason) in &detached {
            info!(tenant = %worker.identity(), reason = %reason, "Stopping tenant connection");
        }
        join_all(detached.iter().map(|(w, _)| w.stop())).await;
        report.stopped = detached
            .iter()
            .map(|(w, reason)| (w.identity().to_string(), *reason))
            .collect();

        {
            let mut workers = self.workers.write().await;
            for (identity, config) in desired {
                if workers.contains_key(&identity) {
                    continue;
                }

                info!(tenant = %identity, host = %config.host, "Starting tenant connection");
                let client = self.factory.create(&config.client_settings());
                let worker = Arc::new(TenantConnection::new(
                    config,
                    WorkerSettings::from(&self.settings),
                    client,
                    Arc::clone(&self.metrics),
                ));
                if let Err(e) = worker.start(self.shutdown.subscribe()).await {
                    warn!(tenant = %identity, error = %e, "Failed to start worker");
                    continue;
                }
                workers.insert(identity.clone(), worker);
                report.started.push(identity);
            }

            self.metrics
                .set_active_tenants(u32::try_from(workers.len()).unwrap_or(u32::MAX));
        }

        report.started.sort();
        report.stopped.sort();
        report.skipped = skipped.into_iter().collect();
        report.skipped.sort();

        self.metrics.reconcile_tick(false);
        if !report.is_noop() {
            debug!(
                started = report.started.len(),
                stopped = report.stopped.len(),
                "Reconciliation tick applied changes"
            );
        }
        Ok(report)
    }

    // === Tenant-scoped Surface ===

    /// Look up a tenant's worker, checking the presented token.
    ///
    /// Unknown identities and bad tokens both yield `Unauthorized`.
    pub async fn resolve(&self, identity: &str, token: &str) -> GatewayResult<Arc<TenantConnection>> {
        let worker = self.workers.read().await.get(identity).cloned();
        match worker {
            Some(worker) if worker.check_auth_token(token) => Ok(worker),
            _ => {
                debug!(tenant = %identity, "Rejected tenant credentials");
                Err(GatewayError::Unauthorized)
            }
        }
    }

    /// Forward a request and wait for its outcome
    pub async fn invoke(
        &self,
        identity: &str,
        token: &str,
        request: OperationRequest,
    ) -> GatewayResult<Outcome> {
        self.metrics.increment_requests();
        let operation = request.operation();

        let result = async {
            let worker = self.resolve(identity, token).await?;
            let handle = worker.submit(request).await?;
            self.bridge.await_completion(operation, handle).await
        }
        .await;

        if let Err(e) = &result {
            self.metrics.record_error(e);
            debug!(tenant = %identity, operation = %operation, error = %e, "Request failed");
        }
        result
    }

    /// Forward a request without waiting; the caller owns the completion
    pub async fn submit(
        &self,
        identity: &str,
        token: &str,
        request: OperationRequest,
    ) -> GatewayResult<CompletionHandle> {
        self.metrics.increment_requests();
        let result = async {
            let worker = self.resolve(identity, token).await?;
            worker.submit(request).await
        }
        .await;

        if let Err(e) = &result {
            self.metrics.record_error(e);
        }
        result
    }

    pub async fn drain_feed_data(&self, identity: &str, token: &str) -> GatewayResult<Vec<InboundEvent>> {
        Ok(self.resolve(identity, token).await?.drain_feed_data())
    }

    pub async fn drain_control_requests(
        &self,
        identity: &str,
        token: &str,
    ) -> GatewayResult<Vec<InboundEvent>> {
        Ok(self.resolve(identity, token).await?.drain_control_requests())
    }

    pub async fn drain_unsolicited(&self, identity: &str, token: &str) -> GatewayResult<Vec<InboundEvent>> {
        Ok(self.resolve(identity, token).await?.drain_unsolicited())
    }

    // === Introspection ===

    /// Worker currently pooled for `identity`
    pub async fn worker(&self, identity: &str) -> Option<Arc<TenantConnection>> {
        self.workers.read().await.get(identity).cloned()
    }

    pub async fn tenant_state(&self, identity: &str) -> Option<ConnectionState> {
        self.worker(identity).await.map(|w| w.state())
    }

    /// Every pooled tenant, sorted by identity
    pub async fn tenants(&self) -> Vec<TenantStatus> {
        let workers = self.workers.read().await;
        let mut statuses: Vec<TenantStatus> = workers
            .values()
            .map(|w| TenantStatus {
                identity: w.identity().to_string(),
                state: w.state(),
                connect_attempts: w.connect_attempts(),
            })
            .collect();
        statuses.sort_by(|a, b| a.identity.cmp(&b.identity));
        statuses
    }
}
