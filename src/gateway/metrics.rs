// ABOUTME: Counters for the tenant connection pool
//
// Tracks:
// - Requests: total, errors, timeouts
// - Workers: wakes, sleeps, active tenants
// - Reconciliation: ticks, failed ticks

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

use super::error::GatewayError;

/// Pool-level metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,
    pub total_timeouts: AtomicU64,
    pub wakes: AtomicU64,
    pub sleeps: AtomicU64,
    pub reconcile_ticks: AtomicU64,
    pub reconcile_failures: AtomicU64,
    pub active_tenants: AtomicU32,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_requests(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed request, classifying timeouts separately
    pub fn record_error(&self, err: &GatewayError) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        if matches!(err, GatewayError::RequestTimeout { .. }) {
            self.total_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_wakes(&self) {
        self.wakes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sleeps(&self) {
        self.sleeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconcile_tick(&self, failed: bool) {
        self.reconcile_ticks.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.reconcile_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_active_tenants(&self, count: u32) {
        self.active_tenants.store(count, Ordering::Relaxed);
    }

    /// Point-in-time copy for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            wakes: self.wakes.load(Ordering::Relaxed),
            sleeps: self.sleeps.load(Ordering::Relaxed),
            reconcile_ticks: self.reconcile_ticks.load(Ordering::Relaxed),
            reconcile_failures: self.reconcile_failures.load(Ordering::Relaxed),
            active_tenants: self.active_tenants.load(Ordering::Relaxed),
        }
    }
}

/// Plain values read from [`GatewayMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
    pub wakes: u64,
    pub sleeps: u64,
    pub reconcile_ticks: u64,
    pub reconcile_failures: u64,
    pub active_tenants: u32,
}
