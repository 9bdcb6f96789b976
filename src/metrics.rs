use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

/// Process-local counters for the health endpoint. Writers are the intake
/// handlers and the worker pool; everyone else only reads snapshots. No
/// cross-component mutable state beyond these atomics.
#[derive(Clone)]
pub struct RuntimeMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    started_at: Instant,
    requests: AtomicU64,
    errors: AtomicU64,
    configured_workers: usize,
    active_workers: AtomicUsize,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Decrements the active-worker gauge on drop, so an early return or an
/// error path cannot leave a phantom active worker behind.
pub struct DeliveryGuard {
    inner: Arc<Inner>,
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) { self.inner.active_workers.fetch_sub(1, Ordering::Relaxed); }
}

#[derive(Serialize)]
pub struct WorkerStatus {
    pub configured: usize,
    pub active: usize,
    pub delivered: u64,
    pub failed: u64,
}

pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    /// Percentage of intake requests that errored.
    pub error_rate: f64,
    pub worker_status: WorkerStatus,
}

impl RuntimeMetrics {
    pub fn new(configured_workers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                started_at: Instant::now(),
                requests: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                configured_workers,
                active_workers: AtomicUsize::new(0),
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_request(
        &self,
        success: bool,
    ) {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.inner.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn delivery_started(&self) -> DeliveryGuard {
        self.inner.active_workers.fetch_add(1, Ordering::Relaxed);
        DeliveryGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn record_delivery(
        &self,
        success: bool,
    ) {
        match success {
            true => self.inner.delivered.fetch_add(1, Ordering::Relaxed),
            false => self.inner.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.inner.requests.load(Ordering::Relaxed);
        let errors = self.inner.errors.load(Ordering::Relaxed);
        let error_rate = match requests {
            0 => 0.0,
            n => errors as f64 / n as f64 * 100.0,
        };
        MetricsSnapshot {
            uptime_seconds: self.inner.started_at.elapsed().as_secs_f64(),
            error_rate,
            worker_status: WorkerStatus {
                configured: self.inner.configured_workers,
                active: self.inner.active_workers.load(Ordering::Relaxed),
                delivered: self.inner.delivered.load(Ordering::Relaxed),
                failed: self.inner.failed.load(Ordering::Relaxed),
            },
        }
    }
}
