//! In-process monitor: counts every notification.
//!
//! Lock-free atomics for counters and a mutex-protected sample buffer for
//! serving latency.

use std::error::Error;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use canary_core::Location;

use crate::monitor::Monitor;

/// Counts serve, handling and rollout outcomes.
#[derive(Debug, Default)]
pub struct CountingMonitor {
    serve_ok: AtomicU64,
    serve_err: AtomicU64,
    master: AtomicU64,
    canary: AtomicU64,
    handling_err: AtomicU64,
    rollout_ok: AtomicU64,
    rollout_err: AtomicU64,
    /// Serving latency samples in microseconds.
    latencies: Mutex<Vec<u64>>,
}

/// Point-in-time copy of a [`CountingMonitor`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSnapshot {
    pub serve_ok: u64,
    pub serve_err: u64,
    pub master: u64,
    pub canary: u64,
    pub handling_err: u64,
    pub rollout_ok: u64,
    pub rollout_err: u64,
    pub served: u64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
}

impl CountingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let latencies = self.latencies.lock().expect("latencies lock");
        let (p50, p99) = compute_percentiles(&latencies);
        MonitorSnapshot {
            serve_ok: self.serve_ok.load(Ordering::Relaxed),
            serve_err: self.serve_err.load(Ordering::Relaxed),
            master: self.master.load(Ordering::Relaxed),
            canary: self.canary.load(Ordering::Relaxed),
            handling_err: self.handling_err.load(Ordering::Relaxed),
            rollout_ok: self.rollout_ok.load(Ordering::Relaxed),
            rollout_err: self.rollout_err.load(Ordering::Relaxed),
            served: latencies.len() as u64,
            latency_p50_ms: p50,
            latency_p99_ms: p99,
        }
    }
}

impl Monitor for CountingMonitor {
    fn record_serve(&self, error: Option<&dyn Error>) {
        match error {
            Some(_) => self.serve_err.fetch_add(1, Ordering::Relaxed),
            None => self.serve_ok.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn record_serving_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.latencies.lock().expect("latencies lock").push(micros);
    }

    fn record_handling(&self, location: Location, error: Option<&dyn Error>) {
        match location {
            Location::Master => self.master.fetch_add(1, Ordering::Relaxed),
            Location::Canary => self.canary.fetch_add(1, Ordering::Relaxed),
        };
        if error.is_some() {
            self.handling_err.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_rollout_update(&self, error: Option<&dyn Error>) {
        match error {
            Some(_) => self.rollout_err.fetch_add(1, Ordering::Relaxed),
            None => self.rollout_ok.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Compute P50 and P99 latency (milliseconds) from microsecond samples.
///
/// Returns (0.0, 0.0) when there are no samples.
fn compute_percentiles(latencies: &[u64]) -> (f64, f64) {
    if latencies.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let p50_idx = (sorted.len() as f64 * 0.50).ceil() as usize;
    let p99_idx = (sorted.len() as f64 * 0.99).ceil() as usize;

    let p50 = sorted[p50_idx.saturating_sub(1).min(sorted.len() - 1)];
    let p99 = sorted[p99_idx.saturating_sub(1).min(sorted.len() - 1)];

    (p50 as f64 / 1000.0, p99 as f64 / 1000.0)
}
