//! Fan-out metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics for a single dispatcher
#[derive(Debug, Default)]
pub struct FanOutMetrics {
    /// Completed distribution passes
    updates: AtomicU64,
    /// Total successful sink writes
    sink_writes: AtomicU64,
    /// Total sink write failures
    sink_failures: AtomicU64,
    /// Writes that displaced a queued older value
    data_loss: AtomicU64,
    /// Values received through the return channel
    return_updates: AtomicU64,
}

impl FanOutMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn inc_updates(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sink_writes(&self) -> u64 {
        self.sink_writes.load(Ordering::Relaxed)
    }

    pub fn inc_sink_writes(&self) {
        self.sink_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    pub fn inc_sink_failures(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn data_loss(&self) -> u64 {
        self.data_loss.load(Ordering::Relaxed)
    }

    pub fn inc_data_loss(&self) {
        self.data_loss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn return_updates(&self) -> u64 {
        self.return_updates.load(Ordering::Relaxed)
    }

    pub fn inc_return_updates(&self) {
        self.return_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            updates: self.updates(),
            sink_writes: self.sink_writes(),
            sink_failures: self.sink_failures(),
            data_loss: self.data_loss(),
            return_updates: self.return_updates(),
        }
    }
}

/// Snapshot of dispatcher metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub updates: u64,
    pub sink_writes: u64,
    pub sink_failures: u64,
    pub data_loss: u64,
    pub return_updates: u64,
}

/// Process-wide count of values discarded because a sink queue was full.
#[derive(Debug, Clone, Default)]
pub struct DataLossCounter(Arc<AtomicU64>);

impl DataLossCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
