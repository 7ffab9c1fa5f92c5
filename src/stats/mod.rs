//! Online statistics: per-resource sliding windows, concurrency counters,
//! parameter-keyed hotspot windows, and global system samples.

mod hotspot;
mod system;
mod window;

pub use hotspot::{HotspotRegistry, HotspotStats};
pub use system::{SystemSample, SystemStats};
pub use window::{BucketRing, WindowSnapshot};

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Outcome of a single traffic observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The request completed successfully
    Success,
    /// The request failed
    Error,
}

/// Statistics for a single named resource.
pub struct ResourceStats {
    /// Sliding window of pass/block/error/latency counters
    ring: BucketRing,
    /// Live in-flight count
    concurrency: AtomicI64,
}

impl ResourceStats {
    fn new(window_ms: u64, buckets: usize) -> Self {
        Self {
            ring: BucketRing::new(window_ms, buckets),
            concurrency: AtomicI64::new(0),
        }
    }

    /// Record one observation.
    pub fn observe(&self, outcome: Outcome, latency_ms: u64, slow: bool) {
        self.ring.observe(outcome, latency_ms, slow);
    }

    /// Record one blocked decision.
    pub fn add_block(&self) {
        self.ring.add_block();
    }

    /// Increment the in-flight count, returning the new value.
    pub fn enter(&self) -> i64 {
        self.concurrency.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement the in-flight count, saturating at zero.
    pub fn exit(&self) {
        let _ = self
            .concurrency
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some((v - 1).max(0)));
    }

    /// Current in-flight count.
    pub fn concurrency(&self) -> i64 {
        self.concurrency.load(Ordering::SeqCst)
    }

    /// Aggregate the live window.
    pub fn snapshot(&self) -> WindowSnapshot {
        self.ring.snapshot()
    }
}

/// A point-in-time view of one resource's statistics.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    /// Aggregated window counters
    pub window: WindowSnapshot,
    /// Live in-flight count
    pub concurrency: i64,
}

/// Registry of per-resource statistics.
///
/// Entries are created lazily on first observation and never removed;
/// resource cardinality is operator-controlled.
pub struct StatsRegistry {
    resources: DashMap<String, Arc<ResourceStats>>,
    window_ms: u64,
    buckets: usize,
}

impl StatsRegistry {
    /// Create an empty registry with the given window geometry.
    pub fn new(window_ms: u64, buckets: usize) -> Self {
        Self {
            resources: DashMap::new(),
            window_ms,
            buckets,
        }
    }

    /// Get or create the statistics entry for a resource.
    pub fn resource(&self, name: &str) -> Arc<ResourceStats> {
        self.resources
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ResourceStats::new(self.window_ms, self.buckets)))
            .clone()
    }

    /// Aggregate one resource's window and concurrency.
    pub fn snapshot(&self, name: &str) -> ResourceSnapshot {
        let stats = self.resource(name);
        ResourceSnapshot {
            window: stats.snapshot(),
            concurrency: stats.concurrency(),
        }
    }

    /// Number of tracked resources.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}
