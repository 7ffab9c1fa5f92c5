//! Global inbound statistics and host-fed system samples.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use super::window::{BucketRing, WindowSnapshot};
use super::Outcome;

/// A point-in-time sample of host-level metrics, fed by the embedding host.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemSample {
    /// One-minute load average
    pub load_avg: f64,
    /// CPU usage ratio in [0, 1]
    pub cpu_usage: f64,
    /// Resident memory in use, bytes
    pub memory_used_bytes: u64,
}

/// System-wide statistics shared by every resource.
///
/// The inbound window aggregates all observations regardless of resource;
/// load, CPU, and memory are whatever the host last reported.
pub struct SystemStats {
    inbound: BucketRing,
    concurrency: AtomicI64,
    load_bits: AtomicU64,
    cpu_bits: AtomicU64,
    memory_used: AtomicU64,
}

impl SystemStats {
    /// Create system statistics with the given window geometry.
    pub fn new(window_ms: u64, buckets: usize) -> Self {
        Self {
            inbound: BucketRing::new(window_ms, buckets),
            concurrency: AtomicI64::new(0),
            load_bits: AtomicU64::new(0.0f64.to_bits()),
            cpu_bits: AtomicU64::new(0.0f64.to_bits()),
            memory_used: AtomicU64::new(0),
        }
    }

    /// Record one inbound observation.
    pub fn observe(&self, outcome: Outcome, latency_ms: u64) {
        self.inbound.observe(outcome, latency_ms, false);
    }

    /// Increment the global in-flight count.
    pub fn enter(&self) {
        self.concurrency.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the global in-flight count, saturating at zero.
    pub fn exit(&self) {
        let _ = self
            .concurrency
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some((v - 1).max(0)));
    }

    /// Current global in-flight count.
    pub fn concurrency(&self) -> i64 {
        self.concurrency.load(Ordering::SeqCst)
    }

    /// Store the latest host sample.
    pub fn update_sample(&self, sample: SystemSample) {
        self.load_bits
            .store(sample.load_avg.to_bits(), Ordering::SeqCst);
        self.cpu_bits
            .store(sample.cpu_usage.to_bits(), Ordering::SeqCst);
        self.memory_used
            .store(sample.memory_used_bytes, Ordering::SeqCst);
    }

    /// Last reported load average.
    pub fn load_avg(&self) -> f64 {
        f64::from_bits(self.load_bits.load(Ordering::SeqCst))
    }

    /// Last reported CPU usage ratio.
    pub fn cpu_usage(&self) -> f64 {
        f64::from_bits(self.cpu_bits.load(Ordering::SeqCst))
    }

    /// Last reported memory in use, bytes.
    pub fn memory_used_bytes(&self) -> u64 {
        self.memory_used.load(Ordering::SeqCst)
    }

    /// Aggregate the global inbound window.
    pub fn snapshot(&self) -> WindowSnapshot {
        self.inbound.snapshot()
    }

    /// Estimate of the maximum throughput the system recently sustained:
    /// the densest live bucket's pass rate in requests per second.
    pub fn sustainable_qps(&self) -> f64 {
        self.inbound.peak_qps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_roundtrip() {
        let system = SystemStats::new(1000, 10);
        assert_eq!(system.load_avg(), 0.0);

        system.update_sample(SystemSample {
            load_avg: 2.5,
            cpu_usage: 0.75,
            memory_used_bytes: 512 * 1024 * 1024,
        });

        assert_eq!(system.load_avg(), 2.5);
        assert_eq!(system.cpu_usage(), 0.75);
        assert_eq!(system.memory_used_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_global_window() {
        let system = SystemStats::new(1000, 10);

        for _ in 0..4 {
            system.observe(Outcome::Success, 10);
        }
        system.observe(Outcome::Error, 40);

        let snap = system.snapshot();
        assert_eq!(snap.pass, 4);
        assert_eq!(snap.error, 1);
        assert!((snap.qps() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_global_concurrency() {
        let system = SystemStats::new(1000, 10);

        system.enter();
        system.enter();
        system.exit();
        assert_eq!(system.concurrency(), 1);

        system.exit();
        system.exit();
        assert_eq!(system.concurrency(), 0);
    }
}
