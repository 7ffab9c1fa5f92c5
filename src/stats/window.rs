//! Bucketed sliding-window counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::Outcome;

/// One time bucket of counters.
///
/// `start_ms` identifies the bucket's rotation; counters from a previous
/// rotation are zeroed lazily by the first writer that claims the bucket.
struct Bucket {
    start_ms: AtomicU64,
    pass: AtomicU64,
    block: AtomicU64,
    error: AtomicU64,
    slow: AtomicU64,
    rt_sum: AtomicU64,
}

impl Bucket {
    fn new() -> Self {
        Self {
            start_ms: AtomicU64::new(0),
            pass: AtomicU64::new(0),
            block: AtomicU64::new(0),
            error: AtomicU64::new(0),
            slow: AtomicU64::new(0),
            rt_sum: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        self.pass.store(0, Ordering::SeqCst);
        self.block.store(0, Ordering::SeqCst);
        self.error.store(0, Ordering::SeqCst);
        self.slow.store(0, Ordering::SeqCst);
        self.rt_sum.store(0, Ordering::SeqCst);
    }
}

/// A ring of time buckets covering a sliding statistical window.
///
/// The ring never sweeps stale buckets eagerly: a bucket is reclaimed when
/// the first observation lands in it after rotation, and aggregation skips
/// any bucket whose start has fallen out of the window.
pub struct BucketRing {
    buckets: Vec<Bucket>,
    bucket_ms: u64,
    window_ms: u64,
    anchor: Instant,
}

impl BucketRing {
    /// Create a ring of `buckets` buckets spanning `window_ms` milliseconds.
    pub fn new(window_ms: u64, buckets: usize) -> Self {
        let count = buckets.max(1);
        let bucket_ms = (window_ms / count as u64).max(1);
        Self {
            buckets: (0..count).map(|_| Bucket::new()).collect(),
            bucket_ms,
            window_ms: bucket_ms * count as u64,
            anchor: Instant::now(),
        }
    }

    /// Length of the window in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    fn now_ms(&self) -> u64 {
        self.anchor.elapsed().as_millis() as u64
    }

    /// Resolve the bucket covering `now_ms`.
    ///
    /// The index is always `(now / bucket_ms) % n`. A bucket still holding a
    /// previous rotation's counts is claimed with a compare-and-swap on its
    /// start; the winner zeroes the counters before anyone adds to them.
    fn current_bucket(&self, now_ms: u64) -> &Bucket {
        let idx = ((now_ms / self.bucket_ms) as usize) % self.buckets.len();
        let bucket_start = now_ms - now_ms % self.bucket_ms;
        let bucket = &self.buckets[idx];

        loop {
            let start = bucket.start_ms.load(Ordering::Acquire);
            if start == bucket_start {
                return bucket;
            }
            if bucket
                .start_ms
                .compare_exchange(start, bucket_start, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                bucket.reset();
                return bucket;
            }
        }
    }

    /// Record one observation in the current bucket.
    pub fn observe(&self, outcome: Outcome, latency_ms: u64, slow: bool) {
        let bucket = self.current_bucket(self.now_ms());
        match outcome {
            Outcome::Success => bucket.pass.fetch_add(1, Ordering::SeqCst),
            Outcome::Error => bucket.error.fetch_add(1, Ordering::SeqCst),
        };
        bucket.rt_sum.fetch_add(latency_ms, Ordering::SeqCst);
        if slow {
            bucket.slow.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Record one blocked decision in the current bucket.
    pub fn add_block(&self) {
        self.current_bucket(self.now_ms())
            .block
            .fetch_add(1, Ordering::SeqCst);
    }

    /// Aggregate every bucket still inside the window.
    ///
    /// A bucket whose start is older than `now - window` is excluded even if
    /// it has not been physically zeroed yet.
    pub fn snapshot(&self) -> WindowSnapshot {
        let now_ms = self.now_ms();
        let mut snap = WindowSnapshot {
            window_ms: self.window_ms,
            ..Default::default()
        };

        for bucket in &self.buckets {
            let start = bucket.start_ms.load(Ordering::Acquire);
            if start + self.window_ms <= now_ms {
                continue;
            }
            snap.pass += bucket.pass.load(Ordering::SeqCst);
            snap.block += bucket.block.load(Ordering::SeqCst);
            snap.error += bucket.error.load(Ordering::SeqCst);
            snap.slow += bucket.slow.load(Ordering::SeqCst);
            snap.rt_sum += bucket.rt_sum.load(Ordering::SeqCst);
        }

        snap
    }

    /// Highest single-bucket pass throughput among completed buckets still
    /// inside the window, in requests per second.
    ///
    /// The in-progress bucket is excluded so the figure reflects throughput
    /// the ring actually sustained over a full bucket.
    pub fn peak_qps(&self) -> f64 {
        let now_ms = self.now_ms();
        let current_start = now_ms - now_ms % self.bucket_ms;
        let bucket_secs = self.bucket_ms as f64 / 1000.0;
        let mut peak = 0.0f64;

        for bucket in &self.buckets {
            let start = bucket.start_ms.load(Ordering::Acquire);
            if start + self.window_ms <= now_ms || start == current_start {
                continue;
            }
            let qps = bucket.pass.load(Ordering::SeqCst) as f64 / bucket_secs;
            if qps > peak {
                peak = qps;
            }
        }

        peak
    }
}

/// Aggregated counters over the live portion of a window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowSnapshot {
    /// Successful observations
    pub pass: u64,
    /// Blocked decisions
    pub block: u64,
    /// Failed observations
    pub error: u64,
    /// Observations slower than the configured latency bound
    pub slow: u64,
    /// Cumulative response time of pass + error observations, milliseconds
    pub rt_sum: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl WindowSnapshot {
    /// Total observed requests (pass + error) in the window.
    pub fn total(&self) -> u64 {
        self.pass + self.error
    }

    /// Pass throughput over the window length. An empty window yields zero.
    pub fn qps(&self) -> f64 {
        if self.window_ms == 0 {
            return 0.0;
        }
        self.pass as f64 / (self.window_ms as f64 / 1000.0)
    }

    /// Share of observations that failed. Zero when nothing was observed.
    pub fn error_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.error as f64 / total as f64
    }

    /// Share of observations slower than the latency bound.
    pub fn slow_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.slow as f64 / total as f64
    }

    /// Mean response time in milliseconds. Zero when nothing was observed.
    pub fn avg_rt(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.rt_sum as f64 / total as f64
    }
}
