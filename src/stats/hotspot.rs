//! Parameter-keyed ("hotspot") statistics with bounded cardinality.

use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;

use super::window::BucketRing;

/// Per-resource map of parameter value to its own statistics window.
///
/// Capacity is bounded: when a new parameter value would exceed it, the
/// least-recently-used value is evicted along with its counters.
pub struct HotspotStats {
    params: Mutex<LruCache<String, Arc<BucketRing>>>,
}

impl HotspotStats {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            params: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Get or create the window for a parameter value.
    ///
    /// Accessing a value marks it recently used. The window geometry is
    /// taken from the first creation; later callers share the same ring.
    pub fn ring(&self, param: &str, window_ms: u64, buckets: usize) -> Arc<BucketRing> {
        let mut params = self.params.lock();
        if let Some(ring) = params.get(param) {
            return ring.clone();
        }

        let ring = Arc::new(BucketRing::new(window_ms, buckets));
        params.put(param.to_string(), ring.clone());
        ring
    }

    /// Number of parameter values currently tracked.
    pub fn tracked(&self) -> usize {
        self.params.lock().len()
    }
}

/// Registry of hotspot statistics, one entry per resource.
pub struct HotspotRegistry {
    resources: DashMap<String, Arc<HotspotStats>>,
    capacity: NonZeroUsize,
    buckets: usize,
}

impl HotspotRegistry {
    /// Create an empty registry. `capacity` bounds the parameter values
    /// tracked per resource; `buckets` sets each value's ring resolution.
    pub fn new(capacity: usize, buckets: usize) -> Self {
        Self {
            resources: DashMap::new(),
            capacity: NonZeroUsize::new(capacity.max(1)).unwrap(),
            buckets,
        }
    }

    /// Get or create the hotspot statistics for a resource.
    pub fn resource(&self, name: &str) -> Arc<HotspotStats> {
        self.resources
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(HotspotStats::new(self.capacity)))
            .clone()
    }

    /// Get or create the window for one parameter value of a resource.
    pub fn ring(&self, resource: &str, param: &str, window_ms: u64) -> Arc<BucketRing> {
        self.resource(resource).ring(param, window_ms, self.buckets)
    }
}
