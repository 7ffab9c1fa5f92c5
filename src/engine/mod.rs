//! The admission decision engine.
//!
//! [`Engine`] owns the rule registry, the statistics registries, and the
//! per-resource circuit breakers. The observation feed calls [`Engine::record`]
//! and the concurrency hooks; evaluation tasks call [`Engine::evaluate`].

mod breaker;
mod evaluator;

pub use breaker::{Breaker, CircuitState};

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::FloodgateConfig;
use crate::rules::{BreakerStrategy, RuleRegistry, RuleSet};
use crate::stats::{
    HotspotRegistry, Outcome, ResourceSnapshot, StatsRegistry, SystemSample, SystemStats,
};

/// Why a unit of traffic was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    /// A rate limit rule rejected the request
    RateLimited,
    /// A hotspot rule rejected the parameter value
    Hotspot,
    /// The resource's circuit breaker is not closed
    CircuitOpen,
    /// The resource's concurrency limit was reached
    IsolationExceeded,
    /// A system-level adaptive rule triggered
    SystemOverload,
}

impl BlockReason {
    /// Stable textual form, used as the rejection reason string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::RateLimited => "RateLimited",
            BlockReason::Hotspot => "Hotspot",
            BlockReason::CircuitOpen => "CircuitOpen",
            BlockReason::IsolationExceeded => "IsolationExceeded",
            BlockReason::SystemOverload => "SystemOverload",
        }
    }

    /// Parse the textual form back into a reason.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RateLimited" => Some(BlockReason::RateLimited),
            "Hotspot" => Some(BlockReason::Hotspot),
            "CircuitOpen" => Some(BlockReason::CircuitOpen),
            "IsolationExceeded" => Some(BlockReason::IsolationExceeded),
            "SystemOverload" => Some(BlockReason::SystemOverload),
            _ => None,
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of an admission evaluation. Decisions are values; consumers
/// copy them, they never share or mutate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Let the traffic through
    Allow,
    /// Reject the traffic for the given reason
    Block(BlockReason),
}

impl Decision {
    /// Whether this decision rejects the traffic.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Block(_))
    }

    /// The block reason, if any.
    pub fn reason(&self) -> Option<BlockReason> {
        match self {
            Decision::Allow => None,
            Decision::Block(reason) => Some(*reason),
        }
    }
}

/// The process-wide admission engine.
///
/// Owned for the lifetime of the process; rule state only changes through
/// whole-set reloads, statistics entries are created lazily and kept.
pub struct Engine {
    rules: RuleRegistry,
    stats: StatsRegistry,
    hotspots: HotspotRegistry,
    system: SystemStats,
    breakers: DashMap<String, Arc<Breaker>>,
}

impl Engine {
    /// Create an engine with the given configuration and no rules.
    pub fn new(config: FloodgateConfig) -> Self {
        Self {
            rules: RuleRegistry::new(),
            stats: StatsRegistry::new(config.stats.window_ms, config.stats.buckets),
            hotspots: HotspotRegistry::new(config.hotspot.capacity, config.stats.buckets),
            system: SystemStats::new(config.stats.window_ms, config.stats.buckets),
            breakers: DashMap::new(),
        }
    }

    /// Replace the active rule set in one atomic swap.
    pub fn load_rules(&self, set: RuleSet) {
        self.rules.load(set);
    }

    /// Record one observation from the traffic feed.
    ///
    /// Updates the resource window, the global window, the hotspot window of
    /// `param` when a hotspot rule exists, and, while the resource's breaker
    /// is half-open, consumes the observation as a probe.
    pub fn record(&self, resource: &str, param: Option<&str>, outcome: Outcome, latency_ms: u64) {
        let rules = self.rules.snapshot();
        let resource_rules = rules.resource(resource);

        // An observation is slow when it exceeds the strictest latency bound
        // configured by a slow-ratio breaker rule.
        let slow_bound = resource_rules.and_then(|r| {
            r.breakers
                .iter()
                .filter_map(|b| match b.strategy {
                    BreakerStrategy::SlowRequestRatio { max_allowed_rt_ms } => {
                        Some(max_allowed_rt_ms)
                    }
                    _ => None,
                })
                .min()
        });
        let slow = slow_bound.is_some_and(|bound| latency_ms > bound);

        self.stats.resource(resource).observe(outcome, latency_ms, slow);
        self.system.observe(outcome, latency_ms);

        if let (Some(param), Some(rule)) =
            (param, resource_rules.and_then(|r| r.hotspots.first()))
        {
            self.hotspots
                .ring(resource, param, rule.duration.as_millis() as u64)
                .observe(outcome, latency_ms, false);
        }

        if let Some(rr) = resource_rules {
            if let Some(first) = rr.breakers.first() {
                if let Some(breaker) = self.breakers.get(resource) {
                    if breaker.state() == CircuitState::HalfOpen {
                        let qualifies = outcome == Outcome::Success && !slow;
                        breaker.record_probe(qualifies, first.probe_num, Instant::now());
                    }
                }
            }
        }
    }

    /// Mark one request in flight for a resource.
    pub fn concurrency_enter(&self, resource: &str) {
        self.stats.resource(resource).enter();
        self.system.enter();
    }

    /// Mark one request finished for a resource. Callers pair this with
    /// `concurrency_enter`, including on abnormal termination.
    pub fn concurrency_exit(&self, resource: &str) {
        self.stats.resource(resource).exit();
        self.system.exit();
    }

    /// Store the latest host-level sample (load, CPU, memory).
    pub fn update_system_sample(&self, sample: SystemSample) {
        self.system.update_sample(sample);
    }

    /// Aggregated view of one resource's window and concurrency.
    pub fn snapshot(&self, resource: &str) -> ResourceSnapshot {
        self.stats.snapshot(resource)
    }

    /// Global statistics and host samples.
    pub fn system(&self) -> &SystemStats {
        &self.system
    }

    /// Circuit state for a resource. A resource whose breaker has never been
    /// exercised reports closed.
    pub fn circuit_state(&self, resource: &str) -> CircuitState {
        self.breakers
            .get(resource)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Get or create the breaker for a resource.
    fn breaker(&self, resource: &str) -> Arc<Breaker> {
        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Breaker::new()))
            .clone()
    }
}
