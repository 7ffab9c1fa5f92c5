//! Rule evaluation in fixed priority order.

use std::time::Instant;

use tracing::{debug, trace};

use crate::rules::{AdaptiveStrategy, BreakerStrategy, ControlBehavior, SystemMetric, SystemRule};
use crate::stats::SystemStats;

use super::{BlockReason, Decision, Engine};

impl Engine {
    /// Evaluate every applicable rule for `resource` and yield a decision.
    ///
    /// Priority order is fixed: system rules first (they can reject
    /// independent of resource-local state), then concurrency isolation,
    /// circuit breaking, rate limits, and hotspot limits. The first Block
    /// wins; Allow requires every applicable rule to allow. A resource with
    /// no rules of a given kind passes that stage; admission control fails
    /// open on configuration gaps.
    pub async fn evaluate(&self, resource: &str, param: Option<&str>) -> Decision {
        let rules = self.rules.snapshot();

        if system_exceeded(rules.system(), &self.system) {
            return self.block(resource, BlockReason::SystemOverload);
        }

        let Some(resource_rules) = rules.resource(resource) else {
            return Decision::Allow;
        };

        let stats = self.stats.resource(resource);

        let in_flight = stats.concurrency().max(0) as u64;
        if resource_rules
            .isolations
            .iter()
            .any(|rule| in_flight >= rule.threshold)
        {
            return self.block(resource, BlockReason::IsolationExceeded);
        }

        if let Some(first) = resource_rules.breakers.first() {
            let snap = stats.snapshot();
            let tripped = resource_rules.breakers.iter().any(|rule| {
                if snap.total() < rule.min_request_amount {
                    return false;
                }
                match rule.strategy {
                    BreakerStrategy::SlowRequestRatio { .. } => snap.slow_ratio() >= rule.threshold,
                    BreakerStrategy::ErrorRatio => snap.error_ratio() >= rule.threshold,
                    BreakerStrategy::ErrorCount => snap.error as f64 >= rule.threshold,
                }
            });

            let breaker = self.breaker(resource);
            if !breaker.check(tripped, first.retry_timeout, Instant::now()) {
                return self.block(resource, BlockReason::CircuitOpen);
            }
        }

        if !resource_rules.rate_limits.is_empty() {
            let snap = stats.snapshot();
            for rule in &resource_rules.rate_limits {
                let effective = rule.effective_threshold(&self.system);
                if snap.qps() <= effective {
                    continue;
                }
                match &rule.control {
                    ControlBehavior::Reject => {
                        return self.block(resource, BlockReason::RateLimited);
                    }
                    ControlBehavior::Throttle {
                        max_queueing_time,
                        pacer,
                    } => match pacer.reserve(effective, *max_queueing_time) {
                        Some(wait) => {
                            if !wait.is_zero() {
                                trace!(
                                    resource,
                                    wait_ms = wait.as_millis() as u64,
                                    "Throttling admission"
                                );
                                tokio::time::sleep(wait).await;
                            }
                        }
                        None => return self.block(resource, BlockReason::RateLimited),
                    },
                }
            }
        }

        if let Some(param) = param {
            for rule in &resource_rules.hotspots {
                let ring =
                    self.hotspots
                        .ring(resource, param, rule.duration.as_millis() as u64);
                if ring.snapshot().total() as f64 >= rule.budget(param) {
                    return self.block(resource, BlockReason::Hotspot);
                }
            }
        }

        trace!(resource, "Admission allowed");
        Decision::Allow
    }

    fn block(&self, resource: &str, reason: BlockReason) -> Decision {
        self.stats.resource(resource).add_block();
        debug!(resource, reason = %reason, "Admission blocked");
        Decision::Block(reason)
    }
}

/// Whether any system rule rejects right now.
fn system_exceeded(rules: &[SystemRule], system: &SystemStats) -> bool {
    rules.iter().any(|rule| {
        let current = match rule.metric {
            SystemMetric::Load => system.load_avg(),
            SystemMetric::AvgRt => system.snapshot().avg_rt(),
            SystemMetric::Concurrency => system.concurrency() as f64,
            SystemMetric::InboundQps => system.snapshot().qps(),
            SystemMetric::CpuUsage => system.cpu_usage(),
        };
        if current <= rule.trigger_count {
            return false;
        }
        match rule.strategy {
            AdaptiveStrategy::None => true,
            // Only reject while demand also exceeds the throughput the
            // system recently sustained over a full bucket.
            AdaptiveStrategy::Bbr => system.snapshot().qps() > system.sustainable_qps(),
        }
    })
}
