//! Compiled rule types.
//!
//! The rule kind set is closed: dispatch is an exhaustive match over the
//! five variants, never open-ended.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::stats::SystemStats;

/// A compiled rule, one variant per protection strategy.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Resource-level rate limiting
    RateLimit(RateLimitRule),
    /// Parameter-keyed ("hotspot") limiting
    Hotspot(HotspotRule),
    /// Circuit breaking
    Breaker(BreakerRule),
    /// Concurrency isolation
    Isolation(IsolationRule),
    /// System-level adaptive overload protection
    System(SystemRule),
}

impl Rule {
    /// The resource this rule is scoped to; system rules are global.
    pub fn resource(&self) -> Option<&str> {
        match self {
            Rule::RateLimit(r) => Some(&r.resource),
            Rule::Hotspot(r) => Some(&r.resource),
            Rule::Breaker(r) => Some(&r.resource),
            Rule::Isolation(r) => Some(&r.resource),
            Rule::System(_) => None,
        }
    }
}

/// Compiled rate limit rule.
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    /// The resource the rule applies to
    pub resource: String,
    /// Allowed pass throughput in requests per second
    pub threshold: f64,
    /// How the effective threshold is derived
    pub strategy: RateStrategy,
    /// What happens to traffic over the threshold
    pub control: ControlBehavior,
}

/// Threshold derivation strategy for a rate limit rule.
#[derive(Debug, Clone)]
pub enum RateStrategy {
    /// The configured threshold, as-is
    Direct,
    /// Linear ramp from `threshold / cold_factor` up to `threshold` over
    /// `period`, measured from rule load
    WarmUp {
        period: Duration,
        cold_factor: f64,
        started_at: Instant,
    },
    /// Threshold interpolated between two bounds as memory usage moves
    /// between the water marks
    MemoryAdaptive {
        low_usage_threshold: f64,
        high_usage_threshold: f64,
        low_water_mark_bytes: u64,
        high_water_mark_bytes: u64,
    },
}

/// Behavior for traffic over the effective threshold.
#[derive(Debug, Clone)]
pub enum ControlBehavior {
    /// Block immediately
    Reject,
    /// Queue behind a pacer up to `max_queueing_time`, then block
    Throttle {
        max_queueing_time: Duration,
        pacer: Arc<Pacer>,
    },
}

/// Paces admissions to a fixed interval.
///
/// Shared by every registry snapshot holding the owning rule, so pacing
/// state survives concurrent evaluation.
#[derive(Debug)]
pub struct Pacer {
    next_ns: AtomicU64,
    anchor: Instant,
}

impl Pacer {
    pub(super) fn new() -> Self {
        Self {
            next_ns: AtomicU64::new(0),
            anchor: Instant::now(),
        }
    }

    /// Claim the next admission slot for a pacing rate of `threshold`
    /// admissions per second. Returns the wait until the claimed slot, or
    /// `None` when that wait would exceed `max_wait`.
    pub fn reserve(&self, threshold: f64, max_wait: Duration) -> Option<Duration> {
        if threshold <= 0.0 {
            return None;
        }
        let interval_ns = (1_000_000_000f64 / threshold) as u64;
        let max_wait_ns = max_wait.as_nanos() as u64;
        let now_ns = self.anchor.elapsed().as_nanos() as u64;

        loop {
            let next = self.next_ns.load(Ordering::Acquire);
            let scheduled = next.max(now_ns);
            if scheduled - now_ns > max_wait_ns {
                return None;
            }
            if self
                .next_ns
                .compare_exchange(next, scheduled + interval_ns, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Some(Duration::from_nanos(scheduled - now_ns));
            }
        }
    }
}

impl RateLimitRule {
    /// The threshold in force right now, after warm-up or memory adaptation.
    pub fn effective_threshold(&self, system: &SystemStats) -> f64 {
        match &self.strategy {
            RateStrategy::Direct => self.threshold,
            RateStrategy::WarmUp {
                period,
                cold_factor,
                started_at,
            } => {
                let elapsed = started_at.elapsed();
                if elapsed >= *period || period.is_zero() {
                    return self.threshold;
                }
                let cold = self.threshold / cold_factor;
                cold + (self.threshold - cold) * (elapsed.as_secs_f64() / period.as_secs_f64())
            }
            RateStrategy::MemoryAdaptive {
                low_usage_threshold,
                high_usage_threshold,
                low_water_mark_bytes,
                high_water_mark_bytes,
            } => {
                let used = system.memory_used_bytes();
                if used <= *low_water_mark_bytes {
                    *low_usage_threshold
                } else if used >= *high_water_mark_bytes {
                    *high_usage_threshold
                } else {
                    let span = (high_water_mark_bytes - low_water_mark_bytes) as f64;
                    let ratio = (used - low_water_mark_bytes) as f64 / span;
                    low_usage_threshold + (high_usage_threshold - low_usage_threshold) * ratio
                }
            }
        }
    }
}

/// Compiled hotspot rule.
#[derive(Debug, Clone)]
pub struct HotspotRule {
    /// The resource the rule applies to
    pub resource: String,
    /// Allowed throughput per parameter value, requests per second
    pub threshold: f64,
    /// Statistical window for each parameter value
    pub duration: Duration,
    /// Extra admissions tolerated above the per-window budget
    pub burst_count: u64,
    /// Threshold overrides for enumerated parameter values
    pub specific_items: HashMap<String, f64>,
}

impl HotspotRule {
    /// Per-window admission budget for one parameter value.
    pub fn budget(&self, param: &str) -> f64 {
        let threshold = self
            .specific_items
            .get(param)
            .copied()
            .unwrap_or(self.threshold);
        threshold * self.duration.as_secs_f64() + self.burst_count as f64
    }
}

/// Compiled circuit breaker rule.
#[derive(Debug, Clone)]
pub struct BreakerRule {
    /// The resource the rule applies to
    pub resource: String,
    /// What the breaker watches
    pub strategy: BreakerStrategy,
    /// Trip threshold: a ratio in [0, 1] for the ratio strategies, a count
    /// for the error-count strategy
    pub threshold: f64,
    /// Minimum requests in the window before the predicate may trip
    pub min_request_amount: u64,
    /// How long the breaker stays open before probing
    pub retry_timeout: Duration,
    /// Consecutive successful probes required to close
    pub probe_num: u32,
}

/// Trip strategy for a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStrategy {
    /// Ratio of observations slower than `max_allowed_rt_ms`
    SlowRequestRatio { max_allowed_rt_ms: u64 },
    /// Ratio of failed observations
    ErrorRatio,
    /// Count of failed observations
    ErrorCount,
}

/// Compiled concurrency isolation rule.
#[derive(Debug, Clone)]
pub struct IsolationRule {
    /// The resource the rule applies to
    pub resource: String,
    /// Maximum in-flight requests
    pub threshold: u64,
}

/// Compiled system-level adaptive rule. Global, not resource-scoped.
#[derive(Debug, Clone)]
pub struct SystemRule {
    /// Which system metric is watched
    pub metric: SystemMetric,
    /// Metric value above which the rule triggers
    pub trigger_count: f64,
    /// Adaptive gating applied on top of the threshold comparison
    pub strategy: AdaptiveStrategy,
}

/// System metric watched by an adaptive rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMetric {
    Load,
    AvgRt,
    Concurrency,
    InboundQps,
    CpuUsage,
}

/// Adaptive gating for a system rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveStrategy {
    /// Plain threshold comparison
    #[default]
    None,
    /// Only trigger while inbound throughput also exceeds the estimated
    /// sustainable maximum
    Bbr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::SystemSample;

    fn direct_rule(threshold: f64, strategy: RateStrategy) -> RateLimitRule {
        RateLimitRule {
            resource: "api".to_string(),
            threshold,
            strategy,
            control: ControlBehavior::Reject,
        }
    }

    #[test]
    fn test_warm_up_threshold_ramp() {
        let system = SystemStats::new(1000, 10);

        // Freshly started ramp: effectively threshold / cold_factor.
        let cold = direct_rule(
            90.0,
            RateStrategy::WarmUp {
                period: Duration::from_secs(10),
                cold_factor: 3.0,
                started_at: Instant::now(),
            },
        );
        let effective = cold.effective_threshold(&system);
        assert!(effective >= 30.0 && effective < 32.0, "got {}", effective);

        // A ramp that has fully elapsed uses the configured threshold.
        let warmed = direct_rule(
            90.0,
            RateStrategy::WarmUp {
                period: Duration::from_secs(10),
                cold_factor: 3.0,
                started_at: Instant::now() - Duration::from_secs(11),
            },
        );
        assert_eq!(warmed.effective_threshold(&system), 90.0);
    }

    #[test]
    fn test_memory_adaptive_interpolation() {
        let system = SystemStats::new(1000, 10);
        let rule = direct_rule(
            100.0,
            RateStrategy::MemoryAdaptive {
                low_usage_threshold: 100.0,
                high_usage_threshold: 20.0,
                low_water_mark_bytes: 1000,
                high_water_mark_bytes: 2000,
            },
        );

        // Below the low water mark: full threshold.
        system.update_sample(SystemSample {
            memory_used_bytes: 500,
            ..Default::default()
        });
        assert_eq!(rule.effective_threshold(&system), 100.0);

        // Midway between the marks: halfway between the bounds.
        system.update_sample(SystemSample {
            memory_used_bytes: 1500,
            ..Default::default()
        });
        assert_eq!(rule.effective_threshold(&system), 60.0);

        // Above the high water mark: clamped to the pressured threshold.
        system.update_sample(SystemSample {
            memory_used_bytes: 3000,
            ..Default::default()
        });
        assert_eq!(rule.effective_threshold(&system), 20.0);
    }

    #[test]
    fn test_hotspot_budget() {
        let mut specific_items = HashMap::new();
        specific_items.insert("vip".to_string(), 1000.0);
        let rule = HotspotRule {
            resource: "search".to_string(),
            threshold: 10.0,
            duration: Duration::from_secs(2),
            burst_count: 3,
            specific_items,
        };

        assert_eq!(rule.budget("vip"), 2003.0);
        assert_eq!(rule.budget("anyone-else"), 23.0);
    }

    #[test]
    fn test_pacer_spaces_admissions() {
        let pacer = Pacer::new();
        let max_wait = Duration::from_millis(500);

        // 10/s pacing: slots 100ms apart. The first claim is immediate.
        let first = pacer.reserve(10.0, max_wait).unwrap();
        assert!(first < Duration::from_millis(5));

        // Subsequent claims queue behind the schedule.
        let second = pacer.reserve(10.0, max_wait).unwrap();
        assert!(second >= Duration::from_millis(90), "got {:?}", second);

        let third = pacer.reserve(10.0, max_wait).unwrap();
        assert!(third >= Duration::from_millis(190), "got {:?}", third);
    }

    #[test]
    fn test_pacer_rejects_over_max_wait() {
        let pacer = Pacer::new();
        let max_wait = Duration::from_millis(150);

        // Claim enough slots to push the schedule past the queueing bound.
        assert!(pacer.reserve(10.0, max_wait).is_some());
        assert!(pacer.reserve(10.0, max_wait).is_some());
        assert!(pacer.reserve(10.0, max_wait).is_none());
    }

    #[test]
    fn test_zero_threshold_never_admits() {
        let pacer = Pacer::new();
        assert!(pacer.reserve(0.0, Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_rule_scope() {
        let scoped = Rule::Isolation(IsolationRule {
            resource: "api".to_string(),
            threshold: 4,
        });
        assert_eq!(scoped.resource(), Some("api"));

        let global = Rule::System(SystemRule {
            metric: SystemMetric::Load,
            trigger_count: 4.0,
            strategy: AdaptiveStrategy::None,
        });
        assert_eq!(global.resource(), None);
    }
}
