//! Rule documents and their compilation into typed rules.
//!
//! Configuration is an ordered sequence of YAML documents, each tagged with a
//! `kind`. Every kind maps to one compiled rule variant; unknown kinds are
//! skipped with a warning so partial rule sets still load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{FloodgateError, Result};

use super::types::{
    AdaptiveStrategy, BreakerRule, BreakerStrategy, ControlBehavior, HotspotRule, IsolationRule,
    Pacer, RateLimitRule, RateStrategy, Rule, SystemMetric, SystemRule,
};

/// Rate limit rule document (`kind: RateLimitStrategy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub resource: String,
    pub threshold: f64,
    #[serde(default)]
    pub strategy: RateStrategySpec,
    #[serde(default)]
    pub control: ControlSpec,
}

/// Threshold strategy of a rate limit document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateStrategySpec {
    #[default]
    Direct,
    WarmUp {
        warm_up_period_sec: u64,
        #[serde(default = "default_cold_factor")]
        cold_factor: f64,
    },
    MemoryAdaptive {
        low_mem_usage_threshold: f64,
        high_mem_usage_threshold: f64,
        mem_low_water_mark_bytes: u64,
        mem_high_water_mark_bytes: u64,
    },
}

/// Control behavior of a rate limit document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlSpec {
    #[default]
    Reject,
    Throttle {
        #[serde(default = "default_max_queueing_time_ms")]
        max_queueing_time_ms: u64,
    },
}

/// Hotspot rule document (`kind: ThrottlingStrategy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottlingSpec {
    pub resource: String,
    pub threshold: f64,
    #[serde(default = "default_duration_in_sec")]
    pub duration_in_sec: u64,
    #[serde(default)]
    pub burst_count: u64,
    #[serde(default)]
    pub specific_items: HashMap<String, f64>,
}

/// Circuit breaker rule document (`kind: CircuitBreakerStrategy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSpec {
    pub resource: String,
    pub strategy: BreakerStrategySpec,
    pub threshold: f64,
    #[serde(default = "default_min_request_amount")]
    pub min_request_amount: u64,
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,
    #[serde(default = "default_probe_num")]
    pub probe_num: u32,
}

/// Trip strategy of a circuit breaker document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BreakerStrategySpec {
    SlowRequestRatio { max_allowed_rt_ms: u64 },
    ErrorRatio,
    ErrorCount,
}

/// Concurrency isolation rule document (`kind: ConcurrencyLimitStrategy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyLimitSpec {
    pub resource: String,
    pub threshold: f64,
}

/// System rule document (`kind: AdaptiveOverloadProtectionStrategy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveOverloadSpec {
    pub metric: SystemMetric,
    pub trigger_count: f64,
    #[serde(default)]
    pub strategy: AdaptiveStrategy,
}

fn default_cold_factor() -> f64 {
    3.0
}

fn default_max_queueing_time_ms() -> u64 {
    500
}

fn default_duration_in_sec() -> u64 {
    1
}

fn default_min_request_amount() -> u64 {
    5
}

fn default_retry_timeout_ms() -> u64 {
    5000
}

fn default_probe_num() -> u32 {
    3
}

fn check_non_negative(value: f64, field: &str) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(FloodgateError::Validation(format!(
            "{} must be a non-negative number, got {}",
            field, value
        )));
    }
    Ok(())
}

fn check_resource(resource: &str) -> Result<()> {
    if resource.is_empty() {
        return Err(FloodgateError::Validation(
            "resource must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl RateLimitSpec {
    /// Validate and compile into a [`RateLimitRule`].
    pub fn compile(self) -> Result<RateLimitRule> {
        check_resource(&self.resource)?;
        check_non_negative(self.threshold, "threshold")?;

        let strategy = match self.strategy {
            RateStrategySpec::Direct => RateStrategy::Direct,
            RateStrategySpec::WarmUp {
                warm_up_period_sec,
                cold_factor,
            } => {
                if !cold_factor.is_finite() || cold_factor < 1.0 {
                    return Err(FloodgateError::Validation(format!(
                        "cold_factor must be at least 1, got {}",
                        cold_factor
                    )));
                }
                RateStrategy::WarmUp {
                    period: Duration::from_secs(warm_up_period_sec),
                    cold_factor,
                    started_at: Instant::now(),
                }
            }
            RateStrategySpec::MemoryAdaptive {
                low_mem_usage_threshold,
                high_mem_usage_threshold,
                mem_low_water_mark_bytes,
                mem_high_water_mark_bytes,
            } => {
                check_non_negative(low_mem_usage_threshold, "low_mem_usage_threshold")?;
                check_non_negative(high_mem_usage_threshold, "high_mem_usage_threshold")?;
                if mem_low_water_mark_bytes >= mem_high_water_mark_bytes {
                    return Err(FloodgateError::Validation(
                        "mem_low_water_mark_bytes must be below mem_high_water_mark_bytes"
                            .to_string(),
                    ));
                }
                RateStrategy::MemoryAdaptive {
                    low_usage_threshold: low_mem_usage_threshold,
                    high_usage_threshold: high_mem_usage_threshold,
                    low_water_mark_bytes: mem_low_water_mark_bytes,
                    high_water_mark_bytes: mem_high_water_mark_bytes,
                }
            }
        };

        let control = match self.control {
            ControlSpec::Reject => ControlBehavior::Reject,
            ControlSpec::Throttle {
                max_queueing_time_ms,
            } => ControlBehavior::Throttle {
                max_queueing_time: Duration::from_millis(max_queueing_time_ms),
                pacer: Arc::new(Pacer::new()),
            },
        };

        Ok(RateLimitRule {
            resource: self.resource,
            threshold: self.threshold,
            strategy,
            control,
        })
    }
}

impl ThrottlingSpec {
    /// Validate and compile into a [`HotspotRule`].
    pub fn compile(self) -> Result<HotspotRule> {
        check_resource(&self.resource)?;
        check_non_negative(self.threshold, "threshold")?;
        if self.duration_in_sec == 0 {
            return Err(FloodgateError::Validation(
                "duration_in_sec must be greater than zero".to_string(),
            ));
        }
        for (item, threshold) in &self.specific_items {
            check_non_negative(*threshold, &format!("specific_items[{}]", item))?;
        }

        Ok(HotspotRule {
            resource: self.resource,
            threshold: self.threshold,
            duration: Duration::from_secs(self.duration_in_sec),
            burst_count: self.burst_count,
            specific_items: self.specific_items,
        })
    }
}

impl CircuitBreakerSpec {
    /// Validate and compile into a [`BreakerRule`].
    pub fn compile(self) -> Result<BreakerRule> {
        check_resource(&self.resource)?;
        check_non_negative(self.threshold, "threshold")?;

        let strategy = match self.strategy {
            BreakerStrategySpec::SlowRequestRatio { max_allowed_rt_ms } => {
                BreakerStrategy::SlowRequestRatio { max_allowed_rt_ms }
            }
            BreakerStrategySpec::ErrorRatio => BreakerStrategy::ErrorRatio,
            BreakerStrategySpec::ErrorCount => BreakerStrategy::ErrorCount,
        };

        match strategy {
            BreakerStrategy::SlowRequestRatio { .. } | BreakerStrategy::ErrorRatio => {
                if self.threshold > 1.0 {
                    return Err(FloodgateError::Validation(format!(
                        "ratio threshold must be in [0, 1], got {}",
                        self.threshold
                    )));
                }
            }
            BreakerStrategy::ErrorCount => {
                if self.threshold < 1.0 || self.threshold.fract() != 0.0 {
                    return Err(FloodgateError::Validation(format!(
                        "error count threshold must be a positive integer, got {}",
                        self.threshold
                    )));
                }
            }
        }

        if self.probe_num == 0 {
            return Err(FloodgateError::Validation(
                "probe_num must be greater than zero".to_string(),
            ));
        }

        Ok(BreakerRule {
            resource: self.resource,
            strategy,
            threshold: self.threshold,
            min_request_amount: self.min_request_amount,
            retry_timeout: Duration::from_millis(self.retry_timeout_ms),
            probe_num: self.probe_num,
        })
    }
}

impl ConcurrencyLimitSpec {
    /// Validate and compile into an [`IsolationRule`].
    pub fn compile(self) -> Result<IsolationRule> {
        check_resource(&self.resource)?;
        check_non_negative(self.threshold, "threshold")?;

        Ok(IsolationRule {
            resource: self.resource,
            threshold: self.threshold as u64,
        })
    }
}

impl AdaptiveOverloadSpec {
    /// Validate and compile into a [`SystemRule`].
    pub fn compile(self) -> Result<SystemRule> {
        check_non_negative(self.trigger_count, "trigger_count")?;

        Ok(SystemRule {
            metric: self.metric,
            trigger_count: self.trigger_count,
            strategy: self.strategy,
        })
    }
}

/// Compile one rule document. Returns `Ok(None)` for an unknown kind.
pub fn compile_document(doc: &serde_yaml::Value) -> Result<Option<Rule>> {
    let kind = doc
        .get("kind")
        .and_then(|k| k.as_str())
        .ok_or_else(|| FloodgateError::Validation("rule document missing kind".to_string()))?;

    let rule = match kind {
        "RateLimitStrategy" => Some(Rule::RateLimit(from_value::<RateLimitSpec>(doc)?.compile()?)),
        "ThrottlingStrategy" => Some(Rule::Hotspot(from_value::<ThrottlingSpec>(doc)?.compile()?)),
        "ConcurrencyLimitStrategy" => Some(Rule::Isolation(
            from_value::<ConcurrencyLimitSpec>(doc)?.compile()?,
        )),
        "CircuitBreakerStrategy" => Some(Rule::Breaker(
            from_value::<CircuitBreakerSpec>(doc)?.compile()?,
        )),
        "AdaptiveOverloadProtectionStrategy" => Some(Rule::System(
            from_value::<AdaptiveOverloadSpec>(doc)?.compile()?,
        )),
        _ => None,
    };

    Ok(rule)
}

fn from_value<T: DeserializeOwned>(doc: &serde_yaml::Value) -> Result<T> {
    serde_yaml::from_value(doc.clone()).map_err(|e| FloodgateError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> serde_yaml::Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_compile_rate_limit_defaults() {
        let doc = parse(
            r#"
kind: RateLimitStrategy
resource: checkout
threshold: 100
"#,
        );
        let rule = compile_document(&doc).unwrap().unwrap();
        match rule {
            Rule::RateLimit(r) => {
                assert_eq!(r.resource, "checkout");
                assert_eq!(r.threshold, 100.0);
                assert!(matches!(r.strategy, RateStrategy::Direct));
                assert!(matches!(r.control, ControlBehavior::Reject));
            }
            other => panic!("expected rate limit rule, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_warm_up_with_throttle() {
        let doc = parse(
            r#"
kind: RateLimitStrategy
resource: checkout
threshold: 90
strategy:
  type: warm_up
  warm_up_period_sec: 10
control:
  type: throttle
  max_queueing_time_ms: 200
"#,
        );
        let rule = compile_document(&doc).unwrap().unwrap();
        match rule {
            Rule::RateLimit(r) => {
                match r.strategy {
                    RateStrategy::WarmUp {
                        period, cold_factor, ..
                    } => {
                        assert_eq!(period, Duration::from_secs(10));
                        assert_eq!(cold_factor, 3.0);
                    }
                    other => panic!("expected warm_up strategy, got {:?}", other),
                }
                match r.control {
                    ControlBehavior::Throttle {
                        max_queueing_time, ..
                    } => assert_eq!(max_queueing_time, Duration::from_millis(200)),
                    other => panic!("expected throttle control, got {:?}", other),
                }
            }
            other => panic!("expected rate limit rule, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_hotspot() {
        let doc = parse(
            r#"
kind: ThrottlingStrategy
resource: search
threshold: 10
duration_in_sec: 2
burst_count: 3
specific_items:
  vip: 1000
"#,
        );
        let rule = compile_document(&doc).unwrap().unwrap();
        match rule {
            Rule::Hotspot(r) => {
                assert_eq!(r.duration, Duration::from_secs(2));
                assert_eq!(r.burst_count, 3);
                assert_eq!(r.specific_items.get("vip"), Some(&1000.0));
            }
            other => panic!("expected hotspot rule, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_breaker() {
        let doc = parse(
            r#"
kind: CircuitBreakerStrategy
resource: payments
strategy:
  type: error_ratio
threshold: 0.5
min_request_amount: 5
retry_timeout_ms: 100
probe_num: 1
"#,
        );
        let rule = compile_document(&doc).unwrap().unwrap();
        match rule {
            Rule::Breaker(r) => {
                assert_eq!(r.strategy, BreakerStrategy::ErrorRatio);
                assert_eq!(r.min_request_amount, 5);
                assert_eq!(r.retry_timeout, Duration::from_millis(100));
                assert_eq!(r.probe_num, 1);
            }
            other => panic!("expected breaker rule, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_breaker_defaults() {
        let doc = parse(
            r#"
kind: CircuitBreakerStrategy
resource: payments
strategy:
  type: slow_request_ratio
  max_allowed_rt_ms: 200
threshold: 0.8
"#,
        );
        let rule = compile_document(&doc).unwrap().unwrap();
        match rule {
            Rule::Breaker(r) => {
                assert_eq!(
                    r.strategy,
                    BreakerStrategy::SlowRequestRatio {
                        max_allowed_rt_ms: 200
                    }
                );
                assert_eq!(r.min_request_amount, 5);
                assert_eq!(r.retry_timeout, Duration::from_millis(5000));
                assert_eq!(r.probe_num, 3);
            }
            other => panic!("expected breaker rule, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_system_rule() {
        let doc = parse(
            r#"
kind: AdaptiveOverloadProtectionStrategy
metric: inbound_qps
trigger_count: 500
strategy: bbr
"#,
        );
        let rule = compile_document(&doc).unwrap().unwrap();
        match rule {
            Rule::System(r) => {
                assert_eq!(r.metric, SystemMetric::InboundQps);
                assert_eq!(r.strategy, AdaptiveStrategy::Bbr);
            }
            other => panic!("expected system rule, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_skipped() {
        let doc = parse(
            r#"
kind: FancyNewStrategy
resource: api
threshold: 1
"#,
        );
        assert!(compile_document(&doc).unwrap().is_none());
    }

    #[test]
    fn test_missing_kind_is_invalid() {
        let doc = parse(
            r#"
resource: api
threshold: 1
"#,
        );
        assert!(compile_document(&doc).is_err());
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let doc = parse(
            r#"
kind: RateLimitStrategy
resource: api
threshold: -1
"#,
        );
        assert!(compile_document(&doc).is_err());
    }

    #[test]
    fn test_empty_resource_rejected() {
        let doc = parse(
            r#"
kind: ConcurrencyLimitStrategy
resource: ""
threshold: 4
"#,
        );
        assert!(compile_document(&doc).is_err());
    }

    #[test]
    fn test_breaker_ratio_out_of_range_rejected() {
        let doc = parse(
            r#"
kind: CircuitBreakerStrategy
resource: api
strategy:
  type: error_ratio
threshold: 1.5
"#,
        );
        assert!(compile_document(&doc).is_err());
    }

    #[test]
    fn test_breaker_error_count_must_be_integral() {
        let doc = parse(
            r#"
kind: CircuitBreakerStrategy
resource: api
strategy:
  type: error_count
threshold: 2.5
"#,
        );
        assert!(compile_document(&doc).is_err());
    }

    #[test]
    fn test_cold_factor_below_one_rejected() {
        let doc = parse(
            r#"
kind: RateLimitStrategy
resource: api
threshold: 10
strategy:
  type: warm_up
  warm_up_period_sec: 10
  cold_factor: 0.5
"#,
        );
        assert!(compile_document(&doc).is_err());
    }

    #[test]
    fn test_inverted_water_marks_rejected() {
        let doc = parse(
            r#"
kind: RateLimitStrategy
resource: api
threshold: 10
strategy:
  type: memory_adaptive
  low_mem_usage_threshold: 10
  high_mem_usage_threshold: 2
  mem_low_water_mark_bytes: 2000
  mem_high_water_mark_bytes: 1000
"#,
        );
        assert!(compile_document(&doc).is_err());
    }
}
