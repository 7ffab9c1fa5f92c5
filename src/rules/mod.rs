//! Rule documents, validation, and the active rule registry.

mod registry;
mod spec;
mod types;

pub use registry::{ResourceRules, RuleRegistry, RuleSet};
pub use spec::{
    compile_document, AdaptiveOverloadSpec, BreakerStrategySpec, CircuitBreakerSpec,
    ConcurrencyLimitSpec, ControlSpec, RateLimitSpec, RateStrategySpec, ThrottlingSpec,
};
pub use types::{
    AdaptiveStrategy, BreakerRule, BreakerStrategy, ControlBehavior, HotspotRule, IsolationRule,
    Pacer, RateLimitRule, RateStrategy, Rule, SystemMetric, SystemRule,
};
