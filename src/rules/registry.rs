//! Compiled rule sets and the atomically swapped registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{FloodgateError, Result};

use super::spec::compile_document;
use super::types::{BreakerRule, HotspotRule, IsolationRule, RateLimitRule, Rule, SystemRule};

/// All rules scoped to one resource, grouped by kind.
#[derive(Debug, Clone, Default)]
pub struct ResourceRules {
    /// Rate limit rules
    pub rate_limits: Vec<RateLimitRule>,
    /// Hotspot rules
    pub hotspots: Vec<HotspotRule>,
    /// Circuit breaker rules
    pub breakers: Vec<BreakerRule>,
    /// Concurrency isolation rules
    pub isolations: Vec<IsolationRule>,
}

/// A complete compiled rule set: per-resource rules plus global system rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    resources: HashMap<String, ResourceRules>,
    system: Vec<SystemRule>,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one compiled rule.
    pub fn push(&mut self, rule: Rule) {
        match rule {
            Rule::RateLimit(r) => self
                .resources
                .entry(r.resource.clone())
                .or_default()
                .rate_limits
                .push(r),
            Rule::Hotspot(r) => self
                .resources
                .entry(r.resource.clone())
                .or_default()
                .hotspots
                .push(r),
            Rule::Breaker(r) => self
                .resources
                .entry(r.resource.clone())
                .or_default()
                .breakers
                .push(r),
            Rule::Isolation(r) => self
                .resources
                .entry(r.resource.clone())
                .or_default()
                .isolations
                .push(r),
            Rule::System(r) => self.system.push(r),
        }
    }

    /// Load a rule set from a YAML sequence of rule documents.
    ///
    /// A document with an unknown kind, or one that fails validation, is
    /// skipped with a warning; the rest of the sequence still loads.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let docs: Vec<serde_yaml::Value> = serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse rule file: {}", e)))?;

        let mut set = RuleSet::new();
        for (index, doc) in docs.iter().enumerate() {
            let kind = doc
                .get("kind")
                .and_then(|k| k.as_str())
                .unwrap_or("<missing>");

            match compile_document(doc) {
                Ok(Some(rule)) => set.push(rule),
                Ok(None) => {
                    warn!(index, kind, "Skipping rule document with unknown kind");
                }
                Err(e) => {
                    warn!(index, kind, error = %e, "Skipping invalid rule document");
                }
            }
        }

        Ok(set)
    }

    /// Load a rule set from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rule set");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Rules scoped to one resource, if any.
    pub fn resource(&self, name: &str) -> Option<&ResourceRules> {
        self.resources.get(name)
    }

    /// Global system rules.
    pub fn system(&self) -> &[SystemRule] {
        &self.system
    }

    /// Total number of compiled rules in the set.
    pub fn rule_count(&self) -> usize {
        self.system.len()
            + self
                .resources
                .values()
                .map(|r| {
                    r.rate_limits.len() + r.hotspots.len() + r.breakers.len() + r.isolations.len()
                })
                .sum::<usize>()
    }

    /// Whether the set holds no rules at all.
    pub fn is_empty(&self) -> bool {
        self.rule_count() == 0
    }
}

/// The active rule set, shared by every evaluation call.
///
/// Readers take an `Arc` snapshot and evaluate against it without holding
/// any lock; `load` publishes a whole replacement set in a single swap, so a
/// reader never observes a partially-updated mapping.
pub struct RuleRegistry {
    active: RwLock<Arc<RuleSet>>,
}

impl RuleRegistry {
    /// Create a registry with an empty active set.
    pub fn new() -> Self {
        Self {
            active: RwLock::new(Arc::new(RuleSet::new())),
        }
    }

    /// Replace the active rule set.
    pub fn load(&self, set: RuleSet) {
        info!(rules = set.rule_count(), "Loading rule set");
        let mut active = self.active.write();
        *active = Arc::new(set);
    }

    /// Snapshot of the active rule set.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.active.read().clone()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
