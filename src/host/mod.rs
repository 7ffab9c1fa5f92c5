//! Host callback surface and per-connection evaluation sessions.
//!
//! The embedding host drives three lifecycle calls: `connection_start`
//! allocates a bridge key and spawns the connection's evaluation task,
//! `on_data` reads the latest published decision on each data event, and
//! `connection_end` signals cooperative shutdown through the bridge. The
//! two scheduling domains never share mutable memory; everything crosses
//! through the decision store's compare-and-swap protocol.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::{DecisionStore, StoreError};
use crate::config::SessionConfig;
use crate::engine::{BlockReason, Decision, Engine};

/// Compare-and-swap attempts before a publish is abandoned for this
/// iteration; the next loop turn publishes a fresh decision anyway.
const MAX_PUT_ATTEMPTS: u32 = 8;

/// JSON payload stored in the bridge for each decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecisionPayload {
    block: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl From<Decision> for DecisionPayload {
    fn from(decision: Decision) -> Self {
        Self {
            block: decision.is_blocked(),
            reason: decision.reason().map(|r| r.as_str().to_string()),
        }
    }
}

impl DecisionPayload {
    /// Decode back into a decision. A block flag without a recognizable
    /// reason fails open.
    fn decision(&self) -> Decision {
        if self.block {
            if let Some(reason) = self.reason.as_deref().and_then(BlockReason::parse) {
                return Decision::Block(reason);
            }
        }
        Decision::Allow
    }
}

/// The host-facing surface of the engine.
pub struct Host {
    engine: Arc<Engine>,
    store: Arc<dyn DecisionStore>,
    sessions: DashMap<String, JoinHandle<()>>,
    publish_interval: Duration,
}

impl Host {
    /// Create a host surface over an engine and a decision store.
    pub fn new(engine: Arc<Engine>, store: Arc<dyn DecisionStore>, config: &SessionConfig) -> Self {
        Self {
            engine,
            store,
            sessions: DashMap::new(),
            publish_interval: Duration::from_millis(config.publish_interval_ms),
        }
    }

    /// Begin a connection against `resource`.
    ///
    /// Seeds the connection's bridge entry, spawns the evaluation task, and
    /// returns the bridge key the host must present on later callbacks.
    pub async fn connection_start(&self, resource: &str) -> String {
        let key = format!("conn/{}", Uuid::new_v4());
        publish(self.store.as_ref(), &key, Decision::Allow).await;

        info!(resource, key = %key, "Connection started");

        let engine = self.engine.clone();
        let store = self.store.clone();
        let task_resource = resource.to_string();
        let task_key = key.clone();
        let interval = self.publish_interval;
        let handle = tokio::spawn(async move {
            run_session(engine, store, task_resource, task_key, interval).await;
        });
        self.sessions.insert(key.clone(), handle);

        key
    }

    /// Read the current decision for a connection.
    ///
    /// An absent key means no decision has been published yet; an
    /// undecodable payload is treated the same way. Both default to Allow.
    pub async fn on_data(&self, key: &str) -> Decision {
        match self.store.get(key).await {
            Some(entry) => serde_json::from_slice::<DecisionPayload>(&entry.value)
                .map(|payload| payload.decision())
                .unwrap_or(Decision::Allow),
            None => Decision::Allow,
        }
    }

    /// End a connection.
    ///
    /// Writes the closed marker the evaluation task polls, then waits for
    /// the task to finish its cooperative shutdown and bridge cleanup.
    pub async fn connection_end(&self, key: &str) {
        let marker = closed_key(key);
        for _ in 0..MAX_PUT_ATTEMPTS {
            let expected = self
                .store
                .get(&marker)
                .await
                .map(|entry| entry.version)
                .unwrap_or(0);
            match self.store.put(&marker, vec![1], expected).await {
                Ok(_) => break,
                Err(StoreError::Conflict { .. }) => continue,
            }
        }

        match self.sessions.remove(key) {
            Some((_, handle)) => {
                if handle.await.is_err() {
                    warn!(key, "Evaluation session ended abnormally");
                }
            }
            None => {
                warn!(key, "No evaluation session for connection");
                self.store.remove(&marker).await;
            }
        }

        info!(key, "Connection ended");
    }

    /// Number of live evaluation sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

fn closed_key(key: &str) -> String {
    format!("{}/closed", key)
}

/// The per-connection evaluation loop.
///
/// Runs until the closed marker appears, re-evaluating and publishing on
/// every turn. Cancellation is cooperative: the task owns the cleanup of
/// both bridge entries on its way out.
async fn run_session(
    engine: Arc<Engine>,
    store: Arc<dyn DecisionStore>,
    resource: String,
    key: String,
    interval: Duration,
) {
    debug!(resource = %resource, key = %key, "Evaluation session started");

    loop {
        if store.get(&closed_key(&key)).await.is_some() {
            break;
        }
        let decision = engine.evaluate(&resource, None).await;
        publish(store.as_ref(), &key, decision).await;
        tokio::time::sleep(interval).await;
    }

    store.remove(&key).await;
    store.remove(&closed_key(&key)).await;
    debug!(key = %key, "Evaluation session stopped");
}

/// Publish a decision under `key` with caller-driven conflict retry: each
/// attempt re-reads the current version and presents it.
async fn publish(store: &dyn DecisionStore, key: &str, decision: Decision) {
    let payload = DecisionPayload::from(decision);
    let value = match serde_json::to_vec(&payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "Failed to encode decision payload");
            return;
        }
    };

    for _ in 0..MAX_PUT_ATTEMPTS {
        let expected = store.get(key).await.map(|entry| entry.version).unwrap_or(0);
        match store.put(key, value.clone(), expected).await {
            Ok(_) => return,
            Err(StoreError::Conflict { .. }) => continue,
        }
    }

    warn!(key, "Abandoning decision publish after repeated conflicts");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MemoryStore;
    use crate::config::FloodgateConfig;
    use crate::rules::RuleSet;

    fn test_host(rules: &str) -> (Host, Arc<MemoryStore>) {
        let engine = Arc::new(Engine::new(FloodgateConfig::default()));
        if !rules.is_empty() {
            engine.load_rules(RuleSet::from_yaml(rules).unwrap());
        }
        let store = Arc::new(MemoryStore::new());
        let config = SessionConfig {
            publish_interval_ms: 10,
        };
        (Host::new(engine, store.clone(), &config), store)
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let (host, store) = test_host("");

        let key = host.connection_start("api").await;
        assert_eq!(host.session_count(), 1);
        assert_eq!(host.on_data(&key).await, Decision::Allow);

        host.connection_end(&key).await;
        assert_eq!(host.session_count(), 0);
        // The session removed both its entries on the way out.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_decision_reaches_data_path() {
        // A zero-concurrency isolation rule blocks every evaluation.
        let (host, _store) = test_host(
            r#"
- kind: ConcurrencyLimitStrategy
  resource: api
  threshold: 0
"#,
        );

        let key = host.connection_start("api").await;

        // Give the evaluation task a couple of publish turns.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            host.on_data(&key).await,
            Decision::Block(BlockReason::IsolationExceeded)
        );

        host.connection_end(&key).await;
    }

    #[tokio::test]
    async fn test_decision_tracks_rule_state() {
        let (host, _store) = test_host(
            r#"
- kind: ConcurrencyLimitStrategy
  resource: api
  threshold: 2
"#,
        );

        let key = host.connection_start("api").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(host.on_data(&key).await, Decision::Allow);

        // Saturate the resource; the next published decision flips.
        host.engine.concurrency_enter("api");
        host.engine.concurrency_enter("api");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            host.on_data(&key).await,
            Decision::Block(BlockReason::IsolationExceeded)
        );

        // Releasing one slot flips it back.
        host.engine.concurrency_exit("api");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(host.on_data(&key).await, Decision::Allow);

        host.connection_end(&key).await;
    }

    #[tokio::test]
    async fn test_on_data_unknown_key_fails_open() {
        let (host, _store) = test_host("");
        assert_eq!(host.on_data("conn/never-started").await, Decision::Allow);
    }

    #[tokio::test]
    async fn test_on_data_undecodable_payload_fails_open() {
        let (host, store) = test_host("");

        store.put("conn/garbled", b"not json".to_vec(), 0).await.unwrap();
        assert_eq!(host.on_data("conn/garbled").await, Decision::Allow);
    }

    #[tokio::test]
    async fn test_payload_roundtrip() {
        let payload = DecisionPayload::from(Decision::Block(BlockReason::CircuitOpen));
        let bytes = serde_json::to_vec(&payload).unwrap();
        let parsed: DecisionPayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.decision(), Decision::Block(BlockReason::CircuitOpen));

        let allow = DecisionPayload::from(Decision::Allow);
        let bytes = serde_json::to_vec(&allow).unwrap();
        let parsed: DecisionPayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.decision(), Decision::Allow);
    }

    #[tokio::test]
    async fn test_end_without_session_cleans_marker() {
        let (host, store) = test_host("");

        host.connection_end("conn/ghost").await;
        assert!(store.is_empty());
    }
}
