use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};

use floodgate::bridge::MemoryStore;
use floodgate::config::FloodgateConfig;
use floodgate::engine::Engine;
use floodgate::host::Host;
use floodgate::rules::RuleSet;
use floodgate::stats::Outcome;

/// Demo driver: runs the engine against synthetic connections.
#[derive(Debug, Parser)]
#[command(name = "floodgate", about = "Adaptive traffic admission engine demo driver")]
struct Args {
    /// Path to a YAML rule file
    #[arg(long)]
    rules: Option<String>,

    /// Path to an engine configuration file
    #[arg(long)]
    config: Option<String>,

    /// Resource name to drive traffic against
    #[arg(long, default_value = "demo")]
    resource: String,
}

/// Rules used when no rule file is given.
const DEFAULT_RULES: &str = r#"
- kind: RateLimitStrategy
  resource: demo
  threshold: 5
- kind: CircuitBreakerStrategy
  resource: demo
  strategy:
    type: error_ratio
  threshold: 0.5
  min_request_amount: 10
  retry_timeout_ms: 2000
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    info!("Starting Floodgate Admission Engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => FloodgateConfig::from_file(path)?,
        None => FloodgateConfig::default(),
    };

    let rules = match &args.rules {
        Some(path) => RuleSet::from_file(path)?,
        None => RuleSet::from_yaml(DEFAULT_RULES)?,
    };

    let engine = Arc::new(Engine::new(config.clone()));
    engine.load_rules(rules);
    info!("Engine initialized");

    let store = Arc::new(MemoryStore::new());
    let host = Arc::new(Host::new(engine.clone(), store, &config.session));

    // Synthetic traffic: short-lived connections feeding observations, with
    // the published decision read back the way a data path would.
    let driver = {
        let engine = engine.clone();
        let host = host.clone();
        let resource = args.resource.clone();
        tokio::spawn(async move {
            loop {
                let key = host.connection_start(&resource).await;
                for _ in 0..3 {
                    engine.concurrency_enter(&resource);
                    engine.record(&resource, None, Outcome::Success, 8);
                    engine.concurrency_exit(&resource);

                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let decision = host.on_data(&key).await;
                    info!(resource = %resource, decision = ?decision, "Data event");
                }
                host.connection_end(&key).await;
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
    };

    // Run until told to stop
    shutdown_signal().await;
    driver.abort();

    info!("Floodgate Admission Engine stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
