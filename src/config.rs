//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};

/// Main configuration for the Floodgate engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Statistics window configuration
    #[serde(default)]
    pub stats: StatsConfig,

    /// Hotspot (parameter-keyed) statistics configuration
    #[serde(default)]
    pub hotspot: HotspotConfig,

    /// Per-connection evaluation session configuration
    #[serde(default)]
    pub session: SessionConfig,
}

/// Statistics window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Length of the statistical window in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Number of time buckets the window is divided into
    #[serde(default = "default_buckets")]
    pub buckets: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            buckets: default_buckets(),
        }
    }
}

fn default_window_ms() -> u64 {
    1000
}

fn default_buckets() -> usize {
    10
}

impl StatsConfig {
    /// Duration of a single bucket in milliseconds.
    pub fn bucket_ms(&self) -> u64 {
        self.window_ms / self.buckets as u64
    }
}

/// Hotspot statistics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotspotConfig {
    /// Maximum number of parameter values tracked per resource before
    /// least-recently-used eviction kicks in
    #[serde(default = "default_hotspot_capacity")]
    pub capacity: usize,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            capacity: default_hotspot_capacity(),
        }
    }
}

fn default_hotspot_capacity() -> usize {
    1024
}

/// Per-connection evaluation session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How often the evaluation task recomputes and publishes a decision,
    /// in milliseconds
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: default_publish_interval_ms(),
        }
    }
}

fn default_publish_interval_ms() -> u64 {
    50
}

impl FloodgateConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: FloodgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::FloodgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate window geometry.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.stats.buckets == 0 {
            return Err(crate::error::FloodgateError::Config(
                "stats.buckets must be greater than zero".to_string(),
            ));
        }
        if self.stats.window_ms < self.stats.buckets as u64 {
            return Err(crate::error::FloodgateError::Config(
                "stats.window_ms must be at least one millisecond per bucket".to_string(),
            ));
        }
        Ok(())
    }
}
