use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Connection pooling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Idle timeout in seconds; zero disables idle reuse so every release
    /// tears the connection down
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout: u64,

    /// Maximum pool size, doubling as the backpressure threshold on queued
    /// waiters; zero disables pooling entirely
    #[serde(default = "default_concurrency_max")]
    pub pool_concurrency_max: usize,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_pool_timeout() -> u64 {
    50
}

fn default_concurrency_max() -> usize {
    10
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            pool_timeout: default_pool_timeout(),
            pool_concurrency_max: default_concurrency_max(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection pool settings
    #[serde(default)]
    pub pool: PoolSettings,
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config = serde_yaml::from_str(&content)
        .context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables
///
/// Recognized variables (all optional):
/// - RELAYPOOL_CONNECT_TIMEOUT (seconds)
/// - RELAYPOOL_POOL_TIMEOUT (seconds; zero disables idle reuse)
/// - RELAYPOOL_CONCURRENCY_MAX (zero disables pooling)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let mut config = Config::default();

    if let Ok(timeout) = std::env::var("RELAYPOOL_CONNECT_TIMEOUT") {
        if let Ok(val) = timeout.parse() {
            config.pool.connect_timeout = val;
        }
    }

    if let Ok(timeout) = std::env::var("RELAYPOOL_POOL_TIMEOUT") {
        if let Ok(val) = timeout.parse() {
            config.pool.pool_timeout = val;
        }
    }

    if let Ok(max) = std::env::var("RELAYPOOL_CONCURRENCY_MAX") {
        if let Ok(val) = max.parse() {
            config.pool.pool_concurrency_max = val;
        }
    }

    Ok(config)
}

/// Load configuration from file or environment
///
/// Tries the YAML file when a path is given, otherwise falls back to
/// environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        load_from_yaml(path)
    } else {
        load_from_env()
    }
}
