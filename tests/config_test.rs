use std::env;
use std::fs;
use tempfile::TempDir;

/// Test loading configuration from YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
pool:
  connect_timeout: 15
  pool_timeout: 120
  pool_concurrency_max: 25
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = relaypool::config::load_from_yaml(&config_path).unwrap();

    assert_eq!(config.pool.connect_timeout, 15);
    assert_eq!(config.pool.pool_timeout, 120);
    assert_eq!(config.pool.pool_concurrency_max, 25);
}

/// Test loading configuration from environment variables
#[test]
fn test_load_env_config() {
    // Save original env vars
    let orig_connect = env::var("RELAYPOOL_CONNECT_TIMEOUT").ok();
    let orig_pool = env::var("RELAYPOOL_POOL_TIMEOUT").ok();
    let orig_max = env::var("RELAYPOOL_CONCURRENCY_MAX").ok();

    // Set test env vars
    env::set_var("RELAYPOOL_CONNECT_TIMEOUT", "12");
    env::set_var("RELAYPOOL_POOL_TIMEOUT", "90");
    env::set_var("RELAYPOOL_CONCURRENCY_MAX", "7");

    let config = relaypool::config::load_from_env().unwrap();

    assert_eq!(config.pool.connect_timeout, 12);
    assert_eq!(config.pool.pool_timeout, 90);
    assert_eq!(config.pool.pool_concurrency_max, 7);

    // Restore original env vars
    cleanup_env("RELAYPOOL_CONNECT_TIMEOUT", orig_connect);
    cleanup_env("RELAYPOOL_POOL_TIMEOUT", orig_pool);
    cleanup_env("RELAYPOOL_CONCURRENCY_MAX", orig_max);
}

/// Test default values
#[test]
fn test_default_values() {
    let yaml = r#"
pool:
  pool_concurrency_max: 0
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = relaypool::config::load_from_yaml(&config_path).unwrap();

    // Explicit zero disables pooling
    assert_eq!(config.pool.pool_concurrency_max, 0);

    // Unspecified fields use defaults
    assert_eq!(config.pool.connect_timeout, 30);
    assert_eq!(config.pool.pool_timeout, 50);
}

/// Test that a missing pool section falls back entirely to defaults
#[test]
fn test_missing_section_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, "{}").unwrap();

    let config = relaypool::config::load_from_yaml(&config_path).unwrap();

    assert_eq!(config.pool.connect_timeout, 30);
    assert_eq!(config.pool.pool_timeout, 50);
    assert_eq!(config.pool.pool_concurrency_max, 10);
}

/// Helper function to cleanup environment variables
fn cleanup_env(key: &str, orig_val: Option<String>) {
    match orig_val {
        Some(val) => env::set_var(key, val),
        None => env::remove_var(key),
    }
}
