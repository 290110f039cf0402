//! Integration tests for the config crate

use handoff_config::{
    validate_config, AppConfig, ConfigLoader, Environment, LogFormat, StoreBackend,
};
use std::io::Write;
use std::path::{Path, PathBuf};

fn shipped(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../config")
        .join(name)
}

#[test]
fn test_load_production_config() {
    let config = ConfigLoader::from_file(&shipped("production.toml"))
        .expect("Failed to load production config");

    assert_eq!(config.service.environment, Environment::Production);
    assert_eq!(config.service.log_format, LogFormat::Json);
    assert_eq!(config.store.backend, StoreBackend::Sqlite);
    assert!(validate_config(&config).is_ok());
}

#[test]
fn test_load_local_config() {
    let config =
        ConfigLoader::from_file(&shipped("local.toml")).expect("Failed to load local config");

    assert_eq!(config.service.environment, Environment::Local);
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.auto_fail.poll_interval_secs, 5);
    // Not set in the file
    assert_eq!(config.lifecycle.window_closes_after_secs, 600);
    assert!(validate_config(&config).is_ok());
}

#[test]
fn test_env_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[auto_fail]\npoll_interval_secs = 30\nbatch_size = 100").unwrap();

    // Unique prefix so parallel tests do not see each other's variables
    std::env::set_var("HANDOFF_IT_ENV_AUTO_FAIL__POLL_INTERVAL_SECS", "12");
    std::env::set_var("HANDOFF_IT_ENV_NOTIFICATIONS__ENABLED", "false");

    let config = ConfigLoader::from_file_with_env(file.path(), "HANDOFF_IT_ENV").unwrap();
    assert_eq!(config.auto_fail.poll_interval_secs, 12);
    assert_eq!(config.auto_fail.batch_size, 100);
    assert!(!config.notifications.enabled);

    std::env::remove_var("HANDOFF_IT_ENV_AUTO_FAIL__POLL_INTERVAL_SECS");
    std::env::remove_var("HANDOFF_IT_ENV_NOTIFICATIONS__ENABLED");
}

#[test]
fn test_env_only_falls_back_to_defaults() {
    let config = ConfigLoader::from_env_with_prefix("HANDOFF_IT_UNSET").unwrap();
    assert_eq!(config, AppConfig::default());
}

#[test]
fn test_missing_file_is_a_load_error() {
    let result = ConfigLoader::from_file_with_env(Path::new("/nonexistent/handoff.toml"), "X");
    assert!(result.is_err());
}

#[test]
fn test_config_validation_invalid_log_level() {
    let mut config = AppConfig::default();
    config.service.log_level = "verbose".to_string();

    let result = validate_config(&config);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("log_level"));
}

#[test]
fn test_config_builder() {
    let config = ConfigLoader::builder()
        .set_default("lifecycle.min_lead_time_secs", "1200")
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(config.lifecycle.min_lead_time_secs, 1200);
}

#[test]
fn test_yaml_format() {
    let yaml = r#"
service:
  environment: staging
store:
  backend: sqlite
  sqlite_path: /tmp/handoff.db
"#;

    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let config = ConfigLoader::from_file(file.path()).unwrap();
    assert_eq!(config.service.environment, Environment::Staging);
    assert_eq!(config.store.sqlite_path, "/tmp/handoff.db");
}

#[test]
fn test_json_format() {
    let json = r#"{ "lifecycle": { "window_opens_before_secs": 120 } }"#;

    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let config = ConfigLoader::from_file(file.path()).unwrap();
    assert_eq!(config.lifecycle.window_opens_before_secs, 120);
}

#[test]
fn test_default_values() {
    let config = AppConfig::default();
    assert_eq!(config.service.log_level, "info");
    assert_eq!(config.notifications.timeout_ms, 2000);
    assert_eq!(config.retry.max_attempts, 5);
    assert!(config.auto_fail.enabled);
}
