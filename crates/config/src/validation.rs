//! Configuration validation

use crate::{AppConfig, ConfigError, Result, StoreBackend};
use std::net::SocketAddr;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration, reporting every problem
/// at once
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let mut errors = Vec::new();

    if let Err(e) = validate_log_level(&config.service.log_level) {
        errors.push(e);
    }

    if config.service.metrics_enabled
        && config.service.metrics_addr.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "service.metrics_addr",
            format!(
                "'{}' is not a valid socket address",
                config.service.metrics_addr
            ),
        ));
    }

    if config.store.backend == StoreBackend::Sqlite && config.store.sqlite_path.trim().is_empty() {
        errors.push(ValidationError::new(
            "store.sqlite_path",
            "sqlite backend requires a database path",
        ));
    }

    if config.store.op_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "store.op_timeout_ms",
            "must be greater than 0",
        ));
    }

    if config.lifecycle.window_closes_after_secs == 0 {
        errors.push(ValidationError::new(
            "lifecycle.window_closes_after_secs",
            "attendance window must extend past the meeting time",
        ));
    }

    if config.auto_fail.poll_interval_secs == 0 {
        errors.push(ValidationError::new(
            "auto_fail.poll_interval_secs",
            "must be greater than 0",
        ));
    }

    if config.auto_fail.batch_size == 0 {
        errors.push(ValidationError::new(
            "auto_fail.batch_size",
            "must be greater than 0",
        ));
    }

    if config.notifications.enabled && config.notifications.timeout_ms == 0 {
        errors.push(ValidationError::new(
            "notifications.timeout_ms",
            "must be greater than 0 when notifications are enabled",
        ));
    }

    if config.retry.max_attempts == 0 {
        errors.push(ValidationError::new(
            "retry.max_attempts",
            "must allow at least one attempt",
        ));
    }

    if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
        errors.push(ValidationError::new(
            "retry.initial_backoff_ms",
            "must not exceed retry.max_backoff_ms",
        ));
    }

    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "service.log_level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_and_presets() {
        assert!(validate_config(&AppConfig::default()).is_ok());
        assert!(validate_config(&AppConfig::production()).is_ok());
        assert!(validate_config(&AppConfig::local()).is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = AppConfig::default();
        config.service.log_level = "loud".to_string();

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("service.log_level"));
    }

    #[test]
    fn test_validate_reports_all_errors() {
        let mut config = AppConfig::default();
        config.store.op_timeout_ms = 0;
        config.auto_fail.poll_interval_secs = 0;
        config.retry.initial_backoff_ms = 20_000;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("store.op_timeout_ms"));
        assert!(err.contains("auto_fail.poll_interval_secs"));
        assert!(err.contains("retry.initial_backoff_ms"));
    }

    #[test]
    fn test_validate_metrics_addr_only_when_enabled() {
        let mut config = AppConfig::default();
        config.service.metrics_addr = "not-an-address".to_string();
        assert!(validate_config(&config).is_err());

        config.service.metrics_enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_sqlite_path_required() {
        let mut config = AppConfig::production();
        config.store.sqlite_path = "  ".to_string();

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("store.sqlite_path"));
    }
}
