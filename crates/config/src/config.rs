//! Core configuration structures for the UnLost handoff service

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub store: StoreConfig,
    pub lifecycle: LifecycleSettings,
    pub auto_fail: AutoFailConfig,
    pub notifications: NotificationConfig,
    pub retry: RetryConfig,
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub environment: Environment,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    pub log_format: LogFormat,

    pub metrics_enabled: bool,

    /// Bind address of the `/metrics` server
    pub metrics_addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Database file, used by the sqlite backend
    pub sqlite_path: String,

    /// Timeout applied to every store call
    pub op_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

/// Timing rules of the coordination state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Earliest meeting time relative to now
    pub min_lead_time_secs: u64,

    /// Attendance window opens this long before `meet_at`
    pub window_opens_before_secs: u64,

    /// Attendance window closes this long after `meet_at`; meetings without
    /// both parties present fail at that point
    pub window_closes_after_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFailConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    /// Records examined per sweep
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl AutoFailConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl NotificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Local,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_addr: "0.0.0.0:9100".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            sqlite_path: "unlost-handoff.db".to_string(),
            op_timeout_ms: 5_000,
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            min_lead_time_secs: 600,
            window_opens_before_secs: 300,
            window_closes_after_secs: 600,
        }
    }
}

impl Default for AutoFailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 30,
            batch_size: 100,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 2_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
        }
    }
}

impl AppConfig {
    /// Settings for a production deployment
    pub fn production() -> Self {
        Self {
            service: ServiceConfig {
                environment: Environment::Production,
                log_format: LogFormat::Json,
                ..ServiceConfig::default()
            },
            store: StoreConfig {
                backend: StoreBackend::Sqlite,
                ..StoreConfig::default()
            },
            ..Self::default()
        }
    }

    /// Settings for local development
    pub fn local() -> Self {
        Self {
            service: ServiceConfig {
                log_level: "debug".to_string(),
                ..ServiceConfig::default()
            },
            auto_fail: AutoFailConfig {
                poll_interval_secs: 5,
                ..AutoFailConfig::default()
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_handoff_rules() {
        let config = AppConfig::default();
        assert_eq!(config.lifecycle.min_lead_time_secs, 10 * 60);
        assert_eq!(config.lifecycle.window_opens_before_secs, 5 * 60);
        assert_eq!(config.lifecycle.window_closes_after_secs, 10 * 60);
        assert_eq!(config.store.op_timeout(), Duration::from_secs(5));
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_presets() {
        let prod = AppConfig::production();
        assert_eq!(prod.service.environment, Environment::Production);
        assert_eq!(prod.service.log_format, LogFormat::Json);
        assert_eq!(prod.store.backend, StoreBackend::Sqlite);

        let local = AppConfig::local();
        assert_eq!(local.service.log_level, "debug");
        assert_eq!(local.auto_fail.poll_interval(), Duration::from_secs(5));
    }
}
