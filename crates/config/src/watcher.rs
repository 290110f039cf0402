//! Hot-reload configuration watcher

use crate::{validate_config, AppConfig, ConfigError, ConfigLoader, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Watches a config file and publishes each valid revision.
///
/// A revision that fails to parse or validate is logged and dropped; the
/// previous configuration stays current.
pub struct ConfigWatcher {
    current: watch::Sender<AppConfig>,
    path: PathBuf,
    env_prefix: Option<String>,
}

impl ConfigWatcher {
    /// Loads and validates the initial configuration
    pub fn new(path: PathBuf) -> Result<Self> {
        let config = load(&path, None)?;
        let (current, _) = watch::channel(config);
        Ok(Self {
            current,
            path,
            env_prefix: None,
        })
    }

    /// Like `new`, but every load is overlaid with environment variables
    pub fn with_env(path: PathBuf, env_prefix: impl Into<String>) -> Result<Self> {
        let env_prefix = env_prefix.into();
        let config = load(&path, Some(&env_prefix))?;
        let (current, _) = watch::channel(config);
        Ok(Self {
            current,
            path,
            env_prefix: Some(env_prefix),
        })
    }

    pub fn get_config(&self) -> AppConfig {
        self.current.borrow().clone()
    }

    /// Receiver that sees every accepted reload
    pub fn subscribe(&self) -> watch::Receiver<AppConfig> {
        self.current.subscribe()
    }

    /// Re-read the file now; returns whether the new revision was accepted
    pub fn reload(&self) -> bool {
        reload_into(&self.current, &self.path, self.env_prefix.as_deref())
    }

    /// Start watching the config file. The task runs until the returned
    /// handle is aborted.
    pub fn start_watching(&self) -> Result<JoinHandle<()>> {
        let current = self.current.clone();
        let path = self.path.clone();
        let env_prefix = self.env_prefix.clone();

        let (tx, mut rx) = mpsc::channel(100);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Err(e) = tx.blocking_send(event) {
                        error!("Failed to send file event: {}", e);
                    }
                }
                Err(e) => error!("File watch error: {}", e),
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| ConfigError::WatchError(e.to_string()))?;

        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::WatchError(e.to_string()))?;

        info!(path = %path.display(), "Started watching config file");

        let handle = tokio::spawn(async move {
            // Dropping the watcher stops event delivery
            let _watcher = watcher;

            while let Some(event) = rx.recv().await {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    debug!("Config file modified, reloading");
                    reload_into(&current, &path, env_prefix.as_deref());
                }
            }

            debug!("Config watcher task stopped");
        });

        Ok(handle)
    }

    /// Create a watcher and start watching immediately
    pub fn watch(path: PathBuf) -> Result<(Self, JoinHandle<()>)> {
        let watcher = Self::new(path)?;
        let handle = watcher.start_watching()?;
        Ok((watcher, handle))
    }
}

fn load(path: &Path, env_prefix: Option<&str>) -> Result<AppConfig> {
    let config = match env_prefix {
        Some(prefix) => ConfigLoader::from_file_with_env(path, prefix)?,
        None => ConfigLoader::from_file(path)?,
    };
    validate_config(&config)?;
    Ok(config)
}

fn reload_into(current: &watch::Sender<AppConfig>, path: &Path, env_prefix: Option<&str>) -> bool {
    match load(path, env_prefix) {
        Ok(config) => {
            let changed = current.send_if_modified(|old| {
                if *old == config {
                    false
                } else {
                    *old = config;
                    true
                }
            });
            if changed {
                info!("Config reloaded successfully");
            }
            true
        }
        Err(e) => {
            warn!(error = %e, "Failed to reload config, keeping previous revision");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_config_watcher_basic() {
        let file = write_config("[auto_fail]\npoll_interval_secs = 20\n");

        let watcher = ConfigWatcher::new(file.path().to_path_buf()).unwrap();
        assert_eq!(watcher.get_config().auto_fail.poll_interval_secs, 20);
    }

    #[tokio::test]
    async fn test_initial_config_must_validate() {
        let file = write_config("[auto_fail]\npoll_interval_secs = 0\n");
        let result = ConfigWatcher::new(file.path().to_path_buf());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_reload_publishes_to_subscribers() {
        let file = write_config("[auto_fail]\npoll_interval_secs = 20\n");
        let watcher = ConfigWatcher::new(file.path().to_path_buf()).unwrap();
        let mut rx = watcher.subscribe();

        std::fs::write(file.path(), "[auto_fail]\npoll_interval_secs = 45\n").unwrap();
        assert!(watcher.reload());

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().auto_fail.poll_interval_secs, 45);
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_previous_config() {
        let file = write_config("[service]\nlog_level = \"info\"\n");
        let watcher = ConfigWatcher::new(file.path().to_path_buf()).unwrap();
        let rx = watcher.subscribe();

        std::fs::write(file.path(), "invalid toml {{[[]").unwrap();
        assert!(!watcher.reload());

        // Parses, but fails validation
        std::fs::write(file.path(), "[retry]\nmax_attempts = 0\n").unwrap();
        assert!(!watcher.reload());

        assert!(!rx.has_changed().unwrap());
        assert_eq!(watcher.get_config().service.log_level, "info");
        assert_eq!(watcher.get_config().retry.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_unchanged_reload_does_not_notify() {
        let file = write_config("[service]\nlog_level = \"warn\"\n");
        let watcher = ConfigWatcher::new(file.path().to_path_buf()).unwrap();
        let rx = watcher.subscribe();

        assert!(watcher.reload());
        assert!(!rx.has_changed().unwrap());
    }
}
