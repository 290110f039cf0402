//! UnLost handoff coordination service
//!
//! Wires the coordination state machine to a store backend, the auto-fail
//! watcher, the metrics collector and configuration reloads. `handoffd`
//! is a thin CLI around [`HandoffService`]; embedders can use it directly.

use std::sync::Arc;
use std::time::Duration;

use handoff_config::{AppConfig, RetryConfig};
use handoff_coordination::{
    AutoFailWatcher, ClaimJournal, FeedEvent, InMemoryItemStore, InMemoryStore, ItemStore,
    LifecycleConfig, LifecycleError, RequestLifecycleManager, ScheduleRequestStore, SqliteStore,
    StoreError,
};
use handoff_metrics::{MetricsCollector, RecordSpan};
use handoff_resilience::RetryPolicy;
use handoff_types::{CoordinationRecord, RequestStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use handoff_config as config;
pub use handoff_coordination as coordination;
pub use handoff_metrics as metrics;
pub use handoff_types as types;

/// Lifecycle settings derived from the service configuration
pub fn lifecycle_config(config: &AppConfig) -> LifecycleConfig {
    let secs = |s: u64| chrono::Duration::seconds(s as i64);

    LifecycleConfig {
        min_lead_time: secs(config.lifecycle.min_lead_time_secs),
        window_opens_before: secs(config.lifecycle.window_opens_before_secs),
        window_closes_after: secs(config.lifecycle.window_closes_after_secs),
        store_timeout: config.store.op_timeout(),
        notify_timeout: config.notifications.timeout(),
        notifications_enabled: config.notifications.enabled,
        sweep_batch_size: config.auto_fail.batch_size,
    }
}

pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.max_attempts,
        config.initial_backoff(),
        config.max_backoff(),
    )
}

/// In-memory records and items; nothing survives a restart
pub fn in_memory_service(config: &AppConfig) -> HandoffService<InMemoryStore, InMemoryItemStore> {
    let manager = RequestLifecycleManager::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryItemStore::new()),
        lifecycle_config(config),
    );
    HandoffService::new(manager, config)
}

/// SQLite-backed records, items and claim journal in one database file
pub async fn sqlite_service(
    config: &AppConfig,
) -> Result<HandoffService<SqliteStore, SqliteStore>, StoreError> {
    let store = Arc::new(SqliteStore::new(&config.store.sqlite_path).await?);
    let manager = RequestLifecycleManager::new(store.clone(), store, lifecycle_config(config));
    Ok(HandoffService::new(manager, config))
}

// ═══════════════════════════════════════════════════════════════════════════
// SERVICE
// ═══════════════════════════════════════════════════════════════════════════

/// A running handoff coordination service and its background tasks
pub struct HandoffService<S, I>
where
    S: ScheduleRequestStore + ClaimJournal,
    I: ItemStore,
{
    manager: Arc<RequestLifecycleManager<S, I>>,
    collector: Arc<MetricsCollector>,
    auto_fail_enabled: bool,
    retry: RetryPolicy,
    interval: Arc<watch::Sender<Duration>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S, I> HandoffService<S, I>
where
    S: ScheduleRequestStore + ClaimJournal + 'static,
    I: ItemStore + 'static,
{
    pub fn new(manager: RequestLifecycleManager<S, I>, config: &AppConfig) -> Self {
        let (interval, _) = watch::channel(config.auto_fail.poll_interval());
        let (shutdown, _) = watch::channel(false);

        Self {
            manager: Arc::new(manager),
            collector: Arc::new(MetricsCollector::new()),
            auto_fail_enabled: config.auto_fail.enabled,
            retry: retry_policy(&config.retry),
            interval: Arc::new(interval),
            shutdown,
            tasks: Vec::new(),
        }
    }

    pub fn with_collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = collector;
        self
    }

    pub fn manager(&self) -> &Arc<RequestLifecycleManager<S, I>> {
        &self.manager
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    /// Flips to true once `shutdown` is called
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn poll_interval(&self) -> Duration {
        *self.interval.borrow()
    }

    /// Settle claims left half-done by a previous process, seed metrics and
    /// spawn the background tasks
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        let recovery = self.manager.recover_pending_claims().await?;
        if recovery.rolled_forward + recovery.compensated + recovery.deferred > 0 {
            info!(
                rolled_forward = recovery.rolled_forward,
                compensated = recovery.compensated,
                deferred = recovery.deferred,
                "recovered pending claims"
            );
        }

        let active = count_active(&self.manager).await?;
        self.collector.set_active_records(active);

        self.tasks.push(self.spawn_feed_metrics());

        if self.auto_fail_enabled {
            let watcher =
                AutoFailWatcher::new(self.manager.clone(), self.interval.subscribe(), self.retry);
            self.tasks
                .push(tokio::spawn(watcher.run(self.shutdown.subscribe())));
        } else {
            info!("auto-fail watcher disabled");
        }

        info!(active_records = active, "handoff service started");
        Ok(())
    }

    /// Apply reloaded configuration until shutdown.
    ///
    /// Only the auto-fail poll interval is applied live; other settings take
    /// effect on restart.
    pub fn follow_config(&mut self, mut updates: watch::Receiver<AppConfig>) {
        let interval = self.interval.clone();
        let mut shutdown = self.shutdown.subscribe();

        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let period = updates.borrow_and_update().auto_fail.poll_interval();
                        interval.send_if_modified(|current| {
                            let modified = *current != period;
                            *current = period;
                            modified
                        });
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("config follower stopped");
        }));
    }

    /// Stop all background tasks and wait for them
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("handoff service stopped");
    }

    fn spawn_feed_metrics(&self) -> JoinHandle<()> {
        let mut feed = self.manager.feed().subscribe_all();
        let manager = self.manager.clone();
        let collector = self.collector.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = feed.recv() => match event {
                        Some(FeedEvent::Record(record)) => observe(&collector, &record),
                        Some(FeedEvent::Resync { missed }) => {
                            collector.record_feed_resync();
                            warn!(missed, "metrics feed lagged, recounting active records");
                            // Buffered events are already reflected in the store
                            feed.skip_to_latest();
                            match count_active(&manager).await {
                                Ok(active) => collector.set_active_records(active),
                                Err(e) => warn!(
                                    error = %e,
                                    error_type = e.kind(),
                                    "recount of active records failed"
                                ),
                            }
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

/// Pending plus accepted records, straight from the store
pub async fn count_active<S, I>(
    manager: &RequestLifecycleManager<S, I>,
) -> Result<usize, LifecycleError>
where
    S: ScheduleRequestStore + ClaimJournal,
    I: ItemStore,
{
    let mut active = 0;
    for status in [RequestStatus::Pending, RequestStatus::Accepted] {
        active += manager
            .store()
            .list_by_status(status, i64::MAX as usize)
            .await?
            .len();
    }
    Ok(active)
}

fn observe(collector: &MetricsCollector, record: &CoordinationRecord) {
    let _span = RecordSpan::for_record(record).enter();
    collector.observe_record(record);
    debug!(status = %record.status, version = record.version, "record committed");
}
