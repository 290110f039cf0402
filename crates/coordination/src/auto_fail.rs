use chrono::{DateTime, Duration, Utc};
use handoff_types::{CoordinationRecord, NotificationKind, Party, RequestStatus};
use handoff_resilience::{retry_with_backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::confirmation::ClaimJournal;
use crate::error::LifecycleError;
use crate::items::ItemStore;
use crate::manager::RequestLifecycleManager;
use crate::store::{Precondition, RecordPatch, ScheduleRequestStore};

/// Decides when an accepted meeting has run out of time
#[derive(Debug, Clone, Copy)]
pub struct AutoFailPolicy {
    grace: Duration,
}

impl AutoFailPolicy {
    /// `grace` is how long after `meet_at` the meeting stays open
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Latest `meet_at` that can be overdue at `now`
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.grace
    }

    pub fn should_fail(&self, record: &CoordinationRecord, now: DateTime<Utc>) -> bool {
        record.status == RequestStatus::Accepted
            && now >= record.meet_at + self.grace
            && !record.both_present()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoFailReport {
    pub examined: usize,
    pub failed: usize,
    /// Lost a race to another writer, or not yet due
    pub skipped: usize,
}

impl<S, I> RequestLifecycleManager<S, I>
where
    S: ScheduleRequestStore + ClaimJournal,
    I: ItemStore,
{
    /// Fail every overdue accepted meeting. Safe to run concurrently with
    /// other sweeps: the first writer wins and the rest skip.
    pub async fn sweep_expired(&self) -> Result<AutoFailReport, LifecycleError> {
        let now = self.clock.now();
        let candidates = self
            .guarded(
                "list_auto_fail_candidates",
                self.store
                    .list_auto_fail_candidates(self.auto_fail.cutoff(now), self.config.sweep_batch_size),
            )
            .await?;

        let mut report = AutoFailReport::default();
        for record in candidates {
            report.examined += 1;
            if !self.auto_fail.should_fail(&record, now) {
                report.skipped += 1;
                continue;
            }

            let patch = RecordPatch::at(now)
                .status(RequestStatus::Failed)
                .details("attendance window closed without both parties present");
            match self.commit(&record, Precondition::exact(&record), patch).await {
                Ok(failed) => {
                    report.failed += 1;
                    info!(record_id = %failed.id, item_id = %failed.item_id, "meeting auto-failed");
                    for party in [Party::Finder, Party::Claimant] {
                        self.notify(failed.party_id(party), NotificationKind::MeetingFailed, &failed)
                            .await;
                    }
                }
                Err(LifecycleError::Conflict { .. }) | Err(LifecycleError::InvalidState(_)) => {
                    debug!(record_id = %record.id, "record changed before auto-fail, skipping");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKGROUND JOB
// ═══════════════════════════════════════════════════════════════════════════

/// Periodic server-side job running auto-fail sweeps and claim recovery
pub struct AutoFailWatcher<S, I>
where
    S: ScheduleRequestStore + ClaimJournal,
    I: ItemStore,
{
    manager: Arc<RequestLifecycleManager<S, I>>,
    interval: watch::Receiver<std::time::Duration>,
    retry: RetryPolicy,
}

impl<S, I> AutoFailWatcher<S, I>
where
    S: ScheduleRequestStore + ClaimJournal + 'static,
    I: ItemStore + 'static,
{
    /// `interval` may be changed while running, e.g. by config hot reload
    pub fn new(
        manager: Arc<RequestLifecycleManager<S, I>>,
        interval: watch::Receiver<std::time::Duration>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            manager,
            interval,
            retry,
        }
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?*self.interval.borrow(), "auto-fail watcher started");
        let mut interval_open = true;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;

            let period = *self.interval.borrow_and_update();
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = self.interval.changed(), if interval_open => {
                    match changed {
                        Ok(()) => info!(interval = ?*self.interval.borrow(), "auto-fail interval updated"),
                        Err(_) => interval_open = false,
                    }
                }
                _ = shutdown.changed() => {
                    // A dropped sender also ends the loop
                    if shutdown.has_changed().is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("auto-fail watcher stopped");
    }

    /// One sweep plus one claim recovery pass
    pub async fn tick(&self) -> Option<AutoFailReport> {
        let manager = &self.manager;

        let report = match retry_with_backoff(&self.retry, "auto_fail_sweep", || manager.sweep_expired()).await {
            Ok(report) => {
                if report.failed > 0 {
                    info!(
                        auto_failed = report.failed as u64,
                        examined = report.examined,
                        skipped = report.skipped,
                        "auto-fail sweep complete"
                    );
                } else {
                    debug!(examined = report.examined, "auto-fail sweep found nothing due");
                }
                Some(report)
            }
            Err(e) => {
                let e = e.into_inner();
                warn!(error = %e, error_type = e.kind(), "auto-fail sweep failed");
                None
            }
        };

        if let Err(e) =
            retry_with_backoff(&self.retry, "recover_pending_claims", || manager.recover_pending_claims()).await
        {
            let e = e.into_inner();
            warn!(error = %e, error_type = e.kind(), "claim recovery failed");
        }

        report
    }
}
