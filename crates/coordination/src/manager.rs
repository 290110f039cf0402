use chrono::Duration;
use handoff_types::{
    CoordinationRecord, MeetingTerms, NotificationEvent, NotificationKind, Party, RequestStatus,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::attendance::AttendanceTracker;
use crate::auto_fail::AutoFailPolicy;
use crate::clock::{Clock, SystemClock};
use crate::confirmation::ClaimJournal;
use crate::error::LifecycleError;
use crate::feed::{ChangeFeed, FeedSubscription};
use crate::items::ItemStore;
use crate::notify::{NotificationDispatcher, TracingDispatcher};
use crate::reschedule::RescheduleCoordinator;
use crate::store::{Precondition, RecordPatch, ScheduleRequestStore, StateTransition};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Earliest a meeting may be scheduled, relative to now
    pub min_lead_time: Duration,
    pub window_opens_before: Duration,
    pub window_closes_after: Duration,
    pub store_timeout: std::time::Duration,
    pub notify_timeout: std::time::Duration,
    pub notifications_enabled: bool,
    /// Records examined per auto-fail sweep
    pub sweep_batch_size: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_lead_time: Duration::minutes(10),
            window_opens_before: Duration::minutes(5),
            window_closes_after: Duration::minutes(10),
            store_timeout: std::time::Duration::from_secs(5),
            notify_timeout: std::time::Duration::from_secs(2),
            notifications_enabled: true,
            sweep_batch_size: 100,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE MANAGER
// ═══════════════════════════════════════════════════════════════════════════

/// The public state machine API for handoff coordination.
///
/// Every mutation is a conditional write against the store; the change feed
/// only ever sees committed states.
pub struct RequestLifecycleManager<S, I>
where
    S: ScheduleRequestStore + ClaimJournal,
    I: ItemStore,
{
    pub(crate) store: Arc<S>,
    pub(crate) items: Arc<I>,
    pub(crate) feed: ChangeFeed,
    pub(crate) notifier: Arc<dyn NotificationDispatcher>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: LifecycleConfig,
    pub(crate) attendance: AttendanceTracker,
    pub(crate) auto_fail: AutoFailPolicy,
}

impl<S, I> RequestLifecycleManager<S, I>
where
    S: ScheduleRequestStore + ClaimJournal,
    I: ItemStore,
{
    pub fn new(store: Arc<S>, items: Arc<I>, config: LifecycleConfig) -> Self {
        let attendance =
            AttendanceTracker::new(config.window_opens_before, config.window_closes_after);
        let auto_fail = AutoFailPolicy::new(config.window_closes_after);

        Self {
            store,
            items,
            feed: ChangeFeed::new(),
            notifier: Arc::new(TracingDispatcher),
            clock: Arc::new(SystemClock),
            config,
            attendance,
            auto_fail,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_feed(mut self, feed: ChangeFeed) -> Self {
        self.feed = feed;
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn attendance(&self) -> &AttendanceTracker {
        &self.attendance
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn items(&self) -> &Arc<I> {
        &self.items
    }

    // ───────────────────────────────────────────────────────────────────────
    // Operations
    // ───────────────────────────────────────────────────────────────────────

    /// Propose meeting terms for an item.
    ///
    /// Creates the first record, edits the active one in place, or opens a
    /// fresh attempt after a failed or cancelled one.
    #[instrument(skip_all, fields(actor = %actor, item_id = %item_id))]
    pub async fn propose(
        &self,
        actor: &str,
        item_id: &str,
        meet_at: chrono::DateTime<chrono::Utc>,
        location: &str,
    ) -> Result<CoordinationRecord, LifecycleError> {
        let terms = MeetingTerms::new(meet_at, location);
        if terms.location.is_empty() {
            return Err(LifecycleError::EmptyLocation);
        }

        let now = self.clock.now();
        let earliest = now + self.config.min_lead_time;
        if terms.meet_at < earliest {
            return Err(LifecycleError::InvalidMeetingTime { meet_at, earliest });
        }

        let item = self.guarded("get_item", self.items.get_item(item_id)).await?;
        if item.is_claimed() {
            return Err(LifecycleError::InvalidState(format!(
                "item {} has already been claimed",
                item_id
            )));
        }

        let latest = self
            .guarded("get_latest_for_item", self.store.get_latest_for_item(item_id))
            .await?;
        let plan = RescheduleCoordinator::plan(actor, &item, latest.as_ref(), &terms)?;
        debug!(plan = plan.label(), "proposal planned");

        let record = self.execute_plan(actor, &item, plan, terms, now).await?;
        info!(
            record_id = %record.id,
            status = %record.status,
            meet_at = %record.meet_at,
            "meeting proposed"
        );
        Ok(record)
    }

    /// Accept the pending proposal. The party who proposed the current terms
    /// cannot accept them.
    #[instrument(skip_all, fields(actor = %actor, record_id = %record_id))]
    pub async fn accept(
        &self,
        actor: &str,
        record_id: &str,
    ) -> Result<CoordinationRecord, LifecycleError> {
        let record = self.load(record_id).await?;
        let party = require_party(&record, actor)?;

        if record.status != RequestStatus::Pending {
            return Err(LifecycleError::InvalidState(format!(
                "cannot accept a {} request",
                record.status
            )));
        }
        if record.last_modified_by == actor {
            return Err(LifecycleError::PermissionDenied(
                "the proposer cannot accept their own proposal".to_string(),
            ));
        }
        if self.clock.now() >= record.meet_at {
            return Err(LifecycleError::StaleProposal {
                meet_at: record.meet_at,
            });
        }

        let patch = RecordPatch::at(self.clock.now())
            .status(RequestStatus::Accepted)
            .by(actor)
            .details("proposal accepted");
        let accepted = self.commit(&record, Precondition::exact(&record), patch).await?;

        info!(party = %party, "meeting accepted");
        self.notify(
            accepted.party_id(party.other()),
            NotificationKind::ProposalAccepted,
            &accepted,
        )
        .await;
        Ok(accepted)
    }

    /// Withdraw an active request
    #[instrument(skip_all, fields(actor = %actor, record_id = %record_id))]
    pub async fn cancel(
        &self,
        actor: &str,
        record_id: &str,
    ) -> Result<CoordinationRecord, LifecycleError> {
        let record = self.load(record_id).await?;
        let party = require_party(&record, actor)?;

        if !record.is_active() {
            return Err(LifecycleError::InvalidState(format!(
                "cannot cancel a {} request",
                record.status
            )));
        }

        let patch = RecordPatch::at(self.clock.now())
            .status(RequestStatus::Cancelled)
            .by(actor)
            .details(format!("cancelled by {}", party));
        let cancelled = self.commit(&record, Precondition::exact(&record), patch).await?;

        info!(party = %party, "meeting cancelled");
        self.notify(
            cancelled.party_id(party.other()),
            NotificationKind::RequestCancelled,
            &cancelled,
        )
        .await;
        Ok(cancelled)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Reads
    // ───────────────────────────────────────────────────────────────────────

    pub async fn get(&self, record_id: &str) -> Result<CoordinationRecord, LifecycleError> {
        self.load(record_id).await
    }

    pub async fn get_active_for_item(
        &self,
        item_id: &str,
    ) -> Result<Option<CoordinationRecord>, LifecycleError> {
        self.guarded("get_active_for_item", self.store.get_active_for_item(item_id))
            .await
    }

    pub async fn get_latest_for_item(
        &self,
        item_id: &str,
    ) -> Result<Option<CoordinationRecord>, LifecycleError> {
        self.guarded("get_latest_for_item", self.store.get_latest_for_item(item_id))
            .await
    }

    pub async fn history(&self, record_id: &str) -> Result<Vec<StateTransition>, LifecycleError> {
        self.guarded("get_history", self.store.get_history(record_id))
            .await
    }

    pub async fn subscribe(&self, item_id: &str) -> FeedSubscription {
        self.feed.subscribe(item_id).await
    }

    // ───────────────────────────────────────────────────────────────────────
    // Internals shared by the operation modules
    // ───────────────────────────────────────────────────────────────────────

    /// Run a store call under the configured timeout
    pub(crate) async fn guarded<T, E, F>(
        &self,
        operation: &'static str,
        fut: F,
    ) -> Result<T, LifecycleError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<LifecycleError>,
    {
        let started = Instant::now();
        let result = tokio::time::timeout(self.config.store_timeout, fut).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(inner) => {
                debug!(store_op = operation, elapsed_ms, "store operation finished");
                inner.map_err(Into::into)
            }
            Err(_) => {
                warn!(
                    store_op = operation,
                    elapsed_ms,
                    error_type = "store_unavailable",
                    "store operation timed out"
                );
                Err(LifecycleError::StoreUnavailable(format!(
                    "{} timed out after {:?}",
                    operation, self.config.store_timeout
                )))
            }
        }
    }

    pub(crate) async fn load(&self, record_id: &str) -> Result<CoordinationRecord, LifecycleError> {
        self.guarded("get", self.store.get(record_id))
            .await?
            .ok_or_else(|| LifecycleError::NotFound(record_id.to_string()))
    }

    /// Conditionally update `record`, publishing the committed state
    pub(crate) async fn commit(
        &self,
        record: &CoordinationRecord,
        expected: Precondition,
        patch: RecordPatch,
    ) -> Result<CoordinationRecord, LifecycleError> {
        let result = self
            .guarded(
                "conditional_update",
                self.store.conditional_update(&record.id, expected, patch),
            )
            .await;

        match result {
            Ok(updated) => {
                debug!(
                    record_id = %updated.id,
                    status = %updated.status,
                    version = updated.version,
                    "record committed"
                );
                self.feed.publish(&updated).await;
                Ok(updated)
            }
            Err(err) => Err(self.with_latest(err, &record.item_id).await),
        }
    }

    /// Insert a new record, publishing it
    pub(crate) async fn insert(
        &self,
        record: CoordinationRecord,
    ) -> Result<CoordinationRecord, LifecycleError> {
        match self.guarded("create", self.store.create(&record)).await {
            Ok(created) => {
                debug!(record_id = %created.id, item_id = %created.item_id, "record created");
                self.feed.publish(&created).await;
                Ok(created)
            }
            Err(err) => Err(self.with_latest(err, &record.item_id).await),
        }
    }

    /// Attach the authoritative record to a bare conflict
    async fn with_latest(&self, err: LifecycleError, item_id: &str) -> LifecycleError {
        match err {
            LifecycleError::Conflict { latest: None } => {
                warn!(
                    item_id = %item_id,
                    error_type = "conflict",
                    "concurrent write detected, refetching"
                );
                let latest = self
                    .guarded("get_latest_for_item", self.store.get_latest_for_item(item_id))
                    .await
                    .ok()
                    .flatten()
                    .map(Box::new);
                LifecycleError::Conflict { latest }
            }
            other => other,
        }
    }

    /// Best-effort notification; failures are logged and swallowed
    pub(crate) async fn notify(
        &self,
        recipient: &str,
        kind: NotificationKind,
        record: &CoordinationRecord,
    ) {
        if !self.config.notifications_enabled {
            return;
        }

        let event = NotificationEvent::new(kind, record.item_id.as_str(), record.id.as_str());
        let delivery = tokio::time::timeout(
            self.config.notify_timeout,
            self.notifier.notify(recipient, &event),
        )
        .await;

        match delivery {
            Ok(Ok(())) => debug!(recipient = %recipient, kind = ?kind, "notification sent"),
            Ok(Err(e)) => warn!(
                recipient = %recipient,
                kind = ?kind,
                error = %e,
                error_type = "notification_failed",
                "notification not delivered"
            ),
            Err(_) => warn!(
                recipient = %recipient,
                kind = ?kind,
                error_type = "notification_failed",
                "notification timed out"
            ),
        }
    }
}

pub(crate) fn require_party(record: &CoordinationRecord, actor: &str) -> Result<Party, LifecycleError> {
    record.party_of(actor).ok_or_else(|| {
        LifecycleError::PermissionDenied(format!("{} is not a party to record {}", actor, record.id))
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
