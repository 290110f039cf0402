//! A single client's disposable view of one item's coordination state.

use chrono::{DateTime, Utc};
use handoff_types::{CoordinationRecord, Party, RequestStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::attendance::{AttendanceTracker, AttendanceWindow, WindowPhase};
use crate::clock::Clock;
use crate::confirmation::ClaimJournal;
use crate::error::LifecycleError;
use crate::feed::FeedEvent;
use crate::items::ItemStore;
use crate::manager::RequestLifecycleManager;
use crate::store::ScheduleRequestStore;

/// What one viewer should be shown for an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ViewState {
    /// Nothing proposed yet, or only sealed history
    NoRequest,
    /// Viewer is neither the finder nor the claimant
    NotParty,
    /// Viewer proposed the current terms and waits for an answer
    AwaitingOtherParty,
    /// The other party proposed; viewer can accept, counter or cancel.
    /// `stale` once the proposed time has passed.
    ResponseRequired { stale: bool },
    Confirmed {
        window: AttendanceWindow,
        phase: WindowPhase,
        /// Claimant only, both present
        can_confirm: bool,
    },
    Failed { can_retry: bool },
    Cancelled,
    Completed,
}

impl ViewState {
    pub fn derive(
        record: Option<&CoordinationRecord>,
        viewer: &str,
        now: DateTime<Utc>,
        tracker: &AttendanceTracker,
    ) -> ViewState {
        let Some(record) = record else {
            return ViewState::NoRequest;
        };
        let Some(party) = record.party_of(viewer) else {
            return ViewState::NotParty;
        };

        match record.status {
            RequestStatus::Pending if record.last_modified_by == viewer => {
                ViewState::AwaitingOtherParty
            }
            RequestStatus::Pending => ViewState::ResponseRequired {
                stale: now >= record.meet_at,
            },
            RequestStatus::Accepted => {
                let window = tracker.window(record.meet_at);
                ViewState::Confirmed {
                    window,
                    phase: window.phase(now),
                    can_confirm: party == Party::Claimant && record.both_present(),
                }
            }
            RequestStatus::Failed => ViewState::Failed { can_retry: true },
            RequestStatus::Cancelled => ViewState::Cancelled,
            RequestStatus::Completed => ViewState::Completed,
            RequestStatus::Superseded => ViewState::NoRequest,
        }
    }
}

/// Local copy of the latest record for an item.
///
/// Pushed records replace the view wholesale; optimistic values only live
/// until the next authoritative one.
pub struct ItemProjection<S, I>
where
    S: ScheduleRequestStore + ClaimJournal,
    I: ItemStore,
{
    manager: Arc<RequestLifecycleManager<S, I>>,
    item_id: String,
    viewer: String,
    authoritative: Option<CoordinationRecord>,
    optimistic: Option<CoordinationRecord>,
}

impl<S, I> ItemProjection<S, I>
where
    S: ScheduleRequestStore + ClaimJournal,
    I: ItemStore,
{
    pub fn new(
        manager: Arc<RequestLifecycleManager<S, I>>,
        item_id: impl Into<String>,
        viewer: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            item_id: item_id.into(),
            viewer: viewer.into(),
            authoritative: None,
            optimistic: None,
        }
    }

    /// Discard everything local and read the store
    pub async fn resync(&mut self) -> Result<Option<&CoordinationRecord>, LifecycleError> {
        let latest = self.manager.get_latest_for_item(&self.item_id).await?;
        self.authoritative = latest;
        self.optimistic = None;
        Ok(self.authoritative.as_ref())
    }

    /// Fold one feed event into the view
    pub async fn apply(&mut self, event: FeedEvent) -> Result<(), LifecycleError> {
        match event {
            FeedEvent::Resync { .. } => {
                self.resync().await?;
            }
            FeedEvent::Record(record) => {
                if record.item_id != self.item_id || self.is_outdated(&record) {
                    return Ok(());
                }
                self.authoritative = Some(record);
                self.optimistic = None;
            }
        }
        Ok(())
    }

    /// Show a provisional record until the store answers
    pub fn apply_optimistic(&mut self, record: CoordinationRecord) {
        self.optimistic = Some(record);
    }

    /// Drop the provisional record, e.g. after the user cancelled the action
    pub fn discard_optimistic(&mut self) {
        self.optimistic = None;
    }

    pub fn view(&self) -> Option<&CoordinationRecord> {
        self.optimistic.as_ref().or(self.authoritative.as_ref())
    }

    pub fn authoritative(&self) -> Option<&CoordinationRecord> {
        self.authoritative.as_ref()
    }

    pub fn state(&self) -> ViewState {
        ViewState::derive(
            self.view(),
            &self.viewer,
            self.manager.clock().now(),
            self.manager.attendance(),
        )
    }

    fn is_outdated(&self, incoming: &CoordinationRecord) -> bool {
        match &self.authoritative {
            Some(current) if current.id == incoming.id => incoming.version <= current.version,
            // A different record only replaces the view if it is newer
            Some(current) => incoming.created_at < current.created_at,
            None => false,
        }
    }
}
