use chrono::{DateTime, Utc};
use handoff_resilience::Transient;
use handoff_types::CoordinationRecord;
use thiserror::Error;

use crate::items::ItemStoreError;
use crate::store::StoreError;

/// Errors surfaced by lifecycle operations.
///
/// Every variant is recoverable by retrying the originating user action.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("meeting time {meet_at} is too soon, earliest allowed is {earliest}")]
    InvalidMeetingTime {
        meet_at: DateTime<Utc>,
        earliest: DateTime<Utc>,
    },

    #[error("meeting location must not be empty")]
    EmptyLocation,

    #[error("attendance window is closed (open from {opens_at} until {closes_at})")]
    WindowClosed {
        opens_at: DateTime<Utc>,
        closes_at: DateTime<Utc>,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("proposal for {meet_at} has already passed, propose a new time instead")]
    StaleProposal { meet_at: DateTime<Utc> },

    #[error("no changes: meeting time and location are unchanged")]
    NoChanges,

    /// A concurrent writer committed first. `latest` is the authoritative
    /// record re-read after the failed write, when it could be fetched.
    #[error("conflicting update, record changed concurrently")]
    Conflict {
        latest: Option<Box<CoordinationRecord>>,
    },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("coordination record not found: {0}")]
    NotFound(String),

    #[error("item not found: {0}")]
    ItemNotFound(String),
}

impl LifecycleError {
    /// Transient failures worth retrying without user involvement
    pub fn is_retryable(&self) -> bool {
        matches!(self, LifecycleError::StoreUnavailable(_))
    }

    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::InvalidMeetingTime { .. } => "invalid_meeting_time",
            LifecycleError::EmptyLocation => "empty_location",
            LifecycleError::WindowClosed { .. } => "window_closed",
            LifecycleError::PermissionDenied(_) => "permission_denied",
            LifecycleError::InvalidState(_) => "invalid_state",
            LifecycleError::StaleProposal { .. } => "stale_proposal",
            LifecycleError::NoChanges => "no_changes",
            LifecycleError::Conflict { .. } => "conflict",
            LifecycleError::StoreUnavailable(_) => "store_unavailable",
            LifecycleError::NotFound(_) => "not_found",
            LifecycleError::ItemNotFound(_) => "item_not_found",
        }
    }

    /// Authoritative record attached to a `Conflict`
    pub fn latest(&self) -> Option<&CoordinationRecord> {
        match self {
            LifecycleError::Conflict { latest } => latest.as_deref(),
            _ => None,
        }
    }
}

impl Transient for LifecycleError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => LifecycleError::NotFound(id),
            StoreError::DuplicateId(_) | StoreError::Conflict(_) => {
                LifecycleError::Conflict { latest: None }
            }
            StoreError::InvalidState(msg) => LifecycleError::InvalidState(msg),
            StoreError::DatabaseError(msg)
            | StoreError::SerializationError(msg)
            | StoreError::ConnectionError(msg) => LifecycleError::StoreUnavailable(msg),
        }
    }
}

impl From<ItemStoreError> for LifecycleError {
    fn from(err: ItemStoreError) -> Self {
        match err {
            ItemStoreError::NotFound(id) => LifecycleError::ItemNotFound(id),
            ItemStoreError::Unavailable(msg) => LifecycleError::StoreUnavailable(msg),
        }
    }
}
