use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle status of a coordination record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Proposed, waiting for the other party
    Pending,
    /// Both parties agreed on the terms
    Accepted,
    /// Meeting did not happen (auto-fail or claimant-reported)
    Failed,
    /// Retrieval confirmed, item claimed
    Completed,
    /// Withdrawn by one of the parties
    Cancelled,
    /// Replaced by a newer attempt for the same item
    Superseded,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Pending,
        RequestStatus::Accepted,
        RequestStatus::Failed,
        RequestStatus::Completed,
        RequestStatus::Cancelled,
        RequestStatus::Superseded,
    ];

    /// Active records block any other record for the same item
    pub fn is_active(self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Accepted)
    }

    /// Terminal records can only be followed by a new record
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// A sealed record accepts no further writes at all
    pub fn is_sealed(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Superseded)
    }

    /// A new attempt may supersede a record in this status
    pub fn is_supersedable(self) -> bool {
        matches!(self, RequestStatus::Failed | RequestStatus::Cancelled)
    }

    /// Legal status transitions of the handoff state machine.
    ///
    /// `Pending -> Pending` and `Accepted -> Pending` are in-place edits of
    /// the proposed terms.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Accepted)
                | (Pending, Cancelled)
                | (Accepted, Pending)
                | (Accepted, Accepted)
                | (Accepted, Cancelled)
                | (Accepted, Failed)
                | (Accepted, Completed)
                | (Failed, Superseded)
                | (Cancelled, Superseded)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Failed => "failed",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Superseded => "superseded",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown request status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for RequestStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "failed" => Ok(RequestStatus::Failed),
            "completed" => Ok(RequestStatus::Completed),
            "cancelled" => Ok(RequestStatus::Cancelled),
            "superseded" => Ok(RequestStatus::Superseded),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
