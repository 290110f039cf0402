use serde::{Deserialize, Serialize};

/// What happened, from the recipient's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ProposalReceived,
    ProposalUpdated,
    ProposalAccepted,
    RequestCancelled,
    MeetingFailed,
    ClaimCompleted,
    ClaimFailed,
}

impl NotificationKind {
    /// Short human-readable title, as shown in a push banner
    pub fn title(self) -> &'static str {
        match self {
            NotificationKind::ProposalReceived => "New meeting request",
            NotificationKind::ProposalUpdated => "New time proposed",
            NotificationKind::ProposalAccepted => "Meeting confirmed",
            NotificationKind::RequestCancelled => "Meeting cancelled",
            NotificationKind::MeetingFailed => "Meeting missed",
            NotificationKind::ClaimCompleted => "Item claimed",
            NotificationKind::ClaimFailed => "Retrieval unsuccessful",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub item_id: String,
    pub record_id: String,
}

impl NotificationEvent {
    pub fn new(kind: NotificationKind, item_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            kind,
            item_id: item_id.into(),
            record_id: record_id.into(),
        }
    }
}
