use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::RequestStatus;

/// Which side of the handoff an actor is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    /// Found the item and listed it
    Finder,
    /// Asserts ownership and requests the handoff
    Claimant,
}

impl Party {
    pub fn other(self) -> Party {
        match self {
            Party::Finder => Party::Claimant,
            Party::Claimant => Party::Finder,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Finder => f.write_str("finder"),
            Party::Claimant => f.write_str("claimant"),
        }
    }
}

/// Drop precision below one millisecond, the resolution records are stored at
pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = at.nanosecond();
    at.with_nanosecond(nanos - nanos % 1_000_000).unwrap_or(at)
}

/// Proposed meeting terms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingTerms {
    pub meet_at: DateTime<Utc>,
    pub location: String,
}

impl MeetingTerms {
    pub fn new(meet_at: DateTime<Utc>, location: impl Into<String>) -> Self {
        Self {
            meet_at: truncate_to_millis(meet_at),
            location: location.into().trim().to_string(),
        }
    }

    /// Terms are compared on the millisecond instant and the trimmed location
    pub fn same_as(&self, meet_at: DateTime<Utc>, location: &str) -> bool {
        self.meet_at == truncate_to_millis(meet_at) && self.location.trim() == location.trim()
    }
}

/// The single per-attempt record tracking a handoff meeting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinationRecord {
    pub id: String,
    pub item_id: String,
    pub finder_id: String,
    /// Stable across the reschedule chain of one claim attempt
    pub claimant_id: String,
    /// Whoever last proposed or edited the terms
    pub last_modified_by: String,
    pub meet_at: DateTime<Utc>,
    pub location: String,
    pub status: RequestStatus,
    pub finder_present: bool,
    pub claimant_present: bool,
    pub finder_note: Option<String>,
    pub claimant_note: Option<String>,
    /// Bumped by the store on every committed write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CoordinationRecord {
    /// Create a fresh `Pending` proposal
    pub fn proposal(
        id: String,
        item_id: String,
        finder_id: String,
        claimant_id: String,
        proposed_by: String,
        terms: MeetingTerms,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            item_id,
            finder_id,
            claimant_id,
            last_modified_by: proposed_by,
            meet_at: terms.meet_at,
            location: terms.location,
            status: RequestStatus::Pending,
            finder_present: false,
            claimant_present: false,
            finder_note: None,
            claimant_note: None,
            version: 1,
            created_at,
            updated_at: created_at,
        }
    }

    /// Resolve the actor's side, if they are party to this record at all
    pub fn party_of(&self, actor: &str) -> Option<Party> {
        if actor == self.finder_id {
            Some(Party::Finder)
        } else if actor == self.claimant_id {
            Some(Party::Claimant)
        } else {
            None
        }
    }

    pub fn party_id(&self, party: Party) -> &str {
        match party {
            Party::Finder => &self.finder_id,
            Party::Claimant => &self.claimant_id,
        }
    }

    pub fn is_present(&self, party: Party) -> bool {
        match party {
            Party::Finder => self.finder_present,
            Party::Claimant => self.claimant_present,
        }
    }

    pub fn note(&self, party: Party) -> Option<&str> {
        match party {
            Party::Finder => self.finder_note.as_deref(),
            Party::Claimant => self.claimant_note.as_deref(),
        }
    }

    pub fn both_present(&self) -> bool {
        self.finder_present && self.claimant_present
    }

    pub fn terms(&self) -> MeetingTerms {
        MeetingTerms {
            meet_at: self.meet_at,
            location: self.location.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
