use chrono::{DateTime, Duration, Utc};
use handoff_types::{CoordinationRecord, RequestStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::confirmation::ClaimJournal;
use crate::error::LifecycleError;
use crate::items::ItemStore;
use crate::manager::{require_party, RequestLifecycleManager};
use crate::store::{Precondition, RecordPatch, ScheduleRequestStore};

/// Where `now` sits relative to a record's attendance window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPhase {
    NotYetOpen,
    Open,
    Closed,
}

/// Half-open interval `[opens_at, closes_at)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceWindow {
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
}

impl AttendanceWindow {
    pub fn phase(&self, now: DateTime<Utc>) -> WindowPhase {
        if now < self.opens_at {
            WindowPhase::NotYetOpen
        } else if now < self.closes_at {
            WindowPhase::Open
        } else {
            WindowPhase::Closed
        }
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.phase(now) == WindowPhase::Open
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttendanceTracker {
    opens_before: Duration,
    closes_after: Duration,
}

impl AttendanceTracker {
    pub fn new(opens_before: Duration, closes_after: Duration) -> Self {
        Self {
            opens_before,
            closes_after,
        }
    }

    pub fn window(&self, meet_at: DateTime<Utc>) -> AttendanceWindow {
        AttendanceWindow {
            opens_at: meet_at - self.opens_before,
            closes_at: meet_at + self.closes_after,
        }
    }

    pub fn phase(&self, record: &CoordinationRecord, now: DateTime<Utc>) -> WindowPhase {
        self.window(record.meet_at).phase(now)
    }

    /// Whether attendance edits are allowed on `record` right now
    pub fn check(&self, record: &CoordinationRecord, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        if record.status != RequestStatus::Accepted {
            return Err(LifecycleError::InvalidState(format!(
                "attendance can only be recorded for an accepted meeting, this one is {}",
                record.status
            )));
        }

        let window = self.window(record.meet_at);
        if !window.contains(now) {
            return Err(LifecycleError::WindowClosed {
                opens_at: window.opens_at,
                closes_at: window.closes_at,
            });
        }
        Ok(())
    }
}

impl Default for AttendanceTracker {
    fn default() -> Self {
        Self::new(Duration::minutes(5), Duration::minutes(10))
    }
}

impl<S, I> RequestLifecycleManager<S, I>
where
    S: ScheduleRequestStore + ClaimJournal,
    I: ItemStore,
{
    /// Mark the acting party present or absent
    pub async fn set_presence(
        &self,
        actor: &str,
        record_id: &str,
        present: bool,
    ) -> Result<CoordinationRecord, LifecycleError> {
        let record = self.load(record_id).await?;
        let party = require_party(&record, actor)?;
        let now = self.clock.now();
        self.attendance.check(&record, now)?;

        if record.is_present(party) == present {
            debug!(record_id = %record_id, party = %party, "presence unchanged");
            return Ok(record);
        }

        // Only this party's flag is written, so the version is not pinned
        let patch = RecordPatch::at(now).presence(party, present);
        let updated = self
            .commit(&record, Precondition::status(RequestStatus::Accepted), patch)
            .await?;

        info!(record_id = %record_id, party = %party, present, "presence recorded");
        Ok(updated)
    }

    /// Set or clear the acting party's "how to find me" note
    pub async fn set_note(
        &self,
        actor: &str,
        record_id: &str,
        note: &str,
    ) -> Result<CoordinationRecord, LifecycleError> {
        let record = self.load(record_id).await?;
        let party = require_party(&record, actor)?;
        let now = self.clock.now();
        self.attendance.check(&record, now)?;

        let note = Some(note.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if record.note(party) == note.as_deref() {
            return Ok(record);
        }

        let patch = RecordPatch::at(now).note(party, note);
        let updated = self
            .commit(&record, Precondition::status(RequestStatus::Accepted), patch)
            .await?;

        debug!(record_id = %record_id, party = %party, "note updated");
        Ok(updated)
    }
}
