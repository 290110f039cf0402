use async_trait::async_trait;
use chrono::{DateTime, Utc};
use handoff_types::{CoordinationRecord, MeetingTerms, Party, RequestStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::confirmation::{ClaimJournal, PendingClaim};

// ═══════════════════════════════════════════════════════════════════════════
// CORE TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// Audit trail entry written alongside every status-bearing update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub record_id: String,
    /// `None` for the creation entry
    pub from_status: Option<RequestStatus>,
    pub to_status: RequestStatus,
    pub actor: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub details: Option<String>,
}

impl StateTransition {
    pub fn created(record: &CoordinationRecord) -> Self {
        Self {
            record_id: record.id.clone(),
            from_status: None,
            to_status: record.status,
            actor: Some(record.last_modified_by.clone()),
            timestamp: record.created_at,
            details: Some("record created".to_string()),
        }
    }
}

/// What the writer believes the record looks like right now.
///
/// Term edits and status changes pin the exact version; field-disjoint
/// writes such as presence flags only pin the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precondition {
    pub status: RequestStatus,
    pub version: Option<u64>,
}

impl Precondition {
    /// Expect exactly this snapshot
    pub fn exact(record: &CoordinationRecord) -> Self {
        Self {
            status: record.status,
            version: Some(record.version),
        }
    }

    /// Expect only the status
    pub fn status(status: RequestStatus) -> Self {
        Self {
            status,
            version: None,
        }
    }

    /// Validate the precondition and the requested transition against the
    /// stored record. Shared by every backend so they agree on semantics.
    pub fn check(&self, current: &CoordinationRecord, patch: &RecordPatch) -> Result<(), StoreError> {
        if current.status.is_sealed() {
            return Err(StoreError::InvalidState(format!(
                "record {} is {} and can no longer change",
                current.id, current.status
            )));
        }

        let version_matches = self.version.map_or(true, |v| v == current.version);
        if current.status != self.status || !version_matches {
            return Err(StoreError::Conflict(format!(
                "record {} expected {}@{:?}, found {}@{}",
                current.id, self.status, self.version, current.status, current.version
            )));
        }

        if let Some(next) = patch.status {
            if !current.status.can_transition_to(next) {
                return Err(StoreError::InvalidState(format!(
                    "illegal transition {} -> {} for record {}",
                    current.status, next, current.id
                )));
            }
        }

        Ok(())
    }
}

/// Partial update applied atomically by `conditional_update`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPatch {
    pub at: DateTime<Utc>,
    pub status: Option<RequestStatus>,
    pub meet_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub last_modified_by: Option<String>,
    pub finder_present: Option<bool>,
    pub claimant_present: Option<bool>,
    pub finder_note: Option<Option<String>>,
    pub claimant_note: Option<Option<String>>,
    /// Audit only
    pub actor: Option<String>,
    /// Audit only
    pub details: Option<String>,
}

impl RecordPatch {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            at,
            status: None,
            meet_at: None,
            location: None,
            last_modified_by: None,
            finder_present: None,
            claimant_present: None,
            finder_note: None,
            claimant_note: None,
            actor: None,
            details: None,
        }
    }

    pub fn status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn terms(mut self, terms: MeetingTerms) -> Self {
        self.meet_at = Some(terms.meet_at);
        self.location = Some(terms.location);
        self
    }

    pub fn modified_by(mut self, actor: &str) -> Self {
        self.last_modified_by = Some(actor.to_string());
        self
    }

    pub fn presence(mut self, party: Party, present: bool) -> Self {
        match party {
            Party::Finder => self.finder_present = Some(present),
            Party::Claimant => self.claimant_present = Some(present),
        }
        self
    }

    pub fn note(mut self, party: Party, note: Option<String>) -> Self {
        match party {
            Party::Finder => self.finder_note = Some(note),
            Party::Claimant => self.claimant_note = Some(note),
        }
        self
    }

    /// Clear presence flags and notes, as every new proposal does
    pub fn reset_attendance(self) -> Self {
        self.presence(Party::Finder, false)
            .presence(Party::Claimant, false)
            .note(Party::Finder, None)
            .note(Party::Claimant, None)
    }

    pub fn by(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Apply to a record, bumping its version
    pub fn apply_to(&self, record: &mut CoordinationRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(meet_at) = self.meet_at {
            record.meet_at = meet_at;
        }
        if let Some(location) = &self.location {
            record.location = location.clone();
        }
        if let Some(actor) = &self.last_modified_by {
            record.last_modified_by = actor.clone();
        }
        if let Some(present) = self.finder_present {
            record.finder_present = present;
        }
        if let Some(present) = self.claimant_present {
            record.claimant_present = present;
        }
        if let Some(note) = &self.finder_note {
            record.finder_note = note.clone();
        }
        if let Some(note) = &self.claimant_note {
            record.claimant_note = note.clone();
        }
        record.version += 1;
        record.updated_at = self.at;
    }

    /// History entry for this patch, if it carries a status
    pub fn transition(&self, before: &CoordinationRecord) -> Option<StateTransition> {
        self.status.map(|to_status| StateTransition {
            record_id: before.id.clone(),
            from_status: Some(before.status),
            to_status,
            actor: self.actor.clone(),
            timestamp: self.at,
            details: self.details.clone(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("coordination record not found: {0}")]
    NotFound(String),

    #[error("duplicate record ID: {0}")]
    DuplicateId(String),

    #[error("precondition failed: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Durable single source of truth for coordination records
#[async_trait]
pub trait ScheduleRequestStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if the item already has an
    /// active record and with `DuplicateId` if the id is taken.
    async fn create(&self, record: &CoordinationRecord) -> Result<CoordinationRecord, StoreError>;

    /// Atomically check `expected` against the stored record and apply `patch`
    async fn conditional_update(
        &self,
        id: &str,
        expected: Precondition,
        patch: RecordPatch,
    ) -> Result<CoordinationRecord, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<CoordinationRecord>, StoreError>;

    /// The `Pending`/`Accepted` record for an item, if any
    async fn get_active_for_item(&self, item_id: &str)
        -> Result<Option<CoordinationRecord>, StoreError>;

    /// Most recently created record for an item, whatever its status
    async fn get_latest_for_item(&self, item_id: &str)
        -> Result<Option<CoordinationRecord>, StoreError>;

    async fn list_by_status(
        &self,
        status: RequestStatus,
        limit: usize,
    ) -> Result<Vec<CoordinationRecord>, StoreError>;

    /// `Accepted` records whose meeting time is at or before `cutoff` and
    /// that are missing at least one party, oldest meeting first
    async fn list_auto_fail_candidates(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CoordinationRecord>, StoreError>;

    async fn get_history(&self, id: &str) -> Result<Vec<StateTransition>, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct Stored {
    seq: u64,
    record: CoordinationRecord,
}

#[derive(Debug, Default)]
struct Tables {
    next_seq: u64,
    records: HashMap<String, Stored>,
    transitions: HashMap<String, Vec<StateTransition>>,
    claims: HashMap<String, PendingClaim>,
}

/// Store backed by process memory. Every operation runs under one lock, so
/// conditional updates are linearizable.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `ConnectionError`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.records.is_empty()
    }

    /// All records of an item in creation order
    pub async fn records_for_item(&self, item_id: &str) -> Vec<CoordinationRecord> {
        let tables = self.tables.read().await;
        let mut stored: Vec<_> = tables
            .records
            .values()
            .filter(|s| s.record.item_id == item_id)
            .collect();
        stored.sort_by_key(|s| s.seq);
        stored.into_iter().map(|s| s.record.clone()).collect()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionError(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduleRequestStore for InMemoryStore {
    async fn create(&self, record: &CoordinationRecord) -> Result<CoordinationRecord, StoreError> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;

        if tables.records.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id.clone()));
        }
        if record.is_active()
            && tables
                .records
                .values()
                .any(|s| s.record.item_id == record.item_id && s.record.is_active())
        {
            return Err(StoreError::Conflict(format!(
                "item {} already has an active record",
                record.item_id
            )));
        }

        let seq = tables.next_seq;
        tables.next_seq += 1;
        tables.records.insert(
            record.id.clone(),
            Stored {
                seq,
                record: record.clone(),
            },
        );
        tables
            .transitions
            .entry(record.id.clone())
            .or_default()
            .push(StateTransition::created(record));

        Ok(record.clone())
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: Precondition,
        patch: RecordPatch,
    ) -> Result<CoordinationRecord, StoreError> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;

        let stored = tables
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        expected.check(&stored.record, &patch)?;

        let transition = patch.transition(&stored.record);
        patch.apply_to(&mut stored.record);
        let updated = stored.record.clone();

        if let Some(transition) = transition {
            tables
                .transitions
                .entry(id.to_string())
                .or_default()
                .push(transition);
        }

        Ok(updated)
    }

    async fn get(&self, id: &str) -> Result<Option<CoordinationRecord>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .tables
            .read()
            .await
            .records
            .get(id)
            .map(|s| s.record.clone()))
    }

    async fn get_active_for_item(
        &self,
        item_id: &str,
    ) -> Result<Option<CoordinationRecord>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .tables
            .read()
            .await
            .records
            .values()
            .find(|s| s.record.item_id == item_id && s.record.is_active())
            .map(|s| s.record.clone()))
    }

    async fn get_latest_for_item(
        &self,
        item_id: &str,
    ) -> Result<Option<CoordinationRecord>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .tables
            .read()
            .await
            .records
            .values()
            .filter(|s| s.record.item_id == item_id)
            .max_by_key(|s| s.seq)
            .map(|s| s.record.clone()))
    }

    async fn list_by_status(
        &self,
        status: RequestStatus,
        limit: usize,
    ) -> Result<Vec<CoordinationRecord>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        let mut results: Vec<_> = tables
            .records
            .values()
            .filter(|s| s.record.status == status)
            .collect();

        results.sort_by_key(|s| s.seq);
        Ok(results
            .into_iter()
            .take(limit)
            .map(|s| s.record.clone())
            .collect())
    }

    async fn list_auto_fail_candidates(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CoordinationRecord>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        let mut results: Vec<_> = tables
            .records
            .values()
            .map(|s| &s.record)
            .filter(|r| {
                r.status == RequestStatus::Accepted && r.meet_at <= cutoff && !r.both_present()
            })
            .cloned()
            .collect();

        results.sort_by_key(|r| r.meet_at);
        results.truncate(limit);
        Ok(results)
    }

    async fn get_history(&self, id: &str) -> Result<Vec<StateTransition>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .tables
            .read()
            .await
            .transitions
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ClaimJournal for InMemoryStore {
    async fn put_pending_claim(&self, claim: &PendingClaim) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.tables
            .write()
            .await
            .claims
            .insert(claim.record_id.clone(), claim.clone());
        Ok(())
    }

    async fn pending_claims(&self) -> Result<Vec<PendingClaim>, StoreError> {
        self.ensure_available()?;
        let mut claims: Vec<_> = self.tables.read().await.claims.values().cloned().collect();
        claims.sort_by_key(|c| c.claimed_at);
        Ok(claims)
    }

    async fn pending_claim_for(&self, record_id: &str) -> Result<Option<PendingClaim>, StoreError> {
        self.ensure_available()?;
        Ok(self.tables.read().await.claims.get(record_id).cloned())
    }

    async fn clear_pending_claim(&self, record_id: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.tables.write().await.claims.remove(record_id);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()
    }

    fn create_test_record(id: &str, item_id: &str) -> CoordinationRecord {
        CoordinationRecord::proposal(
            id.to_string(),
            item_id.to_string(),
            "finder-1".to_string(),
            "claimant-1".to_string(),
            "claimant-1".to_string(),
            MeetingTerms::new(t0() + Duration::hours(2), "Main gate"),
            t0(),
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryStore::new();
        let record = create_test_record("req-1", "item-1");

        store.create(&record).await.unwrap();

        assert_eq!(store.get("req-1").await.unwrap(), Some(record.clone()));
        assert_eq!(
            store.get_active_for_item("item-1").await.unwrap(),
            Some(record)
        );
    }

    #[tokio::test]
    async fn test_duplicate_id_error() {
        let store = InMemoryStore::new();
        let record = create_test_record("req-1", "item-1");

        store.create(&record).await.unwrap();
        let result = store.create(&record).await;

        assert!(matches!(result, Err(StoreError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_second_active_record_for_item_rejected() {
        let store = InMemoryStore::new();
        store
            .create(&create_test_record("req-1", "item-1"))
            .await
            .unwrap();

        let result = store.create(&create_test_record("req-2", "item-1")).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        // Another item is unaffected
        store
            .create(&create_test_record("req-3", "item-2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_conditional_update_bumps_version_and_records_history() {
        let store = InMemoryStore::new();
        let record = store
            .create(&create_test_record("req-1", "item-1"))
            .await
            .unwrap();

        let updated = store
            .conditional_update(
                "req-1",
                Precondition::exact(&record),
                RecordPatch::at(t0() + Duration::minutes(1))
                    .status(RequestStatus::Accepted)
                    .by("finder-1"),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, RequestStatus::Accepted);
        assert_eq!(updated.version, 2);

        let history = store.get_history("req-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from_status, None);
        assert_eq!(history[1].from_status, Some(RequestStatus::Pending));
        assert_eq!(history[1].to_status, RequestStatus::Accepted);
        assert_eq!(history[1].actor.as_deref(), Some("finder-1"));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = InMemoryStore::new();
        let record = store
            .create(&create_test_record("req-1", "item-1"))
            .await
            .unwrap();

        store
            .conditional_update(
                "req-1",
                Precondition::exact(&record),
                RecordPatch::at(t0()).location_for_test("Cafeteria"),
            )
            .await
            .unwrap();

        let result = store
            .conditional_update(
                "req-1",
                Precondition::exact(&record),
                RecordPatch::at(t0()).location_for_test("Library"),
            )
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let current = store.get("req-1").await.unwrap().unwrap();
        assert_eq!(current.location, "Cafeteria");
    }

    #[tokio::test]
    async fn test_status_only_precondition_allows_disjoint_writes() {
        let store = InMemoryStore::new();
        let mut record = create_test_record("req-1", "item-1");
        record.status = RequestStatus::Accepted;
        store.create(&record).await.unwrap();

        let expected = Precondition::status(RequestStatus::Accepted);
        store
            .conditional_update(
                "req-1",
                expected,
                RecordPatch::at(t0()).presence(Party::Finder, true),
            )
            .await
            .unwrap();
        let updated = store
            .conditional_update(
                "req-1",
                expected,
                RecordPatch::at(t0()).presence(Party::Claimant, true),
            )
            .await
            .unwrap();

        assert!(updated.both_present());
        assert_eq!(updated.version, 3);
    }

    #[tokio::test]
    async fn test_sealed_record_rejects_updates() {
        let store = InMemoryStore::new();
        let mut record = create_test_record("req-1", "item-1");
        record.status = RequestStatus::Completed;
        store.create(&record).await.unwrap();

        let result = store
            .conditional_update(
                "req-1",
                Precondition::status(RequestStatus::Completed),
                RecordPatch::at(t0()).presence(Party::Finder, false),
            )
            .await;
        assert!(matches!(result, Err(StoreError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let store = InMemoryStore::new();
        let record = store
            .create(&create_test_record("req-1", "item-1"))
            .await
            .unwrap();

        let result = store
            .conditional_update(
                "req-1",
                Precondition::exact(&record),
                RecordPatch::at(t0()).status(RequestStatus::Completed),
            )
            .await;
        assert!(matches!(result, Err(StoreError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_latest_for_item_follows_creation_order() {
        let store = InMemoryStore::new();
        let first = store
            .create(&create_test_record("req-1", "item-1"))
            .await
            .unwrap();
        store
            .conditional_update(
                "req-1",
                Precondition::exact(&first),
                RecordPatch::at(t0()).status(RequestStatus::Cancelled),
            )
            .await
            .unwrap();
        store
            .create(&create_test_record("req-2", "item-1"))
            .await
            .unwrap();

        let latest = store.get_latest_for_item("item-1").await.unwrap().unwrap();
        assert_eq!(latest.id, "req-2");
        assert_eq!(store.records_for_item("item-1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_auto_fail_candidates() {
        let store = InMemoryStore::new();

        let mut due = create_test_record("req-1", "item-1");
        due.status = RequestStatus::Accepted;
        due.meet_at = t0();

        let mut later = create_test_record("req-2", "item-2");
        later.status = RequestStatus::Accepted;
        later.meet_at = t0() + Duration::hours(3);

        let mut pending = create_test_record("req-3", "item-3");
        pending.meet_at = t0();

        // Attended meetings wait for the claimant, not the sweep
        let mut attended = create_test_record("req-4", "item-4");
        attended.status = RequestStatus::Accepted;
        attended.meet_at = t0() - Duration::hours(1);
        attended.finder_present = true;
        attended.claimant_present = true;

        for r in [&due, &later, &pending, &attended] {
            store.create(r).await.unwrap();
        }

        let candidates = store
            .list_auto_fail_candidates(t0() + Duration::minutes(1), 10)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "req-1");

        let first = store
            .list_auto_fail_candidates(t0() + Duration::minutes(1), 1)
            .await
            .unwrap();
        assert_eq!(first[0].id, "req-1");
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_fast() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);

        let result = store.get("req-1").await;
        assert!(matches!(result, Err(StoreError::ConnectionError(_))));

        store.set_unavailable(false);
        assert_eq!(store.get("req-1").await.unwrap(), None);
    }

    impl RecordPatch {
        fn location_for_test(mut self, location: &str) -> Self {
            self.location = Some(location.to_string());
            self
        }
    }
}
