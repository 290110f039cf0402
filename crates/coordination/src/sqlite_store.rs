use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use handoff_types::{CoordinationRecord, Item, ItemDisposition, RequestStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use crate::confirmation::{ClaimJournal, PendingClaim};
use crate::items::{ItemStore, ItemStoreError};
use crate::store::{Precondition, RecordPatch, ScheduleRequestStore, StateTransition, StoreError};

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

/// Durable store. The one-active-record-per-item rule is a partial unique
/// index, so it holds even across processes sharing the database file.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at the given path
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Each connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let migrations = [
            include_str!("../migrations/001_create_coordination_records.sql"),
            include_str!("../migrations/002_one_active_record_per_item.sql"),
            include_str!("../migrations/003_create_transitions.sql"),
            include_str!("../migrations/004_create_items.sql"),
            include_str!("../migrations/005_create_pending_claims.sql"),
        ];

        for migration in migrations {
            sqlx::query(migration)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        }

        Ok(())
    }

    /// Register or replace an item listing
    pub async fn upsert_item(&self, item: &Item) -> Result<(), ItemStoreError> {
        sqlx::query(
            r#"
            INSERT INTO items (id, finder_id, disposition, claimed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                finder_id = excluded.finder_id,
                disposition = excluded.disposition,
                claimed_at = excluded.claimed_at
            "#,
        )
        .bind(&item.id)
        .bind(&item.finder_id)
        .bind(item.disposition.as_str())
        .bind(item.claimed_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await
        .map_err(|e| ItemStoreError::Unavailable(e.to_string()))?;

        Ok(())
    }

    fn row_to_record(row: &SqliteRow) -> Result<CoordinationRecord, StoreError> {
        let status = parse_status(row.get("status"))?;

        Ok(CoordinationRecord {
            id: row.get("id"),
            item_id: row.get("item_id"),
            finder_id: row.get("finder_id"),
            claimant_id: row.get("claimant_id"),
            last_modified_by: row.get("last_modified_by"),
            meet_at: from_millis(row.get("meet_at"))?,
            location: row.get("location"),
            status,
            finder_present: row.get("finder_present"),
            claimant_present: row.get("claimant_present"),
            finder_note: row.get("finder_note"),
            claimant_note: row.get("claimant_note"),
            version: row.get::<i64, _>("version") as u64,
            created_at: from_millis(row.get("created_at"))?,
            updated_at: from_millis(row.get("updated_at"))?,
        })
    }

    fn row_to_item(row: &SqliteRow) -> Result<Item, ItemStoreError> {
        let disposition = match row.get::<String, _>("disposition").as_str() {
            "open" => ItemDisposition::Open,
            "claimed" => ItemDisposition::Claimed,
            other => {
                return Err(ItemStoreError::Unavailable(format!(
                    "unknown item disposition: {}",
                    other
                )))
            }
        };
        let claimed_at = row
            .get::<Option<i64>, _>("claimed_at")
            .map(from_millis)
            .transpose()
            .map_err(|e| ItemStoreError::Unavailable(e.to_string()))?;

        Ok(Item {
            id: row.get("id"),
            finder_id: row.get("finder_id"),
            disposition,
            claimed_at,
        })
    }

    async fn fetch_one_record(
        &self,
        sql: &str,
        key: &str,
    ) -> Result<Option<CoordinationRecord>, StoreError> {
        let row = sqlx::query(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ScheduleRequestStore for SqliteStore {
    async fn create(&self, record: &CoordinationRecord) -> Result<CoordinationRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO coordination_records (
                id, item_id, finder_id, claimant_id, last_modified_by,
                meet_at, location, status,
                finder_present, claimant_present, finder_note, claimant_note,
                version, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.item_id)
        .bind(&record.finder_id)
        .bind(&record.claimant_id)
        .bind(&record.last_modified_by)
        .bind(record.meet_at.timestamp_millis())
        .bind(&record.location)
        .bind(record.status.as_str())
        .bind(record.finder_present)
        .bind(record.claimant_present)
        .bind(&record.finder_note)
        .bind(&record.claimant_note)
        .bind(record.version as i64)
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return if db_err.message().contains("coordination_records.id") {
                    Err(StoreError::DuplicateId(record.id.clone()))
                } else {
                    Err(StoreError::Conflict(format!(
                        "item {} already has an active record",
                        record.item_id
                    )))
                };
            }
            Err(e) => return Err(StoreError::DatabaseError(e.to_string())),
        }

        insert_transition(&mut tx, &StateTransition::created(record)).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(record.clone())
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected: Precondition,
        patch: RecordPatch,
    ) -> Result<CoordinationRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let row = sqlx::query("SELECT * FROM coordination_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        let current = match row {
            Some(row) => Self::row_to_record(&row)?,
            None => return Err(StoreError::NotFound(id.to_string())),
        };

        expected.check(&current, &patch)?;

        let mut updated = current.clone();
        patch.apply_to(&mut updated);

        // The version guard catches writers in other processes
        let result = sqlx::query(
            r#"
            UPDATE coordination_records
            SET last_modified_by = ?, meet_at = ?, location = ?, status = ?,
                finder_present = ?, claimant_present = ?,
                finder_note = ?, claimant_note = ?,
                version = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&updated.last_modified_by)
        .bind(updated.meet_at.timestamp_millis())
        .bind(&updated.location)
        .bind(updated.status.as_str())
        .bind(updated.finder_present)
        .bind(updated.claimant_present)
        .bind(&updated.finder_note)
        .bind(&updated.claimant_note)
        .bind(updated.version as i64)
        .bind(updated.updated_at.timestamp_millis())
        .bind(id)
        .bind(current.version as i64)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {}
            Ok(_) => {
                return Err(StoreError::Conflict(format!(
                    "record {} changed during update",
                    id
                )))
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(StoreError::Conflict(format!(
                    "item {} already has an active record",
                    current.item_id
                )))
            }
            Err(e) => return Err(StoreError::DatabaseError(e.to_string())),
        }

        if let Some(transition) = patch.transition(&current) {
            insert_transition(&mut tx, &transition).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(updated)
    }

    async fn get(&self, id: &str) -> Result<Option<CoordinationRecord>, StoreError> {
        self.fetch_one_record("SELECT * FROM coordination_records WHERE id = ?", id)
            .await
    }

    async fn get_active_for_item(
        &self,
        item_id: &str,
    ) -> Result<Option<CoordinationRecord>, StoreError> {
        self.fetch_one_record(
            r#"
            SELECT * FROM coordination_records
            WHERE item_id = ? AND status IN ('pending', 'accepted')
            LIMIT 1
            "#,
            item_id,
        )
        .await
    }

    async fn get_latest_for_item(
        &self,
        item_id: &str,
    ) -> Result<Option<CoordinationRecord>, StoreError> {
        self.fetch_one_record(
            "SELECT * FROM coordination_records WHERE item_id = ? ORDER BY seq DESC LIMIT 1",
            item_id,
        )
        .await
    }

    async fn list_by_status(
        &self,
        status: RequestStatus,
        limit: usize,
    ) -> Result<Vec<CoordinationRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM coordination_records WHERE status = ? ORDER BY seq ASC LIMIT ?",
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn list_auto_fail_candidates(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CoordinationRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM coordination_records
            WHERE status = 'accepted' AND meet_at <= ?
              AND NOT (finder_present AND claimant_present)
            ORDER BY meet_at ASC
            LIMIT ?
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn get_history(&self, id: &str) -> Result<Vec<StateTransition>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM coordination_transitions WHERE record_id = ? ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let from_status = row
                    .get::<Option<String>, _>("from_status")
                    .map(|s| parse_status(&s))
                    .transpose()?;

                Ok(StateTransition {
                    record_id: row.get("record_id"),
                    from_status,
                    to_status: parse_status(row.get("to_status"))?,
                    actor: row.get("actor"),
                    timestamp: from_millis(row.get("timestamp"))?,
                    details: row.get("details"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl ClaimJournal for SqliteStore {
    async fn put_pending_claim(&self, claim: &PendingClaim) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pending_claims (record_id, item_id, expected_version, claimed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(record_id) DO UPDATE SET
                item_id = excluded.item_id,
                expected_version = excluded.expected_version,
                claimed_at = excluded.claimed_at
            "#,
        )
        .bind(&claim.record_id)
        .bind(&claim.item_id)
        .bind(claim.expected_version as i64)
        .bind(claim.claimed_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn pending_claims(&self) -> Result<Vec<PendingClaim>, StoreError> {
        let rows = sqlx::query("SELECT * FROM pending_claims ORDER BY claimed_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(row_to_claim).collect()
    }

    async fn pending_claim_for(&self, record_id: &str) -> Result<Option<PendingClaim>, StoreError> {
        let row = sqlx::query("SELECT * FROM pending_claims WHERE record_id = ?")
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        row.as_ref().map(row_to_claim).transpose()
    }

    async fn clear_pending_claim(&self, record_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pending_claims WHERE record_id = ?")
            .bind(record_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn get_item(&self, item_id: &str) -> Result<Item, ItemStoreError> {
        let row = sqlx::query("SELECT * FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ItemStoreError::Unavailable(e.to_string()))?;

        match row {
            Some(row) => Self::row_to_item(&row),
            None => Err(ItemStoreError::NotFound(item_id.to_string())),
        }
    }

    async fn set_claimed(&self, item_id: &str, at: DateTime<Utc>) -> Result<Item, ItemStoreError> {
        sqlx::query(
            "UPDATE items SET disposition = 'claimed', claimed_at = ? WHERE id = ? AND disposition = 'open'",
        )
        .bind(at.timestamp_millis())
        .bind(item_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ItemStoreError::Unavailable(e.to_string()))?;

        self.get_item(item_id).await
    }

    async fn reopen(&self, item_id: &str) -> Result<Item, ItemStoreError> {
        sqlx::query("UPDATE items SET disposition = 'open', claimed_at = NULL WHERE id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ItemStoreError::Unavailable(e.to_string()))?;

        self.get_item(item_id).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

async fn insert_transition(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    transition: &StateTransition,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO coordination_transitions (
            record_id, from_status, to_status, actor, timestamp, details
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&transition.record_id)
    .bind(transition.from_status.map(|s| s.as_str()))
    .bind(transition.to_status.as_str())
    .bind(&transition.actor)
    .bind(transition.timestamp.timestamp_millis())
    .bind(&transition.details)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

    Ok(())
}

fn row_to_claim(row: &SqliteRow) -> Result<PendingClaim, StoreError> {
    Ok(PendingClaim {
        record_id: row.get("record_id"),
        item_id: row.get("item_id"),
        expected_version: row.get::<i64, _>("expected_version") as u64,
        claimed_at: from_millis(row.get("claimed_at"))?,
    })
}

fn parse_status(s: &str) -> Result<RequestStatus, StoreError> {
    RequestStatus::from_str(s).map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::SerializationError(format!("timestamp out of range: {}", ms)))
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
