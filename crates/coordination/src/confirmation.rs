use async_trait::async_trait;
use chrono::{DateTime, Utc};
use handoff_types::{CoordinationRecord, NotificationKind, Party, RequestStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LifecycleError;
use crate::items::ItemStore;
use crate::manager::{require_party, RequestLifecycleManager};
use crate::store::{Precondition, RecordPatch, ScheduleRequestStore, StoreError};

// ═══════════════════════════════════════════════════════════════════════════
// CLAIM JOURNAL
// ═══════════════════════════════════════════════════════════════════════════

/// Intent to complete a claim, written before the item is touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClaim {
    pub record_id: String,
    pub item_id: String,
    /// Record version the claim was confirmed against
    pub expected_version: u64,
    pub claimed_at: DateTime<Utc>,
}

/// Durable log of claims between "item claimed" and "record completed"
#[async_trait]
pub trait ClaimJournal: Send + Sync {
    async fn put_pending_claim(&self, claim: &PendingClaim) -> Result<(), StoreError>;

    async fn pending_claims(&self) -> Result<Vec<PendingClaim>, StoreError>;

    async fn pending_claim_for(&self, record_id: &str) -> Result<Option<PendingClaim>, StoreError>;

    async fn clear_pending_claim(&self, record_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Claims finished (record completed)
    pub rolled_forward: usize,
    /// Claims undone (item reopened)
    pub compensated: usize,
    /// Claims left for a later pass because the store was unavailable
    pub deferred: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFIRMATION
// ═══════════════════════════════════════════════════════════════════════════

impl<S, I> RequestLifecycleManager<S, I>
where
    S: ScheduleRequestStore + ClaimJournal,
    I: ItemStore,
{
    /// Claimant confirms the item was handed over.
    ///
    /// Completes the record and claims the item together. Retrying after a
    /// `StoreUnavailable` resumes the same claim.
    pub async fn confirm_success(
        &self,
        actor: &str,
        record_id: &str,
    ) -> Result<CoordinationRecord, LifecycleError> {
        let record = self.load(record_id).await?;
        require_claimant(&record, actor)?;

        let journaled = self
            .guarded("pending_claim_for", self.store.pending_claim_for(record_id))
            .await?;
        if let Some(claim) = journaled {
            info!(record_id = %record_id, "resuming interrupted claim");
            return self.finish_claim(&claim).await;
        }

        require_ready_to_confirm(&record)?;

        let claim = PendingClaim {
            record_id: record.id.clone(),
            item_id: record.item_id.clone(),
            expected_version: record.version,
            claimed_at: self.clock.now(),
        };
        self.guarded("put_pending_claim", self.store.put_pending_claim(&claim))
            .await?;

        self.finish_claim(&claim).await
    }

    /// Claimant reports the meeting happened but the retrieval did not
    pub async fn confirm_failure(
        &self,
        actor: &str,
        record_id: &str,
    ) -> Result<CoordinationRecord, LifecycleError> {
        let record = self.load(record_id).await?;
        require_claimant(&record, actor)?;
        require_ready_to_confirm(&record)?;

        let patch = RecordPatch::at(self.clock.now())
            .status(RequestStatus::Failed)
            .by(actor)
            .details("claimant reported unsuccessful retrieval");
        let failed = self.commit(&record, Precondition::exact(&record), patch).await?;

        info!(record_id = %record_id, "retrieval reported unsuccessful");
        self.notify(&failed.finder_id, NotificationKind::ClaimFailed, &failed)
            .await;
        Ok(failed)
    }

    /// Settle every journaled claim: roll forward when the record is still
    /// as confirmed, otherwise reopen the item
    pub async fn recover_pending_claims(&self) -> Result<RecoveryReport, LifecycleError> {
        let claims = self
            .guarded("pending_claims", self.store.pending_claims())
            .await?;
        let mut report = RecoveryReport::default();

        for claim in claims {
            match self.finish_claim(&claim).await {
                Ok(_) => report.rolled_forward += 1,
                Err(LifecycleError::StoreUnavailable(msg)) => {
                    warn!(
                        record_id = %claim.record_id,
                        error = %msg,
                        error_type = "store_unavailable",
                        "claim recovery deferred"
                    );
                    report.deferred += 1;
                }
                Err(_) => report.compensated += 1,
            }
        }

        if report.rolled_forward + report.compensated + report.deferred > 0 {
            info!(
                rolled_forward = report.rolled_forward,
                compensated = report.compensated,
                deferred = report.deferred,
                "pending claims processed"
            );
        }
        Ok(report)
    }

    /// Drive a journaled claim to a final state. Safe to call repeatedly.
    async fn finish_claim(&self, claim: &PendingClaim) -> Result<CoordinationRecord, LifecycleError> {
        let record = self
            .guarded("get", self.store.get(&claim.record_id))
            .await?;
        let Some(record) = record else {
            self.compensate(claim).await?;
            return Err(LifecycleError::NotFound(claim.record_id.clone()));
        };

        match record.status {
            RequestStatus::Completed => {
                self.clear_claim(claim).await?;
                Ok(record)
            }
            RequestStatus::Accepted if record.version == claim.expected_version => {
                self.guarded(
                    "set_claimed",
                    self.items.set_claimed(&claim.item_id, claim.claimed_at),
                )
                .await?;

                let expected = Precondition {
                    status: RequestStatus::Accepted,
                    version: Some(claim.expected_version),
                };
                let patch = RecordPatch::at(claim.claimed_at)
                    .status(RequestStatus::Completed)
                    .by(&record.claimant_id)
                    .details("retrieval confirmed");

                match self.commit(&record, expected, patch).await {
                    Ok(completed) => {
                        self.clear_claim(claim).await?;
                        info!(
                            record_id = %completed.id,
                            item_id = %completed.item_id,
                            "item claimed"
                        );
                        self.notify(&completed.finder_id, NotificationKind::ClaimCompleted, &completed)
                            .await;
                        Ok(completed)
                    }
                    Err(err @ LifecycleError::StoreUnavailable(_)) => Err(err),
                    Err(err) => {
                        // Another caller finishing the same claim may have
                        // committed first; the item must then stay claimed
                        let current = self
                            .guarded("get", self.store.get(&claim.record_id))
                            .await?;
                        match current {
                            Some(current) if current.status == RequestStatus::Completed => {
                                self.clear_claim(claim).await?;
                                Ok(current)
                            }
                            _ => {
                                self.compensate(claim).await?;
                                Err(err)
                            }
                        }
                    }
                }
            }
            _ => {
                self.compensate(claim).await?;
                Err(LifecycleError::Conflict {
                    latest: Some(Box::new(record)),
                })
            }
        }
    }

    async fn compensate(&self, claim: &PendingClaim) -> Result<(), LifecycleError> {
        warn!(
            record_id = %claim.record_id,
            item_id = %claim.item_id,
            error_type = "claim_compensated",
            "record moved on before the claim committed, reopening item"
        );
        self.guarded("reopen", self.items.reopen(&claim.item_id))
            .await?;
        self.clear_claim(claim).await
    }

    async fn clear_claim(&self, claim: &PendingClaim) -> Result<(), LifecycleError> {
        self.guarded(
            "clear_pending_claim",
            self.store.clear_pending_claim(&claim.record_id),
        )
        .await
    }
}

fn require_claimant(record: &CoordinationRecord, actor: &str) -> Result<(), LifecycleError> {
    match require_party(record, actor)? {
        Party::Claimant => Ok(()),
        Party::Finder => Err(LifecycleError::PermissionDenied(
            "only the claimant can confirm the retrieval".to_string(),
        )),
    }
}

fn require_ready_to_confirm(record: &CoordinationRecord) -> Result<(), LifecycleError> {
    if record.status != RequestStatus::Accepted {
        return Err(LifecycleError::InvalidState(format!(
            "cannot confirm a {} request",
            record.status
        )));
    }
    if !record.both_present() {
        return Err(LifecycleError::InvalidState(
            "both parties must be marked present before confirming".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::manager::tests::{create_test_harness, t0, Harness};
    use chrono::Duration;

    async fn attended_meeting(h: &Harness) -> CoordinationRecord {
        let meet_at = t0() + Duration::hours(1);
        let record = h
            .manager
            .propose("claimant", "item-1", meet_at, "Gate")
            .await
            .unwrap();
        h.manager.accept("finder", &record.id).await.unwrap();

        h.clock.set(meet_at - Duration::minutes(2));
        h.manager.set_presence("finder", &record.id, true).await.unwrap();
        h.clock.set(meet_at + Duration::minutes(1));
        h.manager
            .set_presence("claimant", &record.id, true)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_confirm_success_claims_item() {
        let h = create_test_harness().await;
        let record = attended_meeting(&h).await;

        let completed = h.manager.confirm_success("claimant", &record.id).await.unwrap();
        assert_eq!(completed.status, RequestStatus::Completed);

        let item = h.items.get_item("item-1").await.unwrap();
        assert!(item.is_claimed());
        assert_eq!(item.claimed_at, Some(h.clock.now()));
        assert!(h.store.pending_claims().await.unwrap().is_empty());

        let sent = h.notifier.sent_to("finder").await;
        assert!(sent.iter().any(|e| e.kind == NotificationKind::ClaimCompleted));
    }

    #[tokio::test]
    async fn test_confirm_requires_both_present() {
        let h = create_test_harness().await;
        let meet_at = t0() + Duration::hours(1);
        let record = h
            .manager
            .propose("claimant", "item-1", meet_at, "Gate")
            .await
            .unwrap();
        h.manager.accept("finder", &record.id).await.unwrap();
        h.clock.set(meet_at);
        h.manager.set_presence("claimant", &record.id, true).await.unwrap();

        let result = h.manager.confirm_success("claimant", &record.id).await;
        assert!(matches!(result, Err(LifecycleError::InvalidState(_))));
        assert!(!h.items.get_item("item-1").await.unwrap().is_claimed());
    }

    #[tokio::test]
    async fn test_only_claimant_confirms() {
        let h = create_test_harness().await;
        let record = attended_meeting(&h).await;

        let result = h.manager.confirm_success("finder", &record.id).await;
        assert!(matches!(result, Err(LifecycleError::PermissionDenied(_))));

        let result = h.manager.confirm_failure("finder", &record.id).await;
        assert!(matches!(result, Err(LifecycleError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_confirm_failure_leaves_item_open() {
        let h = create_test_harness().await;
        let record = attended_meeting(&h).await;

        let failed = h.manager.confirm_failure("claimant", &record.id).await.unwrap();
        assert_eq!(failed.status, RequestStatus::Failed);
        assert!(!h.items.get_item("item-1").await.unwrap().is_claimed());
    }

    #[tokio::test]
    async fn test_item_outage_is_retryable_and_resumes() {
        let h = create_test_harness().await;
        let record = attended_meeting(&h).await;

        h.items.set_unavailable(true);
        let err = h.manager.confirm_success("claimant", &record.id).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.store.pending_claims().await.unwrap().len(), 1);
        assert_eq!(
            h.manager.get(&record.id).await.unwrap().status,
            RequestStatus::Accepted
        );

        h.items.set_unavailable(false);
        let completed = h.manager.confirm_success("claimant", &record.id).await.unwrap();
        assert_eq!(completed.status, RequestStatus::Completed);
        assert!(h.items.get_item("item-1").await.unwrap().is_claimed());
        assert!(h.store.pending_claims().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recovery_rolls_forward() {
        let h = create_test_harness().await;
        let record = attended_meeting(&h).await;

        // Crash right after the item was claimed
        let claim = PendingClaim {
            record_id: record.id.clone(),
            item_id: record.item_id.clone(),
            expected_version: record.version,
            claimed_at: h.clock.now(),
        };
        h.store.put_pending_claim(&claim).await.unwrap();
        h.items.set_claimed("item-1", claim.claimed_at).await.unwrap();

        let report = h.manager.recover_pending_claims().await.unwrap();
        assert_eq!(report.rolled_forward, 1);
        assert_eq!(
            h.manager.get(&record.id).await.unwrap().status,
            RequestStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_recovery_compensates_when_record_moved_on() {
        let h = create_test_harness().await;
        let record = attended_meeting(&h).await;

        let claim = PendingClaim {
            record_id: record.id.clone(),
            item_id: record.item_id.clone(),
            expected_version: record.version,
            claimed_at: h.clock.now(),
        };
        h.store.put_pending_claim(&claim).await.unwrap();
        h.items.set_claimed("item-1", claim.claimed_at).await.unwrap();

        // The meeting failed before the claim could commit
        h.manager.confirm_failure("claimant", &record.id).await.unwrap();

        let report = h.manager.recover_pending_claims().await.unwrap();
        assert_eq!(report.compensated, 1);
        assert!(!h.items.get_item("item-1").await.unwrap().is_claimed());
        assert!(h.store.pending_claims().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recovery_defers_during_outage() {
        let h = create_test_harness().await;
        let record = attended_meeting(&h).await;
        let claim = PendingClaim {
            record_id: record.id.clone(),
            item_id: record.item_id.clone(),
            expected_version: record.version,
            claimed_at: h.clock.now(),
        };
        h.store.put_pending_claim(&claim).await.unwrap();

        h.items.set_unavailable(true);
        let report = h.manager.recover_pending_claims().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(h.store.pending_claims().await.unwrap().len(), 1);
    }
}
