use chrono::{DateTime, Utc};
use handoff_types::{CoordinationRecord, Item, MeetingTerms, NotificationKind, RequestStatus};
use tracing::info;
use uuid::Uuid;

use crate::confirmation::ClaimJournal;
use crate::error::LifecycleError;
use crate::items::ItemStore;
use crate::manager::{require_party, RequestLifecycleManager};
use crate::store::{Precondition, RecordPatch, ScheduleRequestStore};

/// How a proposal will be written
#[derive(Debug, Clone, PartialEq)]
pub enum WritePlan {
    /// First record for the item
    Create { claimant_id: String },
    /// Edit the active record in place
    Update { record: CoordinationRecord },
    /// Seal a failed or cancelled record, then open a new attempt
    Supersede {
        previous: CoordinationRecord,
        claimant_id: String,
    },
    /// A previous supersede committed but its follow-up record was never
    /// created
    Resume { claimant_id: String },
}

impl WritePlan {
    pub fn label(&self) -> &'static str {
        match self {
            WritePlan::Create { .. } => "create",
            WritePlan::Update { .. } => "update",
            WritePlan::Supersede { .. } => "supersede",
            WritePlan::Resume { .. } => "resume",
        }
    }
}

/// Decides whether a proposal edits the current record or starts a new one
pub struct RescheduleCoordinator;

impl RescheduleCoordinator {
    /// Pure decision over the item, its latest record and the new terms.
    /// Time validation happens before this is called.
    pub fn plan(
        actor: &str,
        item: &Item,
        latest: Option<&CoordinationRecord>,
        terms: &MeetingTerms,
    ) -> Result<WritePlan, LifecycleError> {
        let Some(latest) = latest else {
            if actor == item.finder_id {
                return Err(LifecycleError::PermissionDenied(
                    "the finder cannot open a claim on their own item".to_string(),
                ));
            }
            return Ok(WritePlan::Create {
                claimant_id: actor.to_string(),
            });
        };

        require_party(latest, actor)?;

        match latest.status {
            RequestStatus::Pending | RequestStatus::Accepted => {
                if latest.terms().same_as(terms.meet_at, &terms.location) {
                    return Err(LifecycleError::NoChanges);
                }
                Ok(WritePlan::Update {
                    record: latest.clone(),
                })
            }
            RequestStatus::Failed | RequestStatus::Cancelled => Ok(WritePlan::Supersede {
                previous: latest.clone(),
                claimant_id: latest.claimant_id.clone(),
            }),
            RequestStatus::Superseded => Ok(WritePlan::Resume {
                claimant_id: latest.claimant_id.clone(),
            }),
            RequestStatus::Completed => Err(LifecycleError::InvalidState(format!(
                "item {} was already retrieved",
                latest.item_id
            ))),
        }
    }
}

impl<S, I> RequestLifecycleManager<S, I>
where
    S: ScheduleRequestStore + ClaimJournal,
    I: ItemStore,
{
    pub(crate) async fn execute_plan(
        &self,
        actor: &str,
        item: &Item,
        plan: WritePlan,
        terms: MeetingTerms,
        now: DateTime<Utc>,
    ) -> Result<CoordinationRecord, LifecycleError> {
        match plan {
            WritePlan::Create { claimant_id } | WritePlan::Resume { claimant_id } => {
                self.open_attempt(actor, item, claimant_id, terms, now).await
            }
            WritePlan::Update { record } => {
                let patch = RecordPatch::at(now)
                    .status(RequestStatus::Pending)
                    .terms(terms)
                    .modified_by(actor)
                    .reset_attendance()
                    .by(actor)
                    .details("meeting terms changed");
                let updated = self.commit(&record, Precondition::exact(&record), patch).await?;

                if let Some(party) = updated.party_of(actor) {
                    self.notify(
                        updated.party_id(party.other()),
                        NotificationKind::ProposalUpdated,
                        &updated,
                    )
                    .await;
                }
                Ok(updated)
            }
            WritePlan::Supersede {
                previous,
                claimant_id,
            } => {
                let patch = RecordPatch::at(now)
                    .status(RequestStatus::Superseded)
                    .by(actor)
                    .details("replaced by a new proposal");
                self.commit(&previous, Precondition::exact(&previous), patch)
                    .await?;
                info!(previous_id = %previous.id, "previous attempt superseded");

                self.open_attempt(actor, item, claimant_id, terms, now).await
            }
        }
    }

    async fn open_attempt(
        &self,
        actor: &str,
        item: &Item,
        claimant_id: String,
        terms: MeetingTerms,
        now: DateTime<Utc>,
    ) -> Result<CoordinationRecord, LifecycleError> {
        let record = CoordinationRecord::proposal(
            format!("req-{}", Uuid::new_v4()),
            item.id.clone(),
            item.finder_id.clone(),
            claimant_id,
            actor.to_string(),
            terms,
            now,
        );
        let created = self.insert(record).await?;

        if let Some(party) = created.party_of(actor) {
            self.notify(
                created.party_id(party.other()),
                NotificationKind::ProposalReceived,
                &created,
            )
            .await;
        }
        Ok(created)
    }
}
