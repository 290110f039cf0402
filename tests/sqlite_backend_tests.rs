use chrono::{DateTime, Duration, TimeZone, Utc};
use handoff_coordination::{
    ClaimJournal, Clock, ItemStore, LifecycleConfig, LifecycleError, PendingClaim, RecordingDispatcher,
    RequestLifecycleManager, SimulatedClock, SqliteStore,
};
use handoff_types::{Item, RequestStatus};
use std::path::Path;
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════
// TEST FIXTURES
// ═══════════════════════════════════════════════════════════════════════════

const ITEM: &str = "umbrella-7";
const FINDER: &str = "fiona";
const CLAIMANT: &str = "carl";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap()
}

type SqliteManager = RequestLifecycleManager<SqliteStore, SqliteStore>;

async fn open(path: &Path, clock: Arc<SimulatedClock>) -> (SqliteManager, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::new(path).await.unwrap());
    let manager = RequestLifecycleManager::new(store.clone(), store.clone(), LifecycleConfig::default())
        .with_clock(clock)
        .with_notifier(Arc::new(RecordingDispatcher::new()));
    (manager, store)
}

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE BACKEND TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_full_handoff_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(SimulatedClock::new(start()));
    let (manager, store) = open(&dir.path().join("handoff.db"), clock.clone()).await;
    store.upsert_item(&Item::open(ITEM, FINDER)).await.unwrap();

    let meet_at = start() + Duration::hours(1);
    let record = manager
        .propose(CLAIMANT, ITEM, meet_at, "Bus depot")
        .await
        .unwrap();
    manager.accept(FINDER, &record.id).await.unwrap();

    clock.set(meet_at);
    manager.set_presence(FINDER, &record.id, true).await.unwrap();
    manager.set_presence(CLAIMANT, &record.id, true).await.unwrap();
    manager
        .set_note(CLAIMANT, &record.id, "blue jacket")
        .await
        .unwrap();

    let done = manager.confirm_success(CLAIMANT, &record.id).await.unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    assert_eq!(done.claimant_note.as_deref(), Some("blue jacket"));
    assert!(store.get_item(ITEM).await.unwrap().is_claimed());

    let statuses: Vec<_> = manager
        .history(&record.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.to_status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            RequestStatus::Pending,
            RequestStatus::Accepted,
            RequestStatus::Completed
        ]
    );

    // A claimed item takes no further proposals
    let err = manager
        .propose(CLAIMANT, ITEM, clock.now() + Duration::hours(2), "Bus depot")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidState(_)));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("handoff.db");
    let clock = Arc::new(SimulatedClock::new(start()));
    let meet_at = start() + Duration::hours(1);

    let record_id = {
        let (manager, store) = open(&path, clock.clone()).await;
        store.upsert_item(&Item::open(ITEM, FINDER)).await.unwrap();
        let record = manager
            .propose(CLAIMANT, ITEM, meet_at, "Bus depot")
            .await
            .unwrap();
        manager.accept(FINDER, &record.id).await.unwrap();
        record.id
    };

    let (manager, _store) = open(&path, clock.clone()).await;
    let active = manager.get_active_for_item(ITEM).await.unwrap().unwrap();
    assert_eq!(active.id, record_id);
    assert_eq!(active.status, RequestStatus::Accepted);

    clock.set(meet_at + Duration::minutes(10));
    let report = manager.sweep_expired().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(
        manager.get(&record_id).await.unwrap().status,
        RequestStatus::Failed
    );
}

#[tokio::test]
async fn test_interrupted_claim_rolls_forward_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("handoff.db");
    let clock = Arc::new(SimulatedClock::new(start()));
    let meet_at = start() + Duration::hours(1);

    let record_id = {
        let (manager, store) = open(&path, clock.clone()).await;
        store.upsert_item(&Item::open(ITEM, FINDER)).await.unwrap();
        let record = manager
            .propose(CLAIMANT, ITEM, meet_at, "Bus depot")
            .await
            .unwrap();
        manager.accept(FINDER, &record.id).await.unwrap();

        clock.set(meet_at);
        manager.set_presence(FINDER, &record.id, true).await.unwrap();
        let ready = manager.set_presence(CLAIMANT, &record.id, true).await.unwrap();

        // Process dies after claiming the item, before completing the record
        let claim = PendingClaim {
            record_id: ready.id.clone(),
            item_id: ITEM.to_string(),
            expected_version: ready.version,
            claimed_at: clock.now(),
        };
        store.put_pending_claim(&claim).await.unwrap();
        store.set_claimed(ITEM, claim.claimed_at).await.unwrap();
        ready.id
    };

    let (manager, store) = open(&path, clock.clone()).await;
    let report = manager.recover_pending_claims().await.unwrap();
    assert_eq!(report.rolled_forward, 1);
    assert_eq!(report.compensated, 0);

    assert_eq!(
        manager.get(&record_id).await.unwrap().status,
        RequestStatus::Completed
    );
    assert!(store.get_item(ITEM).await.unwrap().is_claimed());
    assert!(store.pending_claims().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_process_cannot_open_parallel_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("handoff.db");
    let clock = Arc::new(SimulatedClock::new(start()));

    let (first, store) = open(&path, clock.clone()).await;
    let (second, _) = open(&path, clock.clone()).await;
    store.upsert_item(&Item::open(ITEM, FINDER)).await.unwrap();

    let record = first
        .propose(CLAIMANT, ITEM, start() + Duration::hours(1), "Bus depot")
        .await
        .unwrap();

    // The other process sees the active record and edits it in place
    let edited = second
        .propose(FINDER, ITEM, start() + Duration::hours(2), "Bus depot")
        .await
        .unwrap();
    assert_eq!(edited.id, record.id);
    assert_eq!(edited.version, record.version + 1);
}

#[tokio::test]
async fn test_sub_millisecond_meeting_time_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(SimulatedClock::new(start()));
    let (manager, store) = open(&dir.path().join("handoff.db"), clock.clone()).await;
    store.upsert_item(&Item::open(ITEM, FINDER)).await.unwrap();

    let meet_at = start() + Duration::hours(1) + Duration::microseconds(1_500);
    let created = manager
        .propose(CLAIMANT, ITEM, meet_at, "Bus depot")
        .await
        .unwrap();

    // What the caller and the feed see is what a fresh read returns
    let reread = manager.get(&created.id).await.unwrap();
    assert_eq!(reread, created);
    assert_eq!(reread.meet_at, start() + Duration::hours(1) + Duration::milliseconds(1));

    let err = manager
        .propose(CLAIMANT, ITEM, meet_at, "Bus depot")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NoChanges));
    assert_eq!(manager.get(&created.id).await.unwrap().version, created.version);
}
