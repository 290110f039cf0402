use chrono::{Duration, Utc};
use handoff_config::AppConfig;
use handoff_metrics::metrics::PROPOSALS_CREATED;
use handoff_types::Item;
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use unlost_handoff::{in_memory_service, lifecycle_config, retry_policy, sqlite_service};

#[test]
fn test_lifecycle_config_from_app_config() {
    let mut config = AppConfig::default();
    config.lifecycle.min_lead_time_secs = 900;
    config.notifications.enabled = false;
    config.auto_fail.batch_size = 25;

    let lifecycle = lifecycle_config(&config);
    assert_eq!(lifecycle.min_lead_time, Duration::minutes(15));
    assert_eq!(lifecycle.window_opens_before, Duration::minutes(5));
    assert_eq!(lifecycle.window_closes_after, Duration::minutes(10));
    assert!(!lifecycle.notifications_enabled);
    assert_eq!(lifecycle.sweep_batch_size, 25);
    assert_eq!(lifecycle.store_timeout, StdDuration::from_secs(5));

    let retry = retry_policy(&config.retry);
    assert_eq!(retry.max_attempts, 5);
    assert_eq!(retry.initial_backoff, StdDuration::from_millis(100));
}

#[tokio::test]
async fn test_service_feeds_metrics_and_shuts_down() {
    let config = AppConfig::default();
    let mut service = in_memory_service(&config);
    service.start().await.unwrap();

    service
        .manager()
        .items()
        .put(Item::open("keys-1", "finder"))
        .await;

    let before = PROPOSALS_CREATED.get();
    service
        .manager()
        .propose("claimant", "keys-1", Utc::now() + Duration::hours(1), "Front desk")
        .await
        .unwrap();

    let mut observed = false;
    for _ in 0..50 {
        if PROPOSALS_CREATED.get() > before {
            observed = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert!(observed, "metrics consumer never saw the proposal");

    let mut signal = service.shutdown_signal();
    tokio::time::timeout(StdDuration::from_secs(5), service.shutdown())
        .await
        .expect("shutdown hangs");
    assert!(*signal.borrow_and_update());
}

#[tokio::test]
async fn test_reloaded_poll_interval_is_applied() {
    let mut config = AppConfig::default();
    config.auto_fail.enabled = false;

    let mut service = in_memory_service(&config);
    service.start().await.unwrap();
    assert_eq!(service.poll_interval(), StdDuration::from_secs(30));

    let (tx, rx) = watch::channel(config.clone());
    service.follow_config(rx);

    config.auto_fail.poll_interval_secs = 7;
    tx.send(config).unwrap();

    let mut applied = false;
    for _ in 0..50 {
        if service.poll_interval() == StdDuration::from_secs(7) {
            applied = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert!(applied);

    service.shutdown().await;
}

#[tokio::test]
async fn test_sqlite_service_starts_on_fresh_database() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::production();
    config.store.sqlite_path = dir
        .path()
        .join("handoff.db")
        .to_string_lossy()
        .into_owned();

    let mut service = sqlite_service(&config).await.unwrap();
    service.start().await.unwrap();
    assert!(service
        .manager()
        .get_latest_for_item("nothing-here")
        .await
        .unwrap()
        .is_none());
    service.shutdown().await;
}
