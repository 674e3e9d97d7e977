//! Tests for the update scheduler

use super::{ts, utc_clock};
use crate::scheduling::types::{RetryPolicy, ScheduleState};
use crate::scheduling::{UpdateCallback, UpdateScheduler};
use crate::state::StateStore;
use shared::config::SchedulingConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

fn quick_policy() -> RetryPolicy {
    RetryPolicy::new(
        2,
        std::time::Duration::from_millis(5),
        std::time::Duration::from_millis(50),
        2.0,
        false,
        5,
        std::time::Duration::from_millis(100),
        2,
    )
    .unwrap()
}

fn scheduler_in(dir: &TempDir) -> UpdateScheduler {
    let store = Arc::new(StateStore::new(
        dir.path().join("scheduler_state.json"),
        utc_clock(),
    ));
    UpdateScheduler::new(utc_clock(), quick_policy(), store)
}

fn counting_callback(calls: Arc<AtomicUsize>) -> UpdateCallback {
    Arc::new(move || {
        let calls = Arc::clone(&calls);
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    })
}

#[tokio::test]
async fn test_trigger_updates_state_before_callback_runs() {
    // Any observer reading next_update during the run must see the
    // upcoming fire, not the one currently executing.
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);
    scheduler.set_recovery_enabled(false);

    let config = SchedulingConfig::new(1, "00:05".to_string()).unwrap();
    scheduler.set_config_for_testing(config).await;
    scheduler
        .set_state_for_testing(ScheduleState {
            last_update: Some(ts(2025, 7, 26, 0, 5, 0)),
            next_update: Some(ts(2025, 7, 27, 0, 5, 0)),
            ..ScheduleState::default()
        })
        .await;

    let observed: Arc<Mutex<Vec<ScheduleState>>> = Arc::new(Mutex::new(Vec::new()));
    let observed_in_callback = Arc::clone(&observed);
    let observer = scheduler.clone();
    scheduler
        .set_update_callback(Arc::new(move || {
            let observed = Arc::clone(&observed_in_callback);
            let observer = observer.clone();
            Box::pin(async move {
                observed.lock().await.push(observer.state_snapshot().await);
                Ok(())
            })
        }))
        .await;

    scheduler.trigger_update_for_testing().await.unwrap();

    let snapshots = observed.lock().await;
    assert_eq!(snapshots.len(), 1);
    // During the run, last_update is already the scheduled time and
    // next_update the following fire.
    assert_eq!(snapshots[0].last_update, Some(ts(2025, 7, 27, 0, 5, 0)));
    assert_eq!(snapshots[0].next_update, Some(ts(2025, 7, 28, 0, 5, 0)));

    // After the run the same invariant holds.
    let state = scheduler.state_snapshot().await;
    assert_eq!(state.last_update, Some(ts(2025, 7, 27, 0, 5, 0)));
    assert!(state.next_update.unwrap() > state.last_update.unwrap());
    assert_eq!(state.consecutive_failures, 0);
}

#[tokio::test]
async fn test_trigger_without_callback_fails() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);
    scheduler.set_recovery_enabled(false);
    scheduler
        .set_config_for_testing(SchedulingConfig::new(1, "disabled".to_string()).unwrap())
        .await;

    let result = scheduler.trigger_update_for_testing().await;
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("callback"));
}

#[tokio::test]
async fn test_trigger_retries_transient_failures() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);
    scheduler.set_recovery_enabled(false);
    scheduler
        .set_config_for_testing(SchedulingConfig::new(1, "disabled".to_string()).unwrap())
        .await;

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_callback = Arc::clone(&calls);
    scheduler
        .set_update_callback(Arc::new(move || {
            let calls = Arc::clone(&calls_in_callback);
            Box::pin(async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(anyhow::anyhow!("connection reset"))
                } else {
                    Ok(())
                }
            })
        }))
        .await;

    scheduler.trigger_update_for_testing().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_trigger_does_not_retry_permanent_failures() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);
    scheduler.set_recovery_enabled(false);
    scheduler
        .set_config_for_testing(SchedulingConfig::new(1, "disabled".to_string()).unwrap())
        .await;

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_callback = Arc::clone(&calls);
    scheduler
        .set_update_callback(Arc::new(move || {
            let calls = Arc::clone(&calls_in_callback);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!(shared::BotError::PermanentService(
                    "bad api key".to_string()
                )))
            })
        }))
        .await;

    let result = scheduler.trigger_update_for_testing().await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let state = scheduler.state_snapshot().await;
    assert_eq!(state.consecutive_failures, 1);
    assert!(state.last_error.is_some());
}

#[tokio::test]
async fn test_breaker_blocks_after_sustained_failure() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(StateStore::new(
        dir.path().join("scheduler_state.json"),
        utc_clock(),
    ));
    let policy = RetryPolicy::new(
        1,
        std::time::Duration::from_millis(1),
        std::time::Duration::from_millis(5),
        2.0,
        false,
        1,
        std::time::Duration::from_secs(3600),
        1,
    )
    .unwrap();
    let scheduler = UpdateScheduler::new(utc_clock(), policy, store);
    scheduler.set_recovery_enabled(false);
    scheduler
        .set_config_for_testing(SchedulingConfig::new(1, "disabled".to_string()).unwrap())
        .await;
    scheduler
        .set_update_callback(Arc::new(|| {
            Box::pin(async { Err(anyhow::anyhow!("connection reset")) })
        }))
        .await;

    // First trigger fails definitively and opens the breaker
    assert!(scheduler.trigger_update_for_testing().await.is_err());

    // Second trigger is rejected outright
    let blocked = scheduler.trigger_update_for_testing().await;
    assert!(blocked.unwrap_err().to_string().contains("circuit breaker"));

    // Reset clears the breaker again
    scheduler.reset_error_state().await;
    let state = scheduler.state_snapshot().await;
    assert_eq!(state.consecutive_failures, 0);
}

#[tokio::test]
async fn test_update_config_recomputes_next_update() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);
    scheduler.set_recovery_enabled(false);

    scheduler
        .set_state_for_testing(ScheduleState {
            last_update: Some(ts(2025, 7, 26, 12, 0, 0)),
            ..ScheduleState::default()
        })
        .await;

    scheduler
        .update_config(SchedulingConfig::new(3, "disabled".to_string()).unwrap())
        .await
        .unwrap();

    let state = scheduler.state_snapshot().await;
    assert_eq!(state.next_update, Some(ts(2025, 7, 29, 12, 0, 0)));
}

#[tokio::test]
async fn test_start_and_stop_lifecycle() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);

    let calls = Arc::new(AtomicUsize::new(0));
    scheduler
        .set_update_callback(counting_callback(Arc::clone(&calls)))
        .await;

    // Interval of one day with no history: the loop waits and no update
    // fires immediately.
    scheduler
        .start(SchedulingConfig::new(1, "disabled".to_string()).unwrap())
        .await
        .unwrap();

    // Give the loop a moment to compute its schedule
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let status = scheduler.status().await;
    assert!(status.is_started);
    assert!(status.is_running);
    assert!(status.next_update.is_some());
    assert_eq!(status.update_days, Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    scheduler.stop().await;
    let status = scheduler.status().await;
    assert!(!status.is_started);
    assert!(!status.is_running);

    // The final state reached disk
    let store = StateStore::new(dir.path().join("scheduler_state.json"), utc_clock());
    assert!(store.exists());
    let (state, config) = store.load();
    assert!(!state.is_running);
    assert_eq!(config.map(|c| c.update_days()), Some(1));
}

#[tokio::test]
async fn test_force_recovery_reports_missed_fires() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);
    scheduler.set_recovery_enabled(false);
    scheduler
        .set_config_for_testing(SchedulingConfig::new(1, "disabled".to_string()).unwrap())
        .await;

    let calls = Arc::new(AtomicUsize::new(0));
    scheduler
        .set_update_callback(counting_callback(Arc::clone(&calls)))
        .await;

    // Two days behind: one backfill fire plus the stale stored next
    let last = utc_clock().now() - chrono::Duration::days(3);
    scheduler
        .set_state_for_testing(ScheduleState {
            last_update: Some(last),
            next_update: Some(last + chrono::Duration::days(1)),
            ..ScheduleState::default()
        })
        .await;

    let report = scheduler.force_recovery().await.unwrap();
    assert!(!report.missed_fires.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), report.missed_fires.len());
    assert!(report.state_after.last_update.is_some());
}

#[tokio::test]
async fn test_validate_and_repair() {
    let dir = TempDir::new().unwrap();
    let scheduler = scheduler_in(&dir);
    scheduler.set_recovery_enabled(false);
    scheduler
        .set_config_for_testing(SchedulingConfig::new(1, "disabled".to_string()).unwrap())
        .await;

    let now = utc_clock().now();
    scheduler
        .set_state_for_testing(ScheduleState {
            last_update: Some(now - chrono::Duration::days(1)),
            next_update: Some(now - chrono::Duration::hours(2)),
            ..ScheduleState::default()
        })
        .await;

    let issues = scheduler.validate_and_repair().await.unwrap();
    assert!(!issues.is_empty());

    let state = scheduler.state_snapshot().await;
    assert!(state.next_update.unwrap() >= now);
}
