// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable save path: backoff timing, pending slot, idempotency, restart.

mod common;

use chrono::Duration as ChronoDuration;
use common::{memory_persistence, t0, Failure, ScriptedStore};
use std::sync::Arc;
use std::time::Duration;
use workout_relay::db::LocalStore;
use workout_relay::error::AppError;
use workout_relay::models::{
    DeviceKind, DeviceMetadata, Environment, SaveWorkoutRequest, SessionState, Visibility,
    WorkoutKind, WorkoutSession,
};
use workout_relay::services::{PersistenceClient, RetryPolicy, SaveOutcome};

const BASE: Duration = Duration::from_secs(2);

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        base_delay: BASE,
        max_attempts,
    }
}

fn finished(kind: WorkoutKind, minutes: i64) -> SaveWorkoutRequest {
    let mut session = WorkoutSession::new(kind, Environment::Outdoor, DeviceKind::Handheld, t0());
    session.state = SessionState::Active;
    session.metrics.distance_meters = 1234.0;
    session.finish(t0() + ChronoDuration::minutes(minutes));
    SaveWorkoutRequest::from_session(
        &session,
        "athlete-1",
        None,
        Visibility::Private,
        DeviceMetadata::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_then_success_with_backoff() {
    let store = ScriptedStore::failing(3);
    let client = memory_persistence(store.clone(), policy(5));
    let request = finished(WorkoutKind::Run, 30);
    let id = request.session_id;

    assert_eq!(
        client.save(request).await.unwrap(),
        SaveOutcome::Pending { attempts: 1 }
    );
    let retries = client.spawn_retries(WorkoutKind::Run).unwrap();

    // Attempts run at 0, 2, 6 and 14 s; look between the third and fourth.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let pending = client.pending(WorkoutKind::Run).await.unwrap().unwrap();
    assert_eq!(pending.session_id(), id);
    assert_eq!(pending.retry_count, 3);
    assert!(pending.last_error.unwrap().contains("HTTP 500"));

    retries.await.unwrap();
    assert_eq!(store.attempts().len(), 4);
    assert_eq!(store.gaps(), vec![BASE, BASE * 2, BASE * 4]);
    assert!(client.pending(WorkoutKind::Run).await.unwrap().is_none());
    assert_eq!(client.last_saved(WorkoutKind::Run).await.unwrap(), Some(id));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_payload_stays_durable() {
    let store = ScriptedStore::always_failing();
    let client = memory_persistence(store.clone(), policy(3));
    let request = finished(WorkoutKind::Bike, 45);
    let id = request.session_id;

    client.save(request).await.unwrap();
    let outcome = client.retry_pending(WorkoutKind::Bike).await.unwrap();
    assert_eq!(outcome, Some(SaveOutcome::Pending { attempts: 3 }));
    assert_eq!(store.gaps(), vec![BASE, BASE * 2]);

    // No further automatic attempts.
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(store.attempts().len(), 3);

    let pending = client.pending(WorkoutKind::Bike).await.unwrap().unwrap();
    assert_eq!(pending.session_id(), id);
    assert_eq!(pending.retry_count, 3);
    assert_eq!(client.last_saved(WorkoutKind::Bike).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_resubmission_delay_at_least_backoff() {
    let store = ScriptedStore::failing(2);
    let client = memory_persistence(store.clone(), policy(5));

    client.save(finished(WorkoutKind::Walk, 20)).await.unwrap();
    client.retry_pending(WorkoutKind::Walk).await.unwrap();

    for (n, gap) in store.gaps().into_iter().enumerate() {
        let failures = n as u32 + 1;
        assert!(gap >= BASE * 2u32.pow(failures - 1), "gap {} was {:?}", n, gap);
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_retry_loop_per_kind() {
    let store = ScriptedStore::always_failing();
    let client = memory_persistence(store.clone(), policy(3));
    let second = finished(WorkoutKind::Run, 50);
    let second_id = second.session_id;

    client.save(finished(WorkoutKind::Run, 40)).await.unwrap();
    let retries = client.spawn_retries(WorkoutKind::Run).unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    client.save(second).await.unwrap();
    assert!(client.spawn_retries(WorkoutKind::Run).is_none());

    retries.await.unwrap();

    // The running loop adopts the replacement with its own backoff:
    // attempts at 0, 0.5, 4 and 8 s.
    assert_eq!(
        store.gaps(),
        vec![Duration::from_millis(500), Duration::from_millis(3500), BASE * 2]
    );
    let submitted = store.submitted();
    assert!(submitted[1..].iter().all(|r| r.session_id == second_id));
    let pending = client.pending(WorkoutKind::Run).await.unwrap().unwrap();
    assert_eq!(pending.session_id(), second_id);
    assert_eq!(pending.retry_count, 3);

    // Finished loops unregister, so a new failure can start one again.
    assert!(client.spawn_retries(WorkoutKind::Run).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_attempt_waits_an_extra_step() {
    let store = ScriptedStore::failing_with(1, Failure::RateLimited);
    let client = memory_persistence(store.clone(), policy(5));

    assert_eq!(
        client.save(finished(WorkoutKind::Walk, 25)).await.unwrap(),
        SaveOutcome::Pending { attempts: 1 }
    );
    let pending = client.pending(WorkoutKind::Walk).await.unwrap().unwrap();
    assert!(pending.rate_limited);

    let outcome = client.retry_pending(WorkoutKind::Walk).await.unwrap();
    assert!(matches!(outcome, Some(SaveOutcome::Saved { .. })));
    assert_eq!(store.gaps(), vec![BASE * 2]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_payload_is_not_retried_automatically() {
    let store = ScriptedStore::failing_with(1, Failure::Rejected);
    let client = memory_persistence(store.clone(), policy(4));

    assert_eq!(
        client.save(finished(WorkoutKind::Meditation, 30)).await.unwrap(),
        SaveOutcome::Pending { attempts: 4 }
    );
    assert_eq!(
        client.retry_pending(WorkoutKind::Meditation).await.unwrap(),
        Some(SaveOutcome::Pending { attempts: 4 })
    );
    assert_eq!(store.attempts().len(), 1);

    // Resuming after restart still gets a fresh attempt.
    let resumed = client.resume_pending().await.unwrap();
    assert!(matches!(resumed[0].1, SaveOutcome::Saved { .. }));
}

#[tokio::test]
async fn test_saved_session_is_not_submitted_again() {
    let store = ScriptedStore::ok();
    let client = memory_persistence(store.clone(), policy(5));
    let request = finished(WorkoutKind::Hike, 90);

    assert!(matches!(
        client.save(request.clone()).await.unwrap(),
        SaveOutcome::Saved { .. }
    ));
    assert_eq!(client.save(request).await.unwrap(), SaveOutcome::Duplicate);
    assert_eq!(store.submitted().len(), 1);
}

#[tokio::test]
async fn test_invalid_payload_parked_without_retry() {
    let store = ScriptedStore::ok();
    let client = memory_persistence(store.clone(), policy(4));
    let mut request = finished(WorkoutKind::Run, 10);
    request.caption = Some("x".repeat(600));

    let err = client.save(request).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(store.submitted().is_empty());

    let pending = client.pending(WorkoutKind::Run).await.unwrap().unwrap();
    assert_eq!(pending.retry_count, 4);
    assert_eq!(
        client.retry_pending(WorkoutKind::Run).await.unwrap(),
        Some(SaveOutcome::Pending { attempts: 4 })
    );
    assert!(store.submitted().is_empty());
}

#[tokio::test]
async fn test_same_kind_failure_overwrites_pending_slot() {
    let store = ScriptedStore::always_failing();
    let client = memory_persistence(store, policy(5));
    let first = finished(WorkoutKind::Gym, 40);
    let second = finished(WorkoutKind::Gym, 50);
    let second_id = second.session_id;

    client.save(first).await.unwrap();
    client.save(second).await.unwrap();

    // One slot per kind: the earlier payload is replaced.
    let pending = client.pending(WorkoutKind::Gym).await.unwrap().unwrap();
    assert_eq!(pending.session_id(), second_id);
    assert_eq!(pending.retry_count, 1);
}

#[tokio::test]
async fn test_pending_kinds_are_independent() {
    let store = ScriptedStore::always_failing();
    let client = memory_persistence(store, policy(5));

    client.save(finished(WorkoutKind::Run, 30)).await.unwrap();
    client
        .save(finished(
            WorkoutKind::Sports(workout_relay::models::SportKind::Tennis),
            60,
        ))
        .await
        .unwrap();

    assert!(client.pending(WorkoutKind::Run).await.unwrap().is_some());
    assert!(client
        .pending(WorkoutKind::Sports(workout_relay::models::SportKind::Tennis))
        .await
        .unwrap()
        .is_some());
    assert!(client.pending(WorkoutKind::Swim).await.unwrap().is_none());
}

#[tokio::test]
async fn test_pending_save_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let request = finished(WorkoutKind::Swim, 35);
    let id = request.session_id;

    {
        let local = LocalStore::open(dir.path()).await.unwrap();
        let client = PersistenceClient::new(ScriptedStore::always_failing(), local, policy(1));
        assert_eq!(
            client.save(request).await.unwrap(),
            SaveOutcome::Pending { attempts: 1 }
        );
        // Cap reached: nothing more happens automatically.
        assert_eq!(
            client.retry_pending(WorkoutKind::Swim).await.unwrap(),
            Some(SaveOutcome::Pending { attempts: 1 })
        );
    }

    // A new process resumes with a fresh attempt budget.
    let store = ScriptedStore::ok();
    let local = LocalStore::open(dir.path()).await.unwrap();
    let client = Arc::new(PersistenceClient::new(store.clone(), local, policy(1)));
    let resumed = client.resume_pending().await.unwrap();

    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].0, WorkoutKind::Swim);
    assert!(matches!(resumed[0].1, SaveOutcome::Saved { .. }));
    assert_eq!(store.submitted()[0].session_id, id);
    assert!(client.pending(WorkoutKind::Swim).await.unwrap().is_none());
    assert_eq!(client.last_saved(WorkoutKind::Swim).await.unwrap(), Some(id));

    // Nothing left to resume.
    assert!(client.resume_pending().await.unwrap().is_empty());
}
