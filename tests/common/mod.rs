// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use workout_relay::db::LocalStore;
use workout_relay::error::AppError;
use workout_relay::link::{PeerLink, SimulatedLink, SimulatedNetwork};
use workout_relay::models::{DeviceKind, SaveWorkoutRequest};
use workout_relay::services::{PersistenceClient, RetryPolicy, WorkoutService, WorkoutStore};
use workout_relay::time_utils::ManualClock;
use workout_relay::Device;

/// Fixed session start used across tests.
#[allow(dead_code)]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 7, 0, 0).unwrap()
}

/// How a [`ScriptedStore`] fails.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    ServerError,
    RateLimited,
    Rejected,
}

impl Failure {
    fn error(self) -> AppError {
        match self {
            Failure::ServerError => AppError::RemoteStore(
                "HTTP 500 Internal Server Error: upstream unavailable".to_string(),
            ),
            Failure::RateLimited => AppError::RemoteStore(AppError::REMOTE_RATE_LIMIT.to_string()),
            Failure::Rejected => AppError::Validation("activity type not accepted".to_string()),
        }
    }
}

/// Remote store double: fails a scripted number of times, then succeeds.
///
/// Records the tokio instant of every attempt so backoff timing can be
/// asserted under a paused clock.
pub struct ScriptedStore {
    failure: Failure,
    failures_left: AtomicU32,
    attempts: Mutex<Vec<tokio::time::Instant>>,
    submitted: Mutex<Vec<SaveWorkoutRequest>>,
}

#[allow(dead_code)]
impl ScriptedStore {
    pub fn ok() -> Arc<Self> {
        Self::failing(0)
    }

    pub fn failing(times: u32) -> Arc<Self> {
        Self::failing_with(times, Failure::ServerError)
    }

    pub fn failing_with(times: u32, failure: Failure) -> Arc<Self> {
        Arc::new(Self {
            failure,
            failures_left: AtomicU32::new(times),
            attempts: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing(u32::MAX)
    }

    pub fn attempts(&self) -> Vec<tokio::time::Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<SaveWorkoutRequest> {
        self.submitted.lock().unwrap().clone()
    }

    /// Gaps between consecutive attempts.
    pub fn gaps(&self) -> Vec<Duration> {
        self.attempts()
            .windows(2)
            .map(|w| w[1].duration_since(w[0]))
            .collect()
    }
}

#[async_trait]
impl WorkoutStore for ScriptedStore {
    async fn submit(&self, request: &SaveWorkoutRequest) -> Result<String, AppError> {
        self.attempts.lock().unwrap().push(tokio::time::Instant::now());
        self.submitted.lock().unwrap().push(request.clone());

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.failure.error());
        }
        Ok(format!("activity-{}", self.submitted.lock().unwrap().len()))
    }
}

/// Persistence client over an in-memory store.
#[allow(dead_code)]
pub fn memory_persistence(
    store: Arc<ScriptedStore>,
    policy: RetryPolicy,
) -> Arc<PersistenceClient> {
    Arc::new(PersistenceClient::new(store, LocalStore::in_memory(), policy))
}

/// Two running devices joined by a simulated link, sharing one clock.
#[allow(dead_code)]
pub struct DevicePair {
    pub network: Arc<SimulatedNetwork>,
    pub handheld: Device,
    pub wearable: Device,
    pub clock: Arc<ManualClock>,
    pub store: Arc<ScriptedStore>,
}

#[allow(dead_code)]
pub struct PairOptions {
    pub handoff_timeout: Duration,
    /// Delay applied to every immediate send from the handheld
    pub handheld_latency: Duration,
    pub store: Arc<ScriptedStore>,
}

impl Default for PairOptions {
    fn default() -> Self {
        Self {
            handoff_timeout: Duration::from_secs(2),
            handheld_latency: Duration::ZERO,
            store: ScriptedStore::ok(),
        }
    }
}

/// Start a handheld and a wearable with default options.
#[allow(dead_code)]
pub fn device_pair() -> DevicePair {
    device_pair_with(PairOptions::default())
}

#[allow(dead_code)]
pub fn device_pair_with(options: PairOptions) -> DevicePair {
    let clock = Arc::new(ManualClock::new(t0()));
    let (network, (handheld_link, handheld_inbox), (wearable_link, wearable_inbox)) =
        SimulatedLink::pair();
    let handheld_link = handheld_link.with_latency(options.handheld_latency);

    let build = |link: Arc<dyn PeerLink>, local: DeviceKind| {
        let persistence = memory_persistence(options.store.clone(), RetryPolicy::default());
        Arc::new(
            WorkoutService::new(local, link, persistence)
                .with_clock(clock.clone())
                .with_profile("athlete-1", 70.0),
        )
    };
    let handheld = build(Arc::new(handheld_link), DeviceKind::Handheld);
    let wearable = build(Arc::new(wearable_link), DeviceKind::Wearable);

    // Periodic pushes are driven explicitly by the tests.
    let idle_ticker = Duration::from_secs(3600);
    DevicePair {
        network,
        handheld: Device::spawn(handheld, options.handoff_timeout, handheld_inbox, idle_ticker),
        wearable: Device::spawn(wearable, options.handoff_timeout, wearable_inbox, idle_ticker),
        clock,
        store: options.store,
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("Timed out waiting for: {}", what);
}
