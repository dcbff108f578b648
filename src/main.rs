// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Workout Relay simulator
//!
//! Runs a handheld and a wearable in one process over a simulated link,
//! records a short scripted run, hands it to the peer device and ends it
//! there, saving the result to the configured remote store.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workout_relay::{
    config::Config,
    db::LocalStore,
    link::{Inbound, PeerLink, SimulatedLink, SimulatedNetwork},
    models::{DeviceKind, Environment, MetricSample, Reading, Visibility, WorkoutKind},
    services::{
        EndResult, HandoffOutcome, HttpWorkoutStore, PersistenceClient, RetryPolicy,
        WorkoutService, WorkoutStore,
    },
    AppError, Device,
};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);
const SCRIPTED_FIXES: usize = 20;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        device = %config.device,
        remote = %config.remote_base_url,
        "Starting Workout Relay simulation"
    );

    let store: Arc<dyn WorkoutStore> = Arc::new(HttpWorkoutStore::new(
        config.remote_base_url.clone(),
        config.remote_api_token.clone(),
    )?);
    let policy = RetryPolicy {
        base_delay: config.save_base_delay,
        max_attempts: config.save_max_attempts,
    };

    let (network, (handheld_link, handheld_inbox), (wearable_link, wearable_inbox)) =
        SimulatedLink::pair();
    let handheld_link = Arc::new(handheld_link);
    let wearable_link = Arc::new(wearable_link);
    let handheld =
        build_device(&config, handheld_link, handheld_inbox, store.clone(), policy).await?;
    let wearable = build_device(&config, wearable_link, wearable_inbox, store, policy).await?;

    // Payloads parked by an earlier run get a fresh attempt budget now.
    for device in [&handheld, &wearable] {
        let resumed = device.workout().persistence().resume_pending().await?;
        for (kind, outcome) in resumed {
            tracing::info!(
                device = %device.workout().local(),
                %kind,
                ?outcome,
                "Resumed pending save"
            );
        }
    }

    let (starter, peer) = match config.device {
        DeviceKind::Handheld => (&handheld, &wearable),
        DeviceKind::Wearable => (&wearable, &handheld),
    };
    run_scripted_workout(&network, starter, peer, &handheld, &wearable).await?;
    Ok(())
}

async fn build_device(
    config: &Config,
    link: Arc<SimulatedLink>,
    inbox: mpsc::Receiver<Inbound>,
    store: Arc<dyn WorkoutStore>,
    policy: RetryPolicy,
) -> Result<Device, AppError> {
    let local = link.local();
    let local_store = LocalStore::open(config.store_dir.join(local.as_str())).await?;
    let persistence = Arc::new(PersistenceClient::new(store, local_store, policy));
    let link: Arc<dyn PeerLink> = link;
    let workout = Arc::new(WorkoutService::from_config(config, link, persistence));
    Ok(Device::spawn(
        workout,
        config.handoff_timeout,
        inbox,
        config.sync_interval,
    ))
}

async fn run_scripted_workout(
    network: &SimulatedNetwork,
    starter: &Device,
    peer: &Device,
    handheld: &Device,
    wearable: &Device,
) -> Result<(), AppError> {
    starter
        .workout()
        .start(WorkoutKind::Run, Environment::Outdoor)
        .await?;

    for i in 0..SCRIPTED_FIXES {
        // A short northbound run with a brief radio drop in the middle.
        if i == SCRIPTED_FIXES / 2 {
            network.set_reachable(false);
        }
        if i == SCRIPTED_FIXES / 2 + 3 {
            network.set_reachable(true);
        }

        let now = Utc::now();
        let fix = Reading::Location {
            latitude: 37.3861 + i as f64 * 0.0001,
            longitude: -122.0839,
            altitude: Some(30.0 + i as f64 * 0.5),
            horizontal_accuracy: 5.0,
        };
        handheld
            .workout()
            .ingest(MetricSample::new(DeviceKind::Handheld, now, fix))
            .await;
        let bpm = 120.0 + i as f64;
        wearable
            .workout()
            .ingest(MetricSample::new(DeviceKind::Wearable, now, Reading::HeartRate { bpm }))
            .await;
        tokio::time::sleep(SAMPLE_INTERVAL).await;
    }

    let outcome = starter.handoff().request_handoff().await?;
    tracing::info!(?outcome, "Handoff finished");
    let owner = match outcome {
        HandoffOutcome::Completed { .. } => peer,
        _ => starter,
    };

    let result = owner
        .workout()
        .end(Some("Scripted run".to_string()), Visibility::Followers)
        .await?;
    match result {
        EndResult::Finished {
            session,
            save,
            retry,
        } => {
            tracing::info!(
                session_id = %session.id,
                distance_m = session.metrics.distance_meters,
                elapsed_s = session.metrics.elapsed_seconds,
                ?save,
                "Workout finished"
            );
            if let Some(retry) = retry {
                if let Err(e) = retry.await {
                    tracing::error!(error = %e, "Save retry task failed");
                }
            }
        }
        EndResult::Ignored { reason } => {
            tracing::warn!(reason, "End request ignored");
        }
    }
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("workout_relay=debug,info"));

    tracing_subscriber::registry().with(filter).with(format).init();
}
