use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use workout_relay::models::{
    DeviceKind, DeviceMetadata, DeviceRoles, Environment, MetricSample, Reading,
    SaveWorkoutRequest, SessionState, Visibility, WorkoutKind, WorkoutSession,
};

/// A one-hour run sampled every second on the handheld.
fn recorded_run() -> (WorkoutSession, Vec<MetricSample>) {
    let start = Utc.with_ymd_and_hms(2026, 5, 1, 7, 0, 0).unwrap();
    let mut session = WorkoutSession::new(
        WorkoutKind::Run,
        Environment::Outdoor,
        DeviceKind::Handheld,
        start,
    );
    session.state = SessionState::Active;

    let samples = (0..3600)
        .map(|i| {
            MetricSample::new(
                DeviceKind::Handheld,
                start + Duration::seconds(i),
                Reading::Location {
                    latitude: 37.3861 + i as f64 * 0.00003,
                    longitude: -122.0839 + (i as f64 * 0.01).sin() * 0.0005,
                    altitude: Some(30.0 + (i as f64 * 0.02).cos() * 5.0),
                    horizontal_accuracy: 5.0,
                },
            )
        })
        .collect();
    (session, samples)
}

fn benchmark_merge(c: &mut Criterion) {
    let roles = DeviceRoles::all_on(DeviceKind::Handheld);
    let (fresh, samples) = recorded_run();

    let mut tracked = fresh.clone();
    for sample in &samples {
        tracked.apply_sample(sample, &roles);
    }
    let now = tracked.started_at + Duration::seconds(3600);
    let update = tracked.to_sync_update(DeviceKind::Wearable, &roles, now);
    let handoff = tracked.to_handoff(DeviceKind::Wearable, now);

    let mut group = c.benchmark_group("session_merge");

    group.bench_function("ingest_one_hour_of_fixes", |b| {
        b.iter(|| {
            let mut session = fresh.clone();
            for sample in &samples {
                session.apply_sample(black_box(sample), &roles);
            }
            session
        })
    });

    group.bench_function("merge_peer_update", |b| {
        b.iter(|| {
            let mut session = tracked.clone();
            session.merge_peer_update(black_box(&update), &roles)
        })
    });

    group.bench_function("merge_conflicting_handoff", |b| {
        b.iter(|| {
            let mut session = fresh.clone();
            session.merge_conflicting(black_box(&handoff), now);
            session
        })
    });

    group.bench_function("build_save_request", |b| {
        b.iter(|| {
            SaveWorkoutRequest::from_session(
                black_box(&tracked),
                "athlete-1",
                None,
                Visibility::Private,
                DeviceMetadata::default(),
            )
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_merge);
criterion_main!(benches);
