// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-device workout service.
//!
//! Wraps the session state machine with everything that happens around a
//! transition:
//! - Sensor authorization and platform recorder calls on start/end
//! - Role recomputation when GPS quality, reachability or environment change
//! - MET calorie estimates when no device reports calories
//! - Sync pushes after state changes
//! - Handing the finished session to persistence
//!
//! Push failures are logged and never abort a transition.

use crate::config::Config;
use crate::error::AppError;
use crate::link::PeerLink;
use crate::models::{
    DeviceKind, DeviceMetadata, DeviceRoles, Environment, HandoffMessage, HandoffReply, MetricKind,
    MetricSample, Reading, SaveWorkoutRequest, SessionId, SessionState, SyncUpdate, Visibility,
    WorkoutKind, WorkoutSession,
};
use crate::services::calories::estimate_kcal;
use crate::services::coordination::CoordinationEngine;
use crate::services::persistence::{PersistenceClient, SaveOutcome};
use crate::services::platform::{AllowAllSensors, NoopRecorder, SensorAuthorizer, WorkoutRecorder};
use crate::services::session::{SessionStateMachine, Transition};
use crate::services::sync::{Delivery, MetricsSync};
use crate::time_utils::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Result of ending a session.
#[derive(Debug)]
pub enum EndResult {
    /// Nothing to end (or not the owner); no save was attempted
    Ignored { reason: &'static str },
    /// The session ended and was handed to persistence
    Finished {
        session: WorkoutSession,
        save: SaveOutcome,
        /// Background retry loop, present when the save was parked
        retry: Option<JoinHandle<()>>,
    },
}

/// Workout session service for one device.
pub struct WorkoutService {
    local: DeviceKind,
    machine: Mutex<SessionStateMachine>,
    engine: Arc<CoordinationEngine>,
    sync: MetricsSync,
    persistence: Arc<PersistenceClient>,
    recorder: Arc<dyn WorkoutRecorder>,
    sensors: Arc<dyn SensorAuthorizer>,
    clock: Arc<dyn Clock>,
    user_id: String,
    body_weight_kg: f64,
    device_metadata: DeviceMetadata,
}

impl WorkoutService {
    pub fn new(
        local: DeviceKind,
        link: Arc<dyn PeerLink>,
        persistence: Arc<PersistenceClient>,
    ) -> Self {
        Self {
            local,
            machine: Mutex::new(SessionStateMachine::new(local)),
            engine: Arc::new(CoordinationEngine::default()),
            sync: MetricsSync::new(link),
            persistence,
            recorder: Arc::new(NoopRecorder),
            sensors: Arc::new(AllowAllSensors),
            clock: Arc::new(SystemClock),
            user_id: String::new(),
            body_weight_kg: crate::config::DEFAULT_BODY_WEIGHT_KG,
            device_metadata: DeviceMetadata::default(),
        }
    }

    /// Service configured from the runtime configuration.
    pub fn from_config(
        config: &Config,
        link: Arc<dyn PeerLink>,
        persistence: Arc<PersistenceClient>,
    ) -> Self {
        Self::new(config.device, link, persistence)
            .with_engine(Arc::new(CoordinationEngine::new(config.gps_accuracy_threshold_m)))
            .with_profile(config.user_id.clone(), config.body_weight_kg)
    }

    pub fn with_engine(mut self, engine: Arc<CoordinationEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn WorkoutRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_sensors(mut self, sensors: Arc<dyn SensorAuthorizer>) -> Self {
        self.sensors = sensors;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_profile(mut self, user_id: impl Into<String>, body_weight_kg: f64) -> Self {
        self.user_id = user_id.into();
        self.body_weight_kg = body_weight_kg;
        self
    }

    pub fn with_device_metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.device_metadata = metadata;
        self
    }

    pub fn local(&self) -> DeviceKind {
        self.local
    }

    pub fn link(&self) -> &Arc<dyn PeerLink> {
        self.sync.link()
    }

    pub fn persistence(&self) -> &Arc<PersistenceClient> {
        &self.persistence
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Copy of the current session, refreshed to now.
    pub async fn snapshot(&self) -> Option<WorkoutSession> {
        let now = self.clock.now();
        let mut machine = self.machine.lock().await;
        self.refresh(&mut machine, now);
        machine.session().cloned()
    }

    pub async fn state(&self) -> SessionState {
        self.machine.lock().await.state()
    }

    pub async fn roles(&self) -> DeviceRoles {
        self.machine.lock().await.roles().clone()
    }

    pub async fn is_owner(&self) -> bool {
        self.machine.lock().await.is_owner()
    }

    /// Start a new session.
    ///
    /// Sensor authorization failure aborts back to idle and is returned as
    /// [`AppError::SessionSetup`]. Recorder failures are tolerated.
    pub async fn start(
        &self,
        kind: WorkoutKind,
        environment: Environment,
    ) -> Result<Transition, AppError> {
        let requested_at = self.clock.now();
        {
            let mut machine = self.machine.lock().await;
            let transition = machine.begin(kind, environment, requested_at);
            if !transition.is_applied() {
                return Ok(transition);
            }
        }

        if let Err(e) = self.sensors.authorize(kind).await {
            tracing::error!(device = %self.local, %kind, error = %e, "Sensor authorization failed");
            self.machine.lock().await.abort_start();
            return Err(AppError::SessionSetup(e.to_string()));
        }

        if let Err(e) = self.recorder.begin_collection(requested_at).await {
            tracing::warn!(device = %self.local, error = %e, "Recorder failed to begin collection");
        }

        let transition = {
            let mut machine = self.machine.lock().await;
            let transition = machine.confirm_started(self.clock.now());
            if transition.is_applied() {
                self.recompute_roles(&mut machine);
            }
            transition
        };

        if transition.is_applied() {
            self.sync_now().await;
        }
        Ok(transition)
    }

    pub async fn pause(&self) -> Transition {
        let now = self.clock.now();
        let transition = {
            let mut machine = self.machine.lock().await;
            self.estimate_calories(&mut machine, now);
            machine.pause(now)
        };
        if transition.is_applied() {
            self.sync_now().await;
        }
        transition
    }

    pub async fn resume(&self) -> Transition {
        let transition = self.machine.lock().await.resume(self.clock.now());
        if transition.is_applied() {
            self.sync_now().await;
        }
        transition
    }

    /// End the session and save it.
    ///
    /// Only the first end of a session reaches persistence; later calls are
    /// ignored. A failed save is parked and retried in the background.
    pub async fn end(
        &self,
        caption: Option<String>,
        visibility: Visibility,
    ) -> Result<EndResult, AppError> {
        let at = self.clock.now();
        let (finished, update) = {
            let mut machine = self.machine.lock().await;
            self.estimate_calories(&mut machine, at);
            let (transition, finished) = machine.end(at);
            let Some(finished) = finished else {
                let reason = match transition {
                    Transition::Ignored { reason, .. } => reason,
                    Transition::Applied(_) => "no live session",
                };
                return Ok(EndResult::Ignored { reason });
            };
            let update = machine.sync_update(at);
            (finished, update)
        };

        if let Some(update) = update {
            self.push(update).await;
        }

        if let Err(e) = self.recorder.end_collection(at).await {
            tracing::warn!(
                session_id = %finished.id,
                error = %e,
                "Recorder failed to end collection"
            );
        }
        if let Err(e) = self.recorder.finish_workout().await {
            tracing::warn!(
                session_id = %finished.id,
                error = %e,
                "Recorder failed to finish workout"
            );
        }

        let request = SaveWorkoutRequest::from_session(
            &finished,
            &self.user_id,
            caption,
            visibility,
            self.device_metadata.clone(),
        );
        let save = self.persistence.save(request).await?;
        let retry = match save {
            SaveOutcome::Pending { .. } => self.persistence.spawn_retries(finished.kind),
            _ => None,
        };

        Ok(EndResult::Finished {
            session: finished,
            save,
            retry,
        })
    }

    /// Apply a local sensor sample.
    ///
    /// Handheld location fixes also feed the GPS quality tracking; a
    /// threshold crossing reassigns roles.
    pub async fn ingest(&self, sample: MetricSample) -> Vec<MetricKind> {
        let now = self.clock.now();
        let mut roles_changed = false;
        let updated = {
            let mut machine = self.machine.lock().await;
            if let Reading::Location {
                horizontal_accuracy, ..
            } = sample.reading
            {
                if sample.source == DeviceKind::Handheld
                    && self.engine.update_location_accuracy(horizontal_accuracy)
                {
                    let before = machine.roles().clone();
                    self.recompute_roles(&mut machine);
                    roles_changed = machine.roles() != &before;
                }
            }

            let updated = machine.ingest(&sample);
            self.refresh(&mut machine, now);
            updated
        };

        // New roles reach the companion right away.
        if roles_changed {
            self.sync_now().await;
        }
        updated
    }

    /// React to the peer coming and going.
    pub async fn on_reachability_changed(&self, reachable: bool) {
        tracing::info!(device = %self.local, reachable, "Peer reachability changed");
        let participating = {
            let mut machine = self.machine.lock().await;
            self.recompute_roles(&mut machine);
            machine.state().is_live()
        };
        if reachable && participating {
            self.sync_now().await;
        }
    }

    /// Change indoor/outdoor for the owned session.
    pub async fn set_environment(&self, environment: Environment) -> bool {
        {
            let mut machine = self.machine.lock().await;
            if !machine.is_owner() {
                return false;
            }
            match machine.session_mut() {
                Some(s) if s.state.is_busy() && s.environment != environment => {
                    s.environment = environment;
                    tracing::info!(session_id = %s.id, ?environment, "Session environment changed");
                }
                _ => return false,
            }
            self.recompute_roles(&mut machine);
        }
        self.sync_now().await;
        true
    }

    /// Merge a sync update received from the peer.
    pub async fn apply_peer_update(&self, update: SyncUpdate) -> Vec<MetricKind> {
        let now = self.clock.now();
        let mut machine = self.machine.lock().await;
        let updated = machine.apply_peer_update(&update);
        if machine.state().is_live() {
            self.refresh(&mut machine, now);
        }
        updated
    }

    /// Decide on a handoff offered by the peer.
    pub async fn receive_handoff(&self, msg: HandoffMessage) -> HandoffReply {
        let now = self.clock.now();
        let reply = {
            let mut machine = self.machine.lock().await;
            let reply = machine.accept_handoff(&msg, now);
            if reply.is_accepted() {
                self.recompute_roles(&mut machine);
            }
            reply
        };
        match &reply {
            HandoffReply::Accepted => {
                tracing::info!(
                    device = %self.local,
                    session_id = %msg.session_id,
                    "Handoff accepted"
                );
                self.sync_now().await;
            }
            HandoffReply::Rejected { reason } => {
                tracing::warn!(
                    device = %self.local,
                    session_id = %msg.session_id,
                    %reason,
                    "Handoff rejected"
                );
            }
        }
        reply
    }

    /// Suspend ingestion and snapshot the owned session for a handoff.
    pub async fn freeze_for_handoff(&self) -> Option<HandoffMessage> {
        let now = self.clock.now();
        let mut machine = self.machine.lock().await;
        self.estimate_calories(&mut machine, now);
        machine.freeze(now)
    }

    pub async fn unfreeze(&self) {
        self.machine.lock().await.unfreeze();
    }

    /// Give up the session after the peer took it over.
    pub async fn relinquish(&self, session_id: SessionId) -> Option<HandoffMessage> {
        let now = self.clock.now();
        let mut machine = self.machine.lock().await;
        self.estimate_calories(&mut machine, now);
        let last = machine.relinquish(session_id, now);
        if last.is_some() {
            machine.set_roles(DeviceRoles::default());
        }
        last
    }

    /// Push the current snapshot to the peer, if there is a session.
    pub async fn sync_now(&self) -> Option<Delivery> {
        let now = self.clock.now();
        let update = {
            let mut machine = self.machine.lock().await;
            self.refresh(&mut machine, now);
            machine.sync_update(now)
        }?;
        self.push(update).await
    }

    /// Periodic push: only live sessions are synced.
    pub async fn tick(&self) -> Option<Delivery> {
        if !self.state().await.is_live() {
            return None;
        }
        self.sync_now().await
    }

    async fn push(&self, update: SyncUpdate) -> Option<Delivery> {
        let session_id = update.session_id;
        match self.sync.push(update).await {
            Ok(delivery) => Some(delivery),
            Err(e) => {
                tracing::warn!(device = %self.local, %session_id, error = %e, "Sync push failed");
                None
            }
        }
    }

    fn reachable_devices(&self) -> Vec<DeviceKind> {
        if self.sync.link().is_reachable() {
            vec![self.local, self.local.peer()]
        } else {
            vec![self.local]
        }
    }

    /// Recompute roles for the current session.
    ///
    /// A companion follows the owner's roles while the owner is reachable.
    fn recompute_roles(&self, machine: &mut SessionStateMachine) {
        let (kind, environment, owner) = match machine.session() {
            Some(s) if s.state.is_busy() => (s.kind, s.environment, s.owner),
            _ => return,
        };
        let reachable = self.reachable_devices();
        if owner != self.local && reachable.len() > 1 {
            return;
        }
        let roles = self.engine.compute_roles(kind, environment, &reachable);
        machine.set_roles(roles);
    }

    fn refresh(&self, machine: &mut SessionStateMachine, now: DateTime<Utc>) {
        self.estimate_calories(machine, now);
        if let Some(s) = machine.session_mut() {
            if s.state.is_live() {
                s.refresh(now);
            }
        }
    }

    /// MET estimate, applied when this device is primary for calories and
    /// no direct reading was received.
    fn estimate_calories(&self, machine: &mut SessionStateMachine, now: DateTime<Utc>) {
        let local_primary = machine.roles().is_primary(self.local, MetricKind::Calories);
        if !local_primary {
            return;
        }
        if let Some(s) = machine.session_mut() {
            if s.state.is_live() && !s.direct_calories {
                let kcal = estimate_kcal(s.kind, self.body_weight_kg, s.elapsed_at(now));
                s.metrics.calories_kcal = s.metrics.calories_kcal.max(kcal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LocalStore;
    use crate::link::{SimulatedLink, SimulatedNetwork};
    use crate::services::persistence::RetryPolicy;
    use crate::services::remote::WorkoutStore;
    use crate::time_utils::ManualClock;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WorkoutStore for CountingStore {
        async fn submit(&self, _request: &SaveWorkoutRequest) -> Result<String, AppError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("activity-{}", n))
        }
    }

    struct DenySensors;

    #[async_trait]
    impl SensorAuthorizer for DenySensors {
        async fn authorize(&self, _kind: WorkoutKind) -> Result<(), AppError> {
            Err(AppError::SessionSetup("heart rate permission denied".to_string()))
        }
    }

    type Harness = (WorkoutService, Arc<CountingStore>, Arc<SimulatedNetwork>);

    fn service(clock: Arc<ManualClock>) -> Harness {
        let (net, (handheld, _rx), _wearable) = SimulatedLink::pair();
        let store = Arc::new(CountingStore {
            calls: AtomicUsize::new(0),
        });
        let persistence = Arc::new(PersistenceClient::new(
            store.clone(),
            LocalStore::in_memory(),
            RetryPolicy::default(),
        ));
        let service = WorkoutService::new(DeviceKind::Handheld, Arc::new(handheld), persistence)
            .with_clock(clock)
            .with_profile("user-1", 70.0);
        (service, store, net)
    }

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 7, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_sensor_denial_returns_to_idle() {
        let clock = Arc::new(ManualClock::new(start_time()));
        let (service, store, _net) = service(clock);
        let service = service.with_sensors(Arc::new(DenySensors));

        let result = service.start(WorkoutKind::Run, Environment::Outdoor).await;
        assert!(matches!(result, Err(AppError::SessionSetup(_))));
        assert_eq!(service.state().await, SessionState::Idle);
        assert!(matches!(
            service.end(None, Visibility::Private).await.unwrap(),
            EndResult::Ignored { .. }
        ));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_double_end_saves_once() {
        let clock = Arc::new(ManualClock::new(start_time()));
        let (service, store, _net) = service(clock.clone());

        service.start(WorkoutKind::Walk, Environment::Outdoor).await.unwrap();
        clock.advance(chrono::Duration::minutes(20));

        let first = service.end(None, Visibility::Private).await.unwrap();
        assert!(matches!(first, EndResult::Finished { save: SaveOutcome::Saved { .. }, .. }));
        let second = service.end(None, Visibility::Private).await.unwrap();
        assert!(matches!(second, EndResult::Ignored { .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_met_estimate_when_primary_for_calories() {
        let clock = Arc::new(ManualClock::new(start_time()));
        let (service, _, net) = service(clock.clone());
        net.set_reachable(false);

        service.start(WorkoutKind::Run, Environment::Outdoor).await.unwrap();
        assert_eq!(service.roles().await.primary(MetricKind::Calories), DeviceKind::Handheld);
        clock.advance(chrono::Duration::hours(1));

        let ended = service.end(None, Visibility::Private).await.unwrap();
        let EndResult::Finished { session, .. } = ended else {
            panic!("expected finished session");
        };
        assert!((session.metrics.calories_kcal - 686.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_no_estimate_when_peer_owns_calories() {
        let clock = Arc::new(ManualClock::new(start_time()));
        let (service, _, _net) = service(clock.clone());

        // No GPS fix yet, so calories follow distance onto the wearable.
        service.start(WorkoutKind::Run, Environment::Outdoor).await.unwrap();
        clock.advance(chrono::Duration::hours(1));
        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.metrics.calories_kcal, 0.0);
    }
}
