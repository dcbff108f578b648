// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Workout session record and the per-session metric arithmetic.
//!
//! Two merge strategies live here and are kept separate:
//! - authority-gated overwrite for periodic sync updates
//! - field-wise max for conflicting handoffs (sender heart rate trusted)

use crate::models::{
    DeviceKind, DeviceRoles, Environment, HandoffDirection, HandoffMessage, MetricKind,
    MetricSample, Reading, RoutePoint, SyncUpdate, WorkoutKind,
};
use chrono::{DateTime, Duration, Utc};
use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process-unique session identifier, stable across handoffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Active,
    Paused,
    Ended,
}

impl SessionState {
    /// Active or paused: the session is recording.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Paused)
    }

    /// A session in this state blocks starting another one.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Active | SessionState::Paused
        )
    }
}

/// Current aggregated metrics of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricsSnapshot {
    pub distance_meters: f64,
    pub elapsed_seconds: f64,
    pub heart_rate: Option<f64>,
    pub average_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    /// Number of heart-rate samples behind the average
    #[serde(default)]
    pub heart_rate_samples: u64,
    pub calories_kcal: f64,
    pub elevation_gain_meters: f64,
    pub elevation_loss_meters: f64,
    pub cadence: Option<f64>,
    /// Seconds per kilometer
    pub pace_seconds_per_km: Option<f64>,
}

impl MetricsSnapshot {
    /// Field-wise max of the monotonic accumulators.
    ///
    /// Distance, elapsed time, calories, elevation gain/loss and max heart
    /// rate never regress.
    pub fn merge_max(&mut self, other: &MetricsSnapshot) {
        self.distance_meters = self.distance_meters.max(other.distance_meters);
        self.elapsed_seconds = self.elapsed_seconds.max(other.elapsed_seconds);
        self.calories_kcal = self.calories_kcal.max(other.calories_kcal);
        self.elevation_gain_meters = self.elevation_gain_meters.max(other.elevation_gain_meters);
        self.elevation_loss_meters = self.elevation_loss_meters.max(other.elevation_loss_meters);
        self.max_heart_rate = max_opt(self.max_heart_rate, other.max_heart_rate);
    }

    /// Take the sender's heart-rate fields as current.
    pub fn adopt_heart_rate(&mut self, other: &MetricsSnapshot) {
        if other.heart_rate.is_some() {
            self.heart_rate = other.heart_rate;
        }
        if other.heart_rate_samples > 0 {
            self.average_heart_rate = other.average_heart_rate;
            self.heart_rate_samples = other.heart_rate_samples;
        }
        self.max_heart_rate = max_opt(self.max_heart_rate, other.max_heart_rate);
    }
}

/// Raise `field` to `incoming` if larger. Returns whether it changed.
fn raise(field: &mut f64, incoming: f64) -> bool {
    if incoming > *field {
        *field = incoming;
        true
    } else {
        false
    }
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// One workout on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSession {
    pub id: SessionId,
    pub kind: WorkoutKind,
    pub environment: Environment,
    /// Device holding authority for the session
    pub owner: DeviceKind,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub paused_total_ms: i64,
    pub paused_since: Option<DateTime<Utc>>,
    /// Elapsed time credited by handoff merges beyond the wall-clock derivation
    pub elapsed_credit_ms: i64,
    pub ended_at: Option<DateTime<Utc>>,
    pub metrics: MetricsSnapshot,
    pub route: Vec<RoutePoint>,
    /// A device supplied calories directly; the MET estimate is disabled
    pub direct_calories: bool,
    /// Ingestion is suspended while a handoff is in flight
    pub frozen: bool,
    #[serde(skip)]
    last_fix: Option<(Point<f64>, Option<f64>)>,
}

impl WorkoutSession {
    /// Create a new session in `Starting` state.
    pub fn new(
        kind: WorkoutKind,
        environment: Environment,
        owner: DeviceKind,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            kind,
            environment,
            owner,
            state: SessionState::Starting,
            started_at: at,
            paused_total_ms: 0,
            paused_since: None,
            elapsed_credit_ms: 0,
            ended_at: None,
            metrics: MetricsSnapshot::default(),
            route: Vec::new(),
            direct_calories: false,
            frozen: false,
            last_fix: None,
        }
    }

    /// Rehydrate a session received through a handoff, keeping its id and start time.
    pub fn from_handoff(msg: &HandoffMessage, owner: DeviceKind, at: DateTime<Utc>) -> Self {
        let mut session = Self {
            id: msg.session_id,
            kind: msg.kind,
            environment: msg.environment,
            owner,
            state: msg.state,
            started_at: msg.started_at,
            paused_total_ms: msg.paused_total_ms,
            paused_since: None,
            elapsed_credit_ms: msg.elapsed_credit_ms,
            ended_at: None,
            metrics: msg.metrics.clone(),
            route: msg.route.clone(),
            direct_calories: false,
            frozen: false,
            last_fix: None,
        };
        if session.state == SessionState::Paused {
            session.paused_since = Some(at);
        }
        session
    }

    /// Companion copy of a session owned by the peer, announced through a sync update.
    ///
    /// The companion contributes the metrics it is primary for and follows
    /// the owner's lifecycle.
    pub fn companion_of(update: &SyncUpdate) -> Self {
        Self {
            id: update.session_id,
            kind: update.kind,
            environment: update.environment,
            owner: update.owner,
            state: update.state,
            started_at: update.started_at,
            paused_total_ms: update.paused_total_ms,
            paused_since: None,
            elapsed_credit_ms: 0,
            ended_at: None,
            metrics: update.metrics.clone(),
            route: Vec::new(),
            direct_calories: false,
            frozen: false,
            last_fix: None,
        }
    }

    pub fn paused_total(&self) -> Duration {
        Duration::milliseconds(self.paused_total_ms)
    }

    /// Elapsed active time: `now - start - paused`.
    ///
    /// A pause in progress counts as paused up to `now`; an ended session is
    /// measured at its end time.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        let end = self.ended_at.unwrap_or(now);
        let mut paused = self.paused_total_ms;
        if let Some(since) = self.paused_since {
            paused += (end - since).num_milliseconds().max(0);
        }
        let ms = (end - self.started_at).num_milliseconds() - paused + self.elapsed_credit_ms;
        Duration::milliseconds(ms.max(0))
    }

    /// Record the start of a pause.
    pub fn begin_pause(&mut self, at: DateTime<Utc>) {
        self.paused_since = Some(at);
        self.last_fix = None;
        self.state = SessionState::Paused;
    }

    /// Close the current pause, folding it into the paused total.
    pub fn end_pause(&mut self, at: DateTime<Utc>) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total_ms += (at - since).num_milliseconds().max(0);
        }
        self.state = SessionState::Active;
    }

    /// Stop the session clock.
    pub fn finish(&mut self, at: DateTime<Utc>) {
        if self.paused_since.is_some() {
            self.end_pause(at);
        }
        self.ended_at = Some(at);
        self.state = SessionState::Ended;
        self.refresh(at);
    }

    /// Recompute derived values (elapsed time, pace).
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        let elapsed = self.elapsed_at(now).num_milliseconds() as f64 / 1000.0;
        self.metrics.elapsed_seconds = self.metrics.elapsed_seconds.max(elapsed);
        self.metrics.pace_seconds_per_km = if self.metrics.distance_meters > 1.0 {
            Some(self.metrics.elapsed_seconds / (self.metrics.distance_meters / 1000.0))
        } else {
            None
        };
    }

    /// Apply a local sensor sample if its source is authoritative.
    ///
    /// Returns the metrics that were updated. Heart rate from the wearable
    /// is always accepted.
    pub fn apply_sample(&mut self, sample: &MetricSample, roles: &DeviceRoles) -> Vec<MetricKind> {
        let mut updated = Vec::new();
        let source = sample.source;
        match &sample.reading {
            Reading::Location {
                latitude,
                longitude,
                altitude,
                ..
            } => {
                let point = Point::new(*longitude, *latitude);
                let distance_ok = roles.is_primary(source, MetricKind::Distance);
                let elevation_ok = roles.is_primary(source, MetricKind::Elevation);
                // Track the position even when another device is authoritative,
                // so regaining primacy does not bridge the gap it covered.
                let previous = self.last_fix.replace((point, *altitude));
                if let Some((prev, prev_alt)) = previous {
                    if distance_ok {
                        self.metrics.distance_meters += Haversine.distance(prev, point);
                        updated.push(MetricKind::Distance);
                    }
                    if elevation_ok {
                        if let (Some(a), Some(b)) = (prev_alt, *altitude) {
                            let delta = b - a;
                            if delta > 0.0 {
                                self.metrics.elevation_gain_meters += delta;
                            } else {
                                self.metrics.elevation_loss_meters += -delta;
                            }
                            updated.push(MetricKind::Elevation);
                        }
                    }
                }
                if distance_ok {
                    self.route.push(RoutePoint {
                        recorded_at: sample.recorded_at,
                        latitude: *latitude,
                        longitude: *longitude,
                        altitude: *altitude,
                        heart_rate: self.metrics.heart_rate,
                        distance_meters: self.metrics.distance_meters,
                    });
                }
            }
            Reading::DistanceDelta { meters } => {
                if roles.is_primary(source, MetricKind::Distance) && *meters >= 0.0 {
                    self.metrics.distance_meters += meters;
                    updated.push(MetricKind::Distance);
                }
            }
            Reading::HeartRate { bpm } => {
                if source == DeviceKind::Wearable
                    || roles.is_primary(source, MetricKind::HeartRate)
                {
                    self.record_heart_rate(*bpm);
                    updated.push(MetricKind::HeartRate);
                }
            }
            Reading::Cadence { per_minute } => {
                if roles.is_primary(source, MetricKind::Cadence) {
                    self.metrics.cadence = Some(*per_minute);
                    updated.push(MetricKind::Cadence);
                }
            }
            Reading::Calories { kcal } => {
                if roles.is_primary(source, MetricKind::Calories) {
                    self.direct_calories = true;
                    self.metrics.calories_kcal = self.metrics.calories_kcal.max(*kcal);
                    updated.push(MetricKind::Calories);
                }
            }
        }
        self.refresh(sample.recorded_at);
        updated
    }

    fn record_heart_rate(&mut self, bpm: f64) {
        let m = &mut self.metrics;
        let total = m.average_heart_rate.unwrap_or(0.0) * m.heart_rate_samples as f64 + bpm;
        m.heart_rate_samples += 1;
        m.average_heart_rate = Some(total / m.heart_rate_samples as f64);
        m.max_heart_rate = max_opt(m.max_heart_rate, Some(bpm));
        m.heart_rate = Some(bpm);
    }

    /// Authority-gated merge of a peer's periodic update.
    ///
    /// Instantaneous fields are overwritten only when the sender is primary
    /// for them under `roles`. Heart rate from the wearable is always taken.
    ///
    /// Distance, elevation and calories only grow. They are max-merged from
    /// a primary sender, and also from the session owner or a sender whose
    /// advertised roles disagree with ours: both mean authority recently
    /// moved and the sender may hold progress this device never saw.
    pub fn merge_peer_update(
        &mut self,
        update: &SyncUpdate,
        roles: &DeviceRoles,
    ) -> Vec<MetricKind> {
        let sender = update.sender;
        let incoming = &update.metrics;
        let reconcile = sender == self.owner || update.roles != *roles;
        let mut updated = Vec::new();

        let primary = |metric: MetricKind| roles.is_primary(sender, metric);
        let m = &mut self.metrics;
        if primary(MetricKind::Distance) || reconcile {
            let raised = raise(&mut m.distance_meters, incoming.distance_meters);
            if raised || primary(MetricKind::Distance) {
                updated.push(MetricKind::Distance);
            }
        }
        if primary(MetricKind::Pace) {
            m.pace_seconds_per_km = incoming.pace_seconds_per_km;
            updated.push(MetricKind::Pace);
        }
        if primary(MetricKind::Elevation) || reconcile {
            let gain = raise(&mut m.elevation_gain_meters, incoming.elevation_gain_meters);
            let loss = raise(&mut m.elevation_loss_meters, incoming.elevation_loss_meters);
            if gain || loss || primary(MetricKind::Elevation) {
                updated.push(MetricKind::Elevation);
            }
        }
        if primary(MetricKind::Calories) || reconcile {
            let raised = raise(&mut m.calories_kcal, incoming.calories_kcal);
            if raised || primary(MetricKind::Calories) {
                updated.push(MetricKind::Calories);
            }
        }
        if roles.is_primary(sender, MetricKind::Cadence) {
            self.metrics.cadence = incoming.cadence;
            updated.push(MetricKind::Cadence);
        }
        if sender == DeviceKind::Wearable || roles.is_primary(sender, MetricKind::HeartRate) {
            self.metrics.heart_rate = incoming.heart_rate;
            self.metrics.average_heart_rate = incoming.average_heart_rate;
            self.metrics.max_heart_rate = incoming.max_heart_rate;
            self.metrics.heart_rate_samples = incoming.heart_rate_samples;
            updated.push(MetricKind::HeartRate);
        }

        // Lifecycle and clock follow the owner.
        if sender == self.owner {
            self.state = update.state;
            self.started_at = update.started_at;
            self.paused_total_ms = update.paused_total_ms;
            self.paused_since = match update.state {
                SessionState::Paused => self.paused_since.or(Some(update.sent_at)),
                _ => None,
            };
            if update.state == SessionState::Ended {
                self.ended_at = Some(update.sent_at);
            }
            self.metrics.elapsed_seconds = incoming.elapsed_seconds;
        }
        updated
    }

    /// Split-brain merge: adopt the incoming identity, never regress progress.
    ///
    /// The sender is the origin of the session: its id, start time, state
    /// and environment win. Monotonic accumulators take the max of both
    /// sides and the sender's heart rate is current.
    pub fn merge_conflicting(&mut self, incoming: &HandoffMessage, now: DateTime<Utc>) {
        let local_elapsed = self.elapsed_at(now).num_milliseconds();

        self.id = incoming.session_id;
        self.started_at = incoming.started_at;
        self.environment = incoming.environment;
        self.state = incoming.state;
        self.paused_total_ms = incoming.paused_total_ms;
        self.elapsed_credit_ms = incoming.elapsed_credit_ms;
        self.paused_since = match incoming.state {
            SessionState::Paused => Some(now),
            _ => None,
        };

        let adopted_elapsed = self.elapsed_at(now).num_milliseconds();
        if local_elapsed > adopted_elapsed {
            self.elapsed_credit_ms += local_elapsed - adopted_elapsed;
        }

        self.metrics.merge_max(&incoming.metrics);
        self.metrics.adopt_heart_rate(&incoming.metrics);
        if incoming.route.len() > self.route.len() {
            self.route = incoming.route.clone();
        }
        self.refresh(now);
    }

    /// Build the handoff snapshot for this session.
    pub fn to_handoff(&self, sender: DeviceKind, now: DateTime<Utc>) -> HandoffMessage {
        let mut paused_total_ms = self.paused_total_ms;
        if let Some(since) = self.paused_since {
            paused_total_ms += (now - since).num_milliseconds().max(0);
        }
        HandoffMessage {
            direction: HandoffDirection::from_sender(sender),
            session_id: self.id,
            kind: self.kind,
            environment: self.environment,
            state: self.state,
            started_at: self.started_at,
            paused_total_ms,
            elapsed_credit_ms: self.elapsed_credit_ms,
            metrics: self.metrics.clone(),
            route: self.route.clone(),
            sent_at: now,
        }
    }

    /// Build a periodic sync update for this session.
    pub fn to_sync_update(
        &self,
        sender: DeviceKind,
        roles: &DeviceRoles,
        now: DateTime<Utc>,
    ) -> SyncUpdate {
        SyncUpdate {
            sender,
            owner: self.owner,
            session_id: self.id,
            kind: self.kind,
            environment: self.environment,
            state: self.state,
            started_at: self.started_at,
            paused_total_ms: self.paused_total_ms,
            metrics: self.metrics.clone(),
            roles: roles.clone(),
            sent_at: now,
        }
    }
}
