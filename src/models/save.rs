// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Save payloads for the remote workout store and their durable pending form.

use crate::models::{RoutePoint, SessionId, WorkoutKind, WorkoutSession};
use crate::time_utils::format_utc_rfc3339;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Maximum caption length accepted by the remote store.
pub const MAX_CAPTION_LEN: u64 = 500;

/// Who can see a saved workout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    Followers,
    Public,
}

/// Device and app metadata attached to every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub device_model: String,
    pub app_version: String,
    pub platform: String,
}

impl Default for DeviceMetadata {
    fn default() -> Self {
        Self {
            device_model: "unknown".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

/// Request body submitted to the remote workout store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SaveWorkoutRequest {
    #[validate(length(min = 1))]
    pub user_id: String,
    pub session_id: SessionId,
    pub workout_kind: WorkoutKind,
    #[validate(range(min = 0.0))]
    pub duration_seconds: f64,
    #[validate(range(min = 0.0))]
    pub distance_meters: f64,
    pub calories_kcal: f64,
    pub average_heart_rate: Option<f64>,
    pub max_heart_rate: Option<f64>,
    pub elevation_gain_meters: f64,
    pub elevation_loss_meters: f64,
    /// Ordered route / metric samples
    pub samples: Vec<RoutePoint>,
    /// Route encoded as a precision-5 polyline
    pub route_polyline: Option<String>,
    #[validate(length(max = 500))]
    pub caption: Option<String>,
    pub visibility: Visibility,
    /// Original creation time (RFC 3339)
    pub created_at: String,
    pub device: DeviceMetadata,
}

impl SaveWorkoutRequest {
    /// Build a save request from a finished session.
    pub fn from_session(
        session: &WorkoutSession,
        user_id: &str,
        caption: Option<String>,
        visibility: Visibility,
        device: DeviceMetadata,
    ) -> Self {
        let metrics = &session.metrics;
        Self {
            user_id: user_id.to_string(),
            session_id: session.id,
            workout_kind: session.kind,
            duration_seconds: metrics.elapsed_seconds,
            distance_meters: metrics.distance_meters,
            calories_kcal: metrics.calories_kcal,
            average_heart_rate: metrics.average_heart_rate,
            max_heart_rate: metrics.max_heart_rate,
            elevation_gain_meters: metrics.elevation_gain_meters,
            elevation_loss_meters: metrics.elevation_loss_meters,
            samples: session.route.clone(),
            route_polyline: encode_route(&session.route),
            caption,
            visibility,
            created_at: format_utc_rfc3339(session.started_at),
            device,
        }
    }
}

/// Encode route points as a polyline, or `None` for routes without fixes.
fn encode_route(route: &[RoutePoint]) -> Option<String> {
    if route.is_empty() {
        return None;
    }
    let line: geo::LineString<f64> = route
        .iter()
        .map(|p| (p.longitude, p.latitude))
        .collect::<Vec<_>>()
        .into();
    polyline::encode_coordinates(line, 5).ok()
}

/// Response from the remote workout store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveWorkoutResponse {
    pub success: bool,
    pub activity_id: Option<String>,
    pub error: Option<String>,
}

/// A save that has not reached the remote store yet.
///
/// Stored in the single pending slot for its workout kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSave {
    pub request: SaveWorkoutRequest,
    /// Failed submission attempts so far
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// The last failure was a remote rate limit
    #[serde(default)]
    pub rate_limited: bool,
    /// When the payload was first parked (RFC 3339)
    pub first_failed_at: String,
}

impl PendingSave {
    pub fn session_id(&self) -> SessionId {
        self.request.session_id
    }

    pub fn kind(&self) -> WorkoutKind {
        self.request.workout_kind
    }
}
