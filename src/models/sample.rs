// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Raw metric samples produced by device sensors.

use crate::models::{DeviceKind, MetricKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Reading {
    /// GPS fix
    Location {
        latitude: f64,
        longitude: f64,
        /// Altitude in meters, if known
        altitude: Option<f64>,
        /// Horizontal accuracy radius in meters
        horizontal_accuracy: f64,
    },
    HeartRate { bpm: f64 },
    /// Steps (or strokes) per minute
    Cadence { per_minute: f64 },
    /// Distance covered since the previous delta (pedometer, wheel sensor)
    DistanceDelta { meters: f64 },
    /// Total active calories reported directly by the device
    Calories { kcal: f64 },
}

impl Reading {
    /// The metric this reading contributes to.
    pub fn metric(&self) -> MetricKind {
        match self {
            Reading::Location { .. } | Reading::DistanceDelta { .. } => MetricKind::Distance,
            Reading::HeartRate { .. } => MetricKind::HeartRate,
            Reading::Cadence { .. } => MetricKind::Cadence,
            Reading::Calories { .. } => MetricKind::Calories,
        }
    }
}

/// A timestamped reading from one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub source: DeviceKind,
    pub recorded_at: DateTime<Utc>,
    pub reading: Reading,
}

impl MetricSample {
    pub fn new(source: DeviceKind, recorded_at: DateTime<Utc>, reading: Reading) -> Self {
        Self {
            source,
            recorded_at,
            reading,
        }
    }
}

/// A recorded route point, kept for the saved workout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub recorded_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    /// Heart rate at the time of the fix, if one was known
    pub heart_rate: Option<f64>,
    /// Cumulative distance at this point (meters)
    pub distance_meters: f64,
}
