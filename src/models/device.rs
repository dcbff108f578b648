// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Devices, metric kinds and per-metric authority assignments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One of the two paired devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Handheld,
    Wearable,
}

impl DeviceKind {
    /// The other device of the pair.
    pub fn peer(&self) -> DeviceKind {
        match self {
            DeviceKind::Handheld => DeviceKind::Wearable,
            DeviceKind::Wearable => DeviceKind::Handheld,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Handheld => "handheld",
            DeviceKind::Wearable => "wearable",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "handheld" | "phone" => Ok(DeviceKind::Handheld),
            "wearable" | "watch" => Ok(DeviceKind::Wearable),
            other => Err(format!("unknown device kind: {}", other)),
        }
    }
}

/// Metric kinds that can have an authoritative source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Distance,
    HeartRate,
    Pace,
    Calories,
    Cadence,
    Elevation,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Distance,
        MetricKind::HeartRate,
        MetricKind::Pace,
        MetricKind::Calories,
        MetricKind::Cadence,
        MetricKind::Elevation,
    ];

    /// Metrics derived from location fixes.
    pub fn is_gps_derived(&self) -> bool {
        matches!(
            self,
            MetricKind::Distance | MetricKind::Pace | MetricKind::Elevation
        )
    }
}

/// Per-metric primary device, recomputed on reachability or environment changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRoles {
    primary: BTreeMap<MetricKind, DeviceKind>,
    /// The handheld only mirrors values and never contributes readings
    pub dashboard: bool,
}

impl Default for DeviceRoles {
    /// Wearable-authoritative for everything, before any policy evaluation.
    fn default() -> Self {
        Self::all_on(DeviceKind::Wearable)
    }
}

impl DeviceRoles {
    /// Assign every metric to one device.
    pub fn all_on(device: DeviceKind) -> Self {
        Self {
            primary: MetricKind::ALL.iter().map(|m| (*m, device)).collect(),
            dashboard: false,
        }
    }

    pub fn set(&mut self, metric: MetricKind, device: DeviceKind) {
        self.primary.insert(metric, device);
    }

    /// The primary device for a metric.
    pub fn primary(&self, metric: MetricKind) -> DeviceKind {
        self.primary
            .get(&metric)
            .copied()
            .unwrap_or(DeviceKind::Wearable)
    }

    /// Whether `device` is primary for `metric`.
    pub fn is_primary(&self, device: DeviceKind, metric: MetricKind) -> bool {
        if self.dashboard && device == DeviceKind::Handheld {
            return false;
        }
        self.primary(metric) == device
    }
}
