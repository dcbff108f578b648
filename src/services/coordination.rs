// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Device coordination: which device is authoritative for each metric.
//!
//! Policy (deterministic):
//! 1. Heart rate is always the wearable's (the handheld has no sensor)
//! 2. Kinds without GPS put every metric on the wearable; the handheld is a dashboard
//! 3. A lone reachable device takes every remaining metric
//! 4. GPS metrics go to the handheld outdoors with a good fix, else the wearable
//! 5. Calories follow distance; cadence stays on the wrist

use crate::config::DEFAULT_GPS_ACCURACY_THRESHOLD_M;
use crate::models::{DeviceKind, DeviceRoles, Environment, MetricKind, WorkoutKind};
use std::sync::Mutex;

/// Assigns an authoritative device per metric.
pub struct CoordinationEngine {
    accuracy_threshold_m: f64,
    /// Most recent handheld horizontal accuracy (meters)
    handheld_accuracy_m: Mutex<Option<f64>>,
}

impl Default for CoordinationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_GPS_ACCURACY_THRESHOLD_M)
    }
}

impl CoordinationEngine {
    pub fn new(accuracy_threshold_m: f64) -> Self {
        Self {
            accuracy_threshold_m,
            handheld_accuracy_m: Mutex::new(None),
        }
    }

    /// Record the latest handheld GPS accuracy.
    ///
    /// Returns `true` when the fix quality crossed the threshold, meaning
    /// roles must be recomputed.
    pub fn update_location_accuracy(&self, meters: f64) -> bool {
        let mut current = self
            .handheld_accuracy_m
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let was_good = is_good(*current, self.accuracy_threshold_m);
        *current = Some(meters);
        let now_good = is_good(*current, self.accuracy_threshold_m);
        if was_good != now_good {
            tracing::info!(
                accuracy_m = meters,
                threshold_m = self.accuracy_threshold_m,
                good = now_good,
                "Handheld GPS quality changed"
            );
        }
        was_good != now_good
    }

    /// Whether the handheld currently has a usable GPS fix.
    pub fn handheld_has_good_fix(&self) -> bool {
        let current = *self
            .handheld_accuracy_m
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        is_good(current, self.accuracy_threshold_m)
    }

    /// Select the primary device for one metric.
    pub fn select_role(
        &self,
        metric: MetricKind,
        kind: WorkoutKind,
        environment: Environment,
        reachable: &[DeviceKind],
    ) -> DeviceKind {
        if metric == MetricKind::HeartRate || kind.lacks_gps() {
            return DeviceKind::Wearable;
        }

        let handheld = reachable.contains(&DeviceKind::Handheld);
        let wearable = reachable.contains(&DeviceKind::Wearable);
        match (handheld, wearable) {
            (true, false) => return DeviceKind::Handheld,
            (false, _) => return DeviceKind::Wearable,
            (true, true) => {}
        }

        match metric {
            MetricKind::Distance
            | MetricKind::Pace
            | MetricKind::Elevation
            | MetricKind::Calories => {
                if environment == Environment::Outdoor && self.handheld_has_good_fix() {
                    DeviceKind::Handheld
                } else {
                    DeviceKind::Wearable
                }
            }
            MetricKind::Cadence | MetricKind::HeartRate => DeviceKind::Wearable,
        }
    }

    /// Compute the full role assignment.
    pub fn compute_roles(
        &self,
        kind: WorkoutKind,
        environment: Environment,
        reachable: &[DeviceKind],
    ) -> DeviceRoles {
        let mut roles = DeviceRoles::all_on(DeviceKind::Wearable);
        for metric in MetricKind::ALL {
            roles.set(metric, self.select_role(metric, kind, environment, reachable));
        }
        roles.dashboard = kind.lacks_gps();
        roles
    }
}

fn is_good(accuracy: Option<f64>, threshold: f64) -> bool {
    accuracy.is_some_and(|m| m >= 0.0 && m < threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: [DeviceKind; 2] = [DeviceKind::Handheld, DeviceKind::Wearable];

    #[test]
    fn test_heart_rate_always_wearable() {
        let engine = CoordinationEngine::default();
        engine.update_location_accuracy(3.0);
        for reachable in [&BOTH[..], &[DeviceKind::Handheld][..]] {
            assert_eq!(
                engine.select_role(
                    MetricKind::HeartRate,
                    WorkoutKind::Run,
                    Environment::Outdoor,
                    reachable
                ),
                DeviceKind::Wearable
            );
        }
    }

    #[test]
    fn test_good_fix_outdoors_puts_gps_metrics_on_handheld() {
        let engine = CoordinationEngine::default();
        engine.update_location_accuracy(5.0);
        let roles = engine.compute_roles(WorkoutKind::Run, Environment::Outdoor, &BOTH);

        assert_eq!(roles.primary(MetricKind::Distance), DeviceKind::Handheld);
        assert_eq!(roles.primary(MetricKind::Pace), DeviceKind::Handheld);
        assert_eq!(roles.primary(MetricKind::Elevation), DeviceKind::Handheld);
        assert_eq!(roles.primary(MetricKind::Calories), DeviceKind::Handheld);
        assert_eq!(roles.primary(MetricKind::Cadence), DeviceKind::Wearable);
        assert!(!roles.dashboard);
    }

    #[test]
    fn test_poor_fix_or_indoor_moves_gps_metrics_to_wearable() {
        let engine = CoordinationEngine::default();
        engine.update_location_accuracy(65.0);
        let roles = engine.compute_roles(WorkoutKind::Run, Environment::Outdoor, &BOTH);
        assert_eq!(roles.primary(MetricKind::Distance), DeviceKind::Wearable);

        engine.update_location_accuracy(5.0);
        let roles = engine.compute_roles(WorkoutKind::Run, Environment::Indoor, &BOTH);
        assert_eq!(roles.primary(MetricKind::Distance), DeviceKind::Wearable);
    }

    #[test]
    fn test_no_fix_yet_is_not_good() {
        let engine = CoordinationEngine::default();
        assert!(!engine.handheld_has_good_fix());
    }

    #[test]
    fn test_swim_is_dashboard_even_without_wearable() {
        let engine = CoordinationEngine::default();
        engine.update_location_accuracy(2.0);
        let roles =
            engine.compute_roles(WorkoutKind::Swim, Environment::Outdoor, &[DeviceKind::Handheld]);

        for metric in MetricKind::ALL {
            assert_eq!(roles.primary(metric), DeviceKind::Wearable);
        }
        assert!(roles.dashboard);
        assert!(!roles.is_primary(DeviceKind::Handheld, MetricKind::Distance));
    }

    #[test]
    fn test_lone_handheld_takes_everything_but_heart_rate() {
        let engine = CoordinationEngine::default();
        let roles =
            engine.compute_roles(WorkoutKind::Bike, Environment::Outdoor, &[DeviceKind::Handheld]);
        assert_eq!(roles.primary(MetricKind::Distance), DeviceKind::Handheld);
        assert_eq!(roles.primary(MetricKind::Cadence), DeviceKind::Handheld);
        assert_eq!(roles.primary(MetricKind::HeartRate), DeviceKind::Wearable);
    }

    #[test]
    fn test_threshold_crossing_reported_once() {
        let engine = CoordinationEngine::new(20.0);
        assert!(engine.update_location_accuracy(8.0));
        assert!(!engine.update_location_accuracy(12.0));
        assert!(engine.update_location_accuracy(35.0));
        assert!(!engine.update_location_accuracy(40.0));
    }
}
