// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! MET-based calorie estimate, used when no device reports calories directly.

use crate::models::{SportKind, WorkoutKind};
use chrono::Duration;

/// Metabolic equivalent of task for each workout kind.
///
/// Values follow the Compendium of Physical Activities for moderate effort.
pub fn met_for(kind: WorkoutKind) -> f64 {
    match kind {
        WorkoutKind::Run => 9.8,
        WorkoutKind::Bike => 7.5,
        WorkoutKind::Walk => 3.5,
        WorkoutKind::Hike => 6.0,
        WorkoutKind::Swim => 8.0,
        WorkoutKind::Sports(SportKind::Soccer) => 7.0,
        WorkoutKind::Sports(SportKind::Basketball) => 6.5,
        WorkoutKind::Sports(SportKind::Tennis) => 7.3,
        WorkoutKind::Sports(SportKind::Volleyball) => 4.0,
        WorkoutKind::Sports(SportKind::Other) => 6.0,
        WorkoutKind::Gym => 5.0,
        WorkoutKind::Meditation => 1.0,
    }
}

/// kcal = MET × body weight (kg) × elapsed hours.
pub fn estimate_kcal(kind: WorkoutKind, body_weight_kg: f64, elapsed: Duration) -> f64 {
    let hours = elapsed.num_milliseconds().max(0) as f64 / 3_600_000.0;
    met_for(kind) * body_weight_kg * hours
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hour_run_at_70kg() {
        let kcal = estimate_kcal(WorkoutKind::Run, 70.0, Duration::hours(1));
        assert!((kcal - 686.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_elapsed_is_zero() {
        assert_eq!(estimate_kcal(WorkoutKind::Bike, 80.0, Duration::zero()), 0.0);
    }

    #[test]
    fn test_meditation_is_resting_rate() {
        let kcal = estimate_kcal(WorkoutKind::Meditation, 60.0, Duration::minutes(30));
        assert!((kcal - 30.0).abs() < 1e-9);
    }
}
