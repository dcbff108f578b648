// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Workout kinds and recording environment.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Subtype for team and racquet sports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SportKind {
    Soccer,
    Basketball,
    Tennis,
    Volleyball,
    Other,
}

impl SportKind {
    fn as_str(&self) -> &'static str {
        match self {
            SportKind::Soccer => "soccer",
            SportKind::Basketball => "basketball",
            SportKind::Tennis => "tennis",
            SportKind::Volleyball => "volleyball",
            SportKind::Other => "other",
        }
    }
}

/// Kind of workout being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "sport")]
pub enum WorkoutKind {
    Run,
    Bike,
    Walk,
    Hike,
    Swim,
    Sports(SportKind),
    Gym,
    Meditation,
}

impl WorkoutKind {
    /// Stable key used for durable storage slots ("run", "sports_tennis", ...).
    pub fn key(&self) -> String {
        match self {
            WorkoutKind::Run => "run".to_string(),
            WorkoutKind::Bike => "bike".to_string(),
            WorkoutKind::Walk => "walk".to_string(),
            WorkoutKind::Hike => "hike".to_string(),
            WorkoutKind::Swim => "swim".to_string(),
            WorkoutKind::Sports(sport) => format!("sports_{}", sport.as_str()),
            WorkoutKind::Gym => "gym".to_string(),
            WorkoutKind::Meditation => "meditation".to_string(),
        }
    }

    /// Parse a key produced by [`WorkoutKind::key`].
    pub fn from_key(key: &str) -> Option<Self> {
        let kind = match key {
            "run" => WorkoutKind::Run,
            "bike" => WorkoutKind::Bike,
            "walk" => WorkoutKind::Walk,
            "hike" => WorkoutKind::Hike,
            "swim" => WorkoutKind::Swim,
            "gym" => WorkoutKind::Gym,
            "meditation" => WorkoutKind::Meditation,
            "sports_soccer" => WorkoutKind::Sports(SportKind::Soccer),
            "sports_basketball" => WorkoutKind::Sports(SportKind::Basketball),
            "sports_tennis" => WorkoutKind::Sports(SportKind::Tennis),
            "sports_volleyball" => WorkoutKind::Sports(SportKind::Volleyball),
            "sports_other" => WorkoutKind::Sports(SportKind::Other),
            _ => return None,
        };
        Some(kind)
    }

    /// Every kind that owns a durable slot.
    pub fn all() -> Vec<WorkoutKind> {
        vec![
            WorkoutKind::Run,
            WorkoutKind::Bike,
            WorkoutKind::Walk,
            WorkoutKind::Hike,
            WorkoutKind::Swim,
            WorkoutKind::Sports(SportKind::Soccer),
            WorkoutKind::Sports(SportKind::Basketball),
            WorkoutKind::Sports(SportKind::Tennis),
            WorkoutKind::Sports(SportKind::Volleyball),
            WorkoutKind::Sports(SportKind::Other),
            WorkoutKind::Gym,
            WorkoutKind::Meditation,
        ]
    }

    /// Kinds where GPS is structurally unavailable.
    ///
    /// The wearable is authoritative for everything and the handheld only
    /// mirrors values.
    pub fn lacks_gps(&self) -> bool {
        matches!(
            self,
            WorkoutKind::Swim | WorkoutKind::Gym | WorkoutKind::Meditation
        )
    }
}

impl fmt::Display for WorkoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Where the workout takes place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Indoor,
    #[default]
    Outdoor,
}
