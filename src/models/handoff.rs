// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Messages exchanged between the paired devices.

use crate::models::{
    DeviceKind, DeviceRoles, Environment, MetricsSnapshot, RoutePoint, SessionId, SessionState,
    WorkoutKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which way a handoff moves session authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffDirection {
    HandheldToWearable,
    WearableToHandheld,
}

impl HandoffDirection {
    /// Direction of a handoff initiated by `sender`.
    pub fn from_sender(sender: DeviceKind) -> Self {
        match sender {
            DeviceKind::Handheld => HandoffDirection::HandheldToWearable,
            DeviceKind::Wearable => HandoffDirection::WearableToHandheld,
        }
    }

    pub fn sender(&self) -> DeviceKind {
        match self {
            HandoffDirection::HandheldToWearable => DeviceKind::Handheld,
            HandoffDirection::WearableToHandheld => DeviceKind::Wearable,
        }
    }

    pub fn receiver(&self) -> DeviceKind {
        self.sender().peer()
    }
}

/// Full snapshot of a session being handed to the peer. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffMessage {
    pub direction: HandoffDirection,
    pub session_id: SessionId,
    pub kind: WorkoutKind,
    pub environment: Environment,
    pub state: SessionState,
    /// Original start time (preserved across handoffs)
    pub started_at: DateTime<Utc>,
    pub paused_total_ms: i64,
    pub elapsed_credit_ms: i64,
    pub metrics: MetricsSnapshot,
    #[serde(default)]
    pub route: Vec<RoutePoint>,
    pub sent_at: DateTime<Utc>,
}

/// Receiver's answer to a handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum HandoffReply {
    Accepted,
    Rejected { reason: String },
}

impl HandoffReply {
    pub fn is_accepted(&self) -> bool {
        matches!(self, HandoffReply::Accepted)
    }
}

/// Periodic metric/state push from the session owner to its peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncUpdate {
    pub sender: DeviceKind,
    /// Device that owns the session when the update was built
    pub owner: DeviceKind,
    pub session_id: SessionId,
    pub kind: WorkoutKind,
    pub environment: Environment,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub paused_total_ms: i64,
    pub metrics: MetricsSnapshot,
    /// Role assignment computed by the owner
    pub roles: DeviceRoles,
    pub sent_at: DateTime<Utc>,
}
