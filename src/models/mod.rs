// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for sessions, devices and saves.

pub mod device;
pub mod handoff;
pub mod sample;
pub mod save;
pub mod session;
pub mod workout;

pub use device::{DeviceKind, DeviceRoles, MetricKind};
pub use handoff::{HandoffDirection, HandoffMessage, HandoffReply, SyncUpdate};
pub use sample::{MetricSample, Reading, RoutePoint};
pub use save::{
    DeviceMetadata, PendingSave, SaveWorkoutRequest, SaveWorkoutResponse, Visibility,
};
pub use session::{MetricsSnapshot, SessionId, SessionState, WorkoutSession};
pub use workout::{Environment, SportKind, WorkoutKind};
