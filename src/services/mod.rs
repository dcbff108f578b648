// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - session coordination and persistence.

pub mod calories;
pub mod coordination;
pub mod handoff;
pub mod persistence;
pub mod platform;
pub mod remote;
pub mod session;
pub mod sync;
pub mod workout;

pub use coordination::CoordinationEngine;
pub use handoff::{HandoffCoordinator, HandoffOutcome};
pub use persistence::{PersistenceClient, RetryPolicy, SaveOutcome};
pub use platform::{AllowAllSensors, NoopRecorder, SensorAuthorizer, WorkoutRecorder};
pub use remote::{HttpWorkoutStore, WorkoutStore};
pub use session::{SessionStateMachine, Transition};
pub use sync::{Delivery, MetricsSync};
pub use workout::{EndResult, WorkoutService};
