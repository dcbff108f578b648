// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local durable key-value storage.

pub mod local_store;

pub use local_store::LocalStore;

/// Key names, scoped per workout kind.
pub mod keys {
    use crate::models::WorkoutKind;

    pub const PENDING_PREFIX: &str = "pending_save";
    pub const LAST_SAVED_PREFIX: &str = "last_saved";

    /// Single pending-save slot for a workout kind.
    pub fn pending_save(kind: WorkoutKind) -> String {
        format!("{}.{}", PENDING_PREFIX, kind.key())
    }

    /// Idempotency marker: last successfully saved session id for a kind.
    pub fn last_saved(kind: WorkoutKind) -> String {
        format!("{}.{}", LAST_SAVED_PREFIX, kind.key())
    }
}
