// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable persistence of finished workouts.
//!
//! Handles the save workflow:
//! 1. Skip sessions already recorded by the idempotency marker
//! 2. Submit to the remote store
//! 3. On failure park the payload in the kind's pending slot
//! 4. Retry with `base × 2^(attempt-1)` delay until the attempt cap
//! 5. Leave exhausted payloads durable for the next explicit retry
//!
//! A rate-limited attempt waits one extra backoff step. Failures that are
//! not transient (the store rejecting the payload itself) stop automatic
//! retries.
//!
//! There is one pending slot per workout kind and at most one retry loop
//! driving it. A second failed save of the same kind replaces the first
//! one's payload; this is logged loudly.

use crate::db::{keys, LocalStore};
use crate::error::AppError;
use crate::models::{PendingSave, SaveWorkoutRequest, SessionId, WorkoutKind};
use crate::services::remote::WorkoutStore;
use crate::time_utils::format_utc_rfc3339;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use validator::Validate;

const MAX_CONCURRENT_RESUMES: usize = 4;

/// Exponential backoff settings for save retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// Total submission attempts, including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

/// Outcome of a save or retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Stored remotely under this activity id
    Saved { activity_id: String },
    /// Already saved earlier; nothing submitted
    Duplicate,
    /// Parked in the pending slot after this many failed attempts
    Pending { attempts: u32 },
}

/// Submits finished workouts and keeps failed ones durable.
pub struct PersistenceClient {
    store: Arc<dyn WorkoutStore>,
    local: LocalStore,
    policy: RetryPolicy,
    /// Per-kind locks serializing slot access between save and retry.
    locks: DashMap<WorkoutKind, Arc<Mutex<()>>>,
    /// Kinds with a background retry loop running
    retry_loops: DashMap<WorkoutKind, ()>,
}

/// Result of one submission of the pending slot.
enum Attempt {
    /// The slot reached a final state for this run
    Done(SaveOutcome),
    /// Submission failed; the slot holds the updated failure count
    Failed,
    /// The slot changed while waiting; backoff restarts from its new state
    Replaced,
}

impl PersistenceClient {
    pub fn new(store: Arc<dyn WorkoutStore>, local: LocalStore, policy: RetryPolicy) -> Self {
        Self {
            store,
            local,
            policy,
            locks: DashMap::new(),
            retry_loops: DashMap::new(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn lock_for(&self, kind: WorkoutKind) -> Arc<Mutex<()>> {
        self.locks
            .entry(kind)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read the pending slot for a kind.
    pub async fn pending(&self, kind: WorkoutKind) -> Result<Option<PendingSave>, AppError> {
        self.local.get(&keys::pending_save(kind)).await
    }

    /// Last session id successfully saved for a kind.
    pub async fn last_saved(&self, kind: WorkoutKind) -> Result<Option<SessionId>, AppError> {
        self.local.get(&keys::last_saved(kind)).await
    }

    async fn already_saved(&self, kind: WorkoutKind, id: SessionId) -> Result<bool, AppError> {
        Ok(self.last_saved(kind).await? == Some(id))
    }

    /// Save a finished workout, parking it durably on failure.
    ///
    /// Validation failures are parked without automatic retries and
    /// returned as errors.
    pub async fn save(&self, request: SaveWorkoutRequest) -> Result<SaveOutcome, AppError> {
        let kind = request.workout_kind;
        let lock = self.lock_for(kind);
        let _guard = lock.lock().await;

        if self.already_saved(kind, request.session_id).await? {
            tracing::info!(
                session_id = %request.session_id,
                "Workout already saved (idempotent skip)"
            );
            return Ok(SaveOutcome::Duplicate);
        }

        if let Err(e) = request.validate() {
            let err = AppError::Validation(e.to_string());
            tracing::error!(session_id = %request.session_id, error = %err, "Invalid save payload");
            self.park(request, self.policy.max_attempts, &err).await?;
            return Err(err);
        }

        match self.store.submit(&request).await {
            Ok(activity_id) => {
                self.mark_saved(kind, request.session_id).await?;
                Ok(SaveOutcome::Saved { activity_id })
            }
            Err(e) => {
                let attempts = self.failures_after(0, &e);
                tracing::warn!(
                    session_id = %request.session_id,
                    kind = %kind,
                    error = %e,
                    rate_limited = e.is_rate_limited(),
                    "Workout save failed, parking for retry"
                );
                self.park(request, attempts, &e).await?;
                Ok(SaveOutcome::Pending { attempts })
            }
        }
    }

    /// Failure count to record after a failed attempt. A failure the store
    /// will repeat uses up the whole budget.
    fn failures_after(&self, previous: u32, error: &AppError) -> u32 {
        if error.is_transient() {
            previous + 1
        } else {
            tracing::warn!(error = %error, "Non-transient save failure, no automatic retries");
            self.policy.max_attempts.max(previous + 1)
        }
    }

    /// Write the pending slot. Replacing a different session's payload is
    /// the single-slot limitation and is reported.
    async fn park(
        &self,
        request: SaveWorkoutRequest,
        retry_count: u32,
        error: &AppError,
    ) -> Result<(), AppError> {
        let key = keys::pending_save(request.workout_kind);
        let first_failed_at = match self.local.get::<PendingSave>(&key).await? {
            Some(existing) if existing.session_id() == request.session_id => {
                existing.first_failed_at
            }
            Some(existing) => {
                tracing::warn!(
                    kind = %request.workout_kind,
                    dropped_session = %existing.session_id(),
                    new_session = %request.session_id,
                    "Pending slot already held another workout; it is being overwritten"
                );
                format_utc_rfc3339(chrono::Utc::now())
            }
            None => format_utc_rfc3339(chrono::Utc::now()),
        };

        let pending = PendingSave {
            request,
            retry_count,
            last_error: Some(error.to_string()),
            rate_limited: error.is_rate_limited(),
            first_failed_at,
        };
        self.local.put(&key, &pending).await
    }

    async fn mark_saved(&self, kind: WorkoutKind, id: SessionId) -> Result<(), AppError> {
        self.local.put(&keys::last_saved(kind), &id).await?;
        let key = keys::pending_save(kind);
        if let Some(pending) = self.local.get::<PendingSave>(&key).await? {
            if pending.session_id() == id {
                self.local.delete(&key).await?;
            }
        }
        Ok(())
    }

    /// Drive the pending slot for `kind` through backoff until it is saved
    /// or the attempt cap is reached.
    ///
    /// Returns `None` when the slot is empty.
    pub async fn retry_pending(&self, kind: WorkoutKind) -> Result<Option<SaveOutcome>, AppError> {
        loop {
            let Some(pending) = self.pending(kind).await? else {
                return Ok(None);
            };
            if self.policy.exhausted(pending.retry_count) {
                tracing::warn!(
                    kind = %kind,
                    session_id = %pending.session_id(),
                    attempts = pending.retry_count,
                    "Save attempts exhausted; payload kept for explicit retry"
                );
                return Ok(Some(SaveOutcome::Pending {
                    attempts: pending.retry_count,
                }));
            }

            let steps = pending.retry_count + u32::from(pending.rate_limited);
            let delay = self.policy.delay_after(steps);
            tracing::info!(
                kind = %kind,
                attempt = pending.retry_count + 1,
                delay_ms = delay.as_millis() as u64,
                rate_limited = pending.rate_limited,
                "Scheduling save retry"
            );
            tokio::time::sleep(delay).await;

            let expected = (pending.session_id(), pending.retry_count);
            match self.attempt_pending(kind, Some(expected)).await? {
                Attempt::Done(outcome) => return Ok(Some(outcome)),
                Attempt::Failed | Attempt::Replaced => {}
            }
        }
    }

    /// One submission of whatever is in the slot now.
    ///
    /// With `expected` set, a slot that no longer holds that session at that
    /// failure count is left alone so its own backoff applies.
    async fn attempt_pending(
        &self,
        kind: WorkoutKind,
        expected: Option<(SessionId, u32)>,
    ) -> Result<Attempt, AppError> {
        let lock = self.lock_for(kind);
        let _guard = lock.lock().await;

        // The slot may have been cleared or replaced while sleeping.
        let Some(pending) = self.pending(kind).await? else {
            return Ok(Attempt::Done(SaveOutcome::Duplicate));
        };
        let session_id = pending.session_id();
        if expected.is_some_and(|e| e != (session_id, pending.retry_count)) {
            tracing::debug!(
                kind = %kind,
                session_id = %session_id,
                "Pending slot changed, rescheduling"
            );
            return Ok(Attempt::Replaced);
        }
        if self.already_saved(kind, session_id).await? {
            self.local.delete(&keys::pending_save(kind)).await?;
            return Ok(Attempt::Done(SaveOutcome::Duplicate));
        }

        match self.store.submit(&pending.request).await {
            Ok(activity_id) => {
                tracing::info!(
                    kind = %kind,
                    session_id = %session_id,
                    attempts = pending.retry_count + 1,
                    "Pending workout saved"
                );
                self.mark_saved(kind, session_id).await?;
                Ok(Attempt::Done(SaveOutcome::Saved { activity_id }))
            }
            Err(e) => {
                let failures = self.failures_after(pending.retry_count, &e);
                tracing::warn!(
                    kind = %kind,
                    session_id = %session_id,
                    failures,
                    error = %e,
                    "Save retry failed"
                );
                self.park(pending.request, failures, &e).await?;
                Ok(Attempt::Failed)
            }
        }
    }

    /// Run [`retry_pending`](Self::retry_pending) in the background.
    ///
    /// Returns `None` when a loop for `kind` is already running; that loop
    /// picks up whatever the slot holds.
    pub fn spawn_retries(self: &Arc<Self>, kind: WorkoutKind) -> Option<JoinHandle<()>> {
        match self.retry_loops.entry(kind) {
            Entry::Occupied(_) => {
                tracing::debug!(kind = %kind, "Save retry loop already running");
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let client = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                let result = client.retry_pending(kind).await;
                client.retry_loops.remove(&kind);
                if let Err(e) = result {
                    tracing::error!(kind = %kind, error = %e, "Save retry loop failed");
                    break;
                }
                // A save parked while this loop was finishing saw it still registered.
                let resumable = matches!(
                    client.pending(kind).await,
                    Ok(Some(p)) if !client.policy.exhausted(p.retry_count)
                );
                if !resumable || client.retry_loops.insert(kind, ()).is_some() {
                    break;
                }
            }
        }))
    }

    /// Explicit retry trigger (process start): every parked payload gets a
    /// fresh attempt budget and is retried immediately.
    pub async fn resume_pending(&self) -> Result<Vec<(WorkoutKind, SaveOutcome)>, AppError> {
        let prefix = format!("{}.", keys::PENDING_PREFIX);
        let slot_keys = self.local.keys_with_prefix(&prefix).await?;
        let kinds: Vec<WorkoutKind> = slot_keys
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(WorkoutKind::from_key)
            .collect();

        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(count = kinds.len(), "Resuming pending workout saves");

        type Resumed = (WorkoutKind, Result<Option<SaveOutcome>, AppError>);
        let results: Vec<Resumed> = stream::iter(kinds)
            .map(|kind| async move { (kind, self.resume_one(kind).await) })
            .buffer_unordered(MAX_CONCURRENT_RESUMES)
            .collect()
            .await;

        let mut outcomes = Vec::new();
        for (kind, result) in results {
            match result {
                Ok(Some(outcome)) => outcomes.push((kind, outcome)),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(kind = %kind, error = %e, "Failed to resume pending save");
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }

    async fn resume_one(&self, kind: WorkoutKind) -> Result<Option<SaveOutcome>, AppError> {
        {
            let lock = self.lock_for(kind);
            let _guard = lock.lock().await;
            let Some(mut pending) = self.pending(kind).await? else {
                return Ok(None);
            };
            if let Err(e) = pending.request.validate() {
                tracing::warn!(kind = %kind, error = %e, "Skipping invalid pending payload");
                return Ok(Some(SaveOutcome::Pending {
                    attempts: pending.retry_count,
                }));
            }
            pending.retry_count = 0;
            self.local.put(&keys::pending_save(kind), &pending).await?;
        }

        match self.attempt_pending(kind, None).await? {
            Attempt::Done(outcome) => Ok(Some(outcome)),
            Attempt::Failed | Attempt::Replaced => self.retry_pending(kind).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(500),
            max_attempts: 5,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(4), Duration::from_millis(4000));
    }

    #[test]
    fn test_exhaustion_at_cap() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));
    }
}
