// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Workout session state machine for one device.
//!
//! `idle → starting → active ⇄ paused → ended`. Invalid transitions are
//! reported as [`Transition::Ignored`] rather than errors. The machine is
//! synchronous; callers serialize access to it.

use crate::models::{
    DeviceKind, DeviceRoles, Environment, HandoffMessage, HandoffReply, MetricKind, MetricSample,
    SessionId, SessionState, SyncUpdate, WorkoutKind, WorkoutSession,
};
use chrono::{DateTime, Utc};

/// Result of a requested lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied(SessionState),
    Ignored {
        state: SessionState,
        reason: &'static str,
    },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Lifecycle owner for the session on this device.
pub struct SessionStateMachine {
    local: DeviceKind,
    session: Option<WorkoutSession>,
    roles: DeviceRoles,
}

impl SessionStateMachine {
    pub fn new(local: DeviceKind) -> Self {
        Self {
            local,
            session: None,
            roles: DeviceRoles::default(),
        }
    }

    pub fn local(&self) -> DeviceKind {
        self.local
    }

    pub fn session(&self) -> Option<&WorkoutSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut WorkoutSession> {
        self.session.as_mut()
    }

    pub fn roles(&self) -> &DeviceRoles {
        &self.roles
    }

    pub fn set_roles(&mut self, roles: DeviceRoles) {
        if roles != self.roles {
            tracing::debug!(device = %self.local, ?roles, "Device roles updated");
        }
        self.roles = roles;
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    /// Whether this device owns the current session.
    pub fn is_owner(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.owner == self.local)
    }

    fn ignored(&self, reason: &'static str) -> Transition {
        tracing::debug!(
            device = %self.local,
            state = ?self.state(),
            reason,
            "Transition ignored"
        );
        Transition::Ignored {
            state: self.state(),
            reason,
        }
    }

    /// idle/ended → starting.
    pub fn begin(
        &mut self,
        kind: WorkoutKind,
        environment: Environment,
        at: DateTime<Utc>,
    ) -> Transition {
        if self.state().is_busy() {
            return self.ignored("a session is already in progress");
        }
        let session = WorkoutSession::new(kind, environment, self.local, at);
        tracing::info!(device = %self.local, session_id = %session.id, %kind, "Session starting");
        self.session = Some(session);
        Transition::Applied(SessionState::Starting)
    }

    /// starting → active. The clock starts now, after setup.
    pub fn confirm_started(&mut self, at: DateTime<Utc>) -> Transition {
        match self.session.as_mut() {
            Some(s) if s.state == SessionState::Starting => {
                s.state = SessionState::Active;
                s.started_at = at;
                tracing::info!(session_id = %s.id, "Session active");
                Transition::Applied(SessionState::Active)
            }
            _ => self.ignored("session is not starting"),
        }
    }

    /// starting → idle after a setup failure.
    pub fn abort_start(&mut self) -> Transition {
        match self.session.as_ref() {
            Some(s) if s.state == SessionState::Starting => {
                tracing::warn!(session_id = %s.id, "Session start aborted");
                self.session = None;
                Transition::Applied(SessionState::Idle)
            }
            _ => self.ignored("session is not starting"),
        }
    }

    /// active → paused.
    pub fn pause(&mut self, at: DateTime<Utc>) -> Transition {
        if !self.is_owner() {
            return self.ignored("only the owner changes the lifecycle");
        }
        match self.session.as_mut() {
            Some(s) if s.state == SessionState::Active => {
                s.refresh(at);
                s.begin_pause(at);
                tracing::info!(session_id = %s.id, "Session paused");
                Transition::Applied(SessionState::Paused)
            }
            _ => self.ignored("session is not active"),
        }
    }

    /// paused → active.
    pub fn resume(&mut self, at: DateTime<Utc>) -> Transition {
        if !self.is_owner() {
            return self.ignored("only the owner changes the lifecycle");
        }
        match self.session.as_mut() {
            Some(s) if s.state == SessionState::Paused => {
                s.end_pause(at);
                tracing::info!(
                    session_id = %s.id,
                    paused_ms = s.paused_total_ms,
                    "Session resumed"
                );
                Transition::Applied(SessionState::Active)
            }
            _ => self.ignored("session is not paused"),
        }
    }

    /// active/paused → ended. Returns the finished session once; a second
    /// call is ignored.
    pub fn end(&mut self, at: DateTime<Utc>) -> (Transition, Option<WorkoutSession>) {
        if !self.is_owner() {
            return (self.ignored("only the owner ends the session"), None);
        }
        match self.session.as_mut() {
            Some(s) if s.state.is_live() => {
                s.frozen = false;
                s.finish(at);
                tracing::info!(
                    session_id = %s.id,
                    elapsed_s = s.metrics.elapsed_seconds,
                    distance_m = s.metrics.distance_meters,
                    "Session ended"
                );
                (Transition::Applied(SessionState::Ended), Some(s.clone()))
            }
            Some(s) if s.state == SessionState::Ended => {
                (self.ignored("session already ended"), None)
            }
            _ => (self.ignored("no live session"), None),
        }
    }

    /// Apply a local sensor sample. Dropped unless the session is active and not frozen.
    pub fn ingest(&mut self, sample: &MetricSample) -> Vec<MetricKind> {
        let roles = self.roles.clone();
        match self.session.as_mut() {
            Some(s) if s.state == SessionState::Active && !s.frozen => {
                s.apply_sample(sample, &roles)
            }
            _ => Vec::new(),
        }
    }

    /// Suspend ingestion and snapshot the session for a handoff.
    pub fn freeze(&mut self, at: DateTime<Utc>) -> Option<HandoffMessage> {
        let local = self.local;
        match self.session.as_mut() {
            Some(s) if s.owner == local && s.state.is_live() && !s.frozen => {
                s.refresh(at);
                s.frozen = true;
                Some(s.to_handoff(local, at))
            }
            _ => None,
        }
    }

    pub fn unfreeze(&mut self) {
        if let Some(s) = self.session.as_mut() {
            s.frozen = false;
        }
    }

    /// Give up a session after the peer accepted it. No remote save happens.
    ///
    /// Returns the final snapshot when the session matched.
    pub fn relinquish(
        &mut self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Option<HandoffMessage> {
        match self.session.as_mut() {
            Some(s) if s.id == session_id && s.owner == self.local && s.state.is_live() => {
                s.frozen = false;
                s.refresh(at);
                let last = s.to_handoff(self.local, at);
                tracing::info!(
                    session_id = %session_id,
                    to = %self.local.peer(),
                    "Session handed off"
                );
                self.session = None;
                Some(last)
            }
            _ => None,
        }
    }

    /// Take over a session offered by the peer.
    pub fn accept_handoff(&mut self, msg: &HandoffMessage, at: DateTime<Utc>) -> HandoffReply {
        if !msg.state.is_live() {
            return HandoffReply::Rejected {
                reason: format!("session is {:?}", msg.state),
            };
        }

        let local = self.local;
        match self.session.as_mut() {
            // The owner's end overtook its own offer.
            Some(s) if s.id == msg.session_id && s.state == SessionState::Ended => {
                HandoffReply::Rejected {
                    reason: "session already ended".to_string(),
                }
            }
            Some(s) if s.state.is_live() && s.kind == msg.kind => {
                // Split-brain (or the owner flushing a final snapshot): merge.
                if s.id != msg.session_id {
                    tracing::warn!(
                        local_session = %s.id,
                        incoming_session = %msg.session_id,
                        kind = %msg.kind,
                        "Conflicting active sessions, merging into incoming"
                    );
                }
                s.merge_conflicting(msg, at);
                s.owner = local;
                s.frozen = false;
                HandoffReply::Accepted
            }
            Some(s) if s.state.is_busy() && s.owner == local => HandoffReply::Rejected {
                reason: format!("busy with a {} session", s.kind),
            },
            _ => {
                let session = WorkoutSession::from_handoff(msg, local, at);
                tracing::info!(
                    session_id = %session.id,
                    kind = %session.kind,
                    distance_m = session.metrics.distance_meters,
                    "Session rehydrated from handoff"
                );
                self.session = Some(session);
                HandoffReply::Accepted
            }
        }
    }

    /// Merge a periodic update from the peer.
    ///
    /// The owner's role assignment is adopted by companions. A companion
    /// session is created for a live peer-owned session when this device is
    /// not busy with its own.
    pub fn apply_peer_update(&mut self, update: &SyncUpdate) -> Vec<MetricKind> {
        let local = self.local;
        let owns_busy_session = self.is_owner() && self.state().is_busy();
        if !owns_busy_session && update.owner != local && update.sender == update.owner {
            self.set_roles(update.roles.clone());
        }

        let roles = self.roles.clone();
        match self.session.as_mut() {
            Some(s) if s.id == update.session_id => {
                // The peer ended a session this device took over from a stale offer.
                let peer_ended =
                    update.state == SessionState::Ended && update.sender == update.owner;
                if peer_ended && s.owner == local {
                    tracing::warn!(
                        session_id = %s.id,
                        "Peer already ended this session, following its lifecycle"
                    );
                    s.owner = update.owner;
                    s.frozen = false;
                }
                s.merge_peer_update(update, &roles)
            }
            Some(s) if s.owner == local && s.state.is_busy() => {
                tracing::debug!(
                    local_session = %s.id,
                    peer_session = %update.session_id,
                    "Ignoring update for a different session"
                );
                Vec::new()
            }
            _ if update.owner != local && update.state.is_live() => {
                let session = WorkoutSession::companion_of(update);
                tracing::info!(
                    session_id = %session.id,
                    owner = %update.owner,
                    "Companion session created"
                );
                self.session = Some(session);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Periodic update for the peer, if this device takes part in a session.
    pub fn sync_update(&self, at: DateTime<Utc>) -> Option<SyncUpdate> {
        self.session
            .as_ref()
            .filter(|s| s.state != SessionState::Starting)
            .map(|s| s.to_sync_update(self.local, &self.roles, at))
    }
}
