// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Two-phase session handoff between the paired devices.
//!
//! The initiator freezes its session and sends a snapshot. The receiver
//! rehydrates it (merging when it already tracks one of the same kind) and
//! replies. Without a reply inside the timeout, or with the peer away, the
//! snapshot is parked in the shared context and the initiator keeps
//! tracking. A receiver that accepts a parked snapshot announces it with
//! [`PeerMessage::HandoffAccepted`]; the initiator then relinquishes the
//! session and sends its final snapshot for a max-merge.

use crate::error::AppError;
use crate::link::{Inbound, PeerLink, PeerMessage, PeerReply};
use crate::models::{HandoffMessage, HandoffReply, SessionId};
use crate::services::sync::send_or_park;
use crate::services::workout::WorkoutService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Result of a handoff request, as seen by the initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// The peer took over; this device relinquished the session
    Completed { session_id: SessionId },
    /// The peer refused; this device keeps tracking
    Rejected { reason: String },
    /// No timely reply; the snapshot waits in the shared context
    Deferred { session_id: SessionId },
    /// The session ended here before the peer's acceptance arrived; the
    /// peer is told to follow the end
    EndedLocally { session_id: SessionId },
    /// This device owns no live session
    NothingToHandOff,
}

/// Runs handoffs for one device.
pub struct HandoffCoordinator {
    workout: Arc<WorkoutService>,
    timeout: Duration,
    /// Session offered through the shared context and not yet confirmed
    pending: Mutex<Option<SessionId>>,
}

impl HandoffCoordinator {
    pub fn new(workout: Arc<WorkoutService>, timeout: Duration) -> Self {
        Self {
            workout,
            timeout,
            pending: Mutex::new(None),
        }
    }

    fn link(&self) -> &Arc<dyn PeerLink> {
        self.workout.link()
    }

    /// Session offered through the shared context, if any.
    pub async fn pending(&self) -> Option<SessionId> {
        *self.pending.lock().await
    }

    /// Offer the owned session to the peer.
    pub async fn request_handoff(&self) -> Result<HandoffOutcome, AppError> {
        let Some(msg) = self.workout.freeze_for_handoff().await else {
            return Ok(HandoffOutcome::NothingToHandOff);
        };
        let session_id = msg.session_id;
        tracing::info!(
            session_id = %session_id,
            direction = ?msg.direction,
            "Requesting handoff"
        );

        let reply = if self.link().is_reachable() {
            let request = self.link().request(PeerMessage::Handoff(msg.clone()));
            tokio::time::timeout(self.timeout, request)
                .await
                .unwrap_or(Err(AppError::HandoffTimeout))
        } else {
            Err(AppError::PeerUnreachable)
        };

        match reply {
            Ok(PeerReply::Handoff(HandoffReply::Accepted)) => {
                self.clear_pending(session_id).await;
                if self.workout.relinquish(session_id).await.is_some() {
                    return Ok(HandoffOutcome::Completed { session_id });
                }
                tracing::warn!(
                    session_id = %session_id,
                    "Session ended before the peer took over, resending the end"
                );
                self.workout.sync_now().await;
                Ok(HandoffOutcome::EndedLocally { session_id })
            }
            Ok(PeerReply::Handoff(HandoffReply::Rejected { reason })) => {
                tracing::warn!(session_id = %session_id, %reason, "Handoff rejected by peer");
                self.workout.unfreeze().await;
                Ok(HandoffOutcome::Rejected { reason })
            }
            Ok(PeerReply::Ack) => {
                self.workout.unfreeze().await;
                Err(AppError::Internal(anyhow::anyhow!(
                    "unexpected reply to handoff request {}",
                    session_id
                )))
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    session_id = %session_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    error = %e,
                    "Deferring handoff"
                );
                self.defer(msg).await
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Handoff request failed");
                self.workout.unfreeze().await;
                Err(e)
            }
        }
    }

    /// Park the snapshot in the shared context and resume local tracking.
    async fn defer(&self, msg: HandoffMessage) -> Result<HandoffOutcome, AppError> {
        let session_id = msg.session_id;
        let parked = self.link().update_context(PeerMessage::Handoff(msg)).await;
        self.workout.unfreeze().await;
        parked?;
        *self.pending.lock().await = Some(session_id);
        Ok(HandoffOutcome::Deferred { session_id })
    }

    async fn clear_pending(&self, session_id: SessionId) {
        let mut pending = self.pending.lock().await;
        if *pending == Some(session_id) {
            *pending = None;
        }
    }

    /// Handle a handoff snapshot from the peer.
    ///
    /// When no reply reaches the sender (context delivery, or the sender
    /// already gave up waiting) an acceptance is announced separately.
    pub async fn handle_incoming(&self, mut inbound: Inbound) -> HandoffReply {
        let PeerMessage::Handoff(msg) = &inbound.message else {
            return HandoffReply::Rejected {
                reason: "not a handoff".to_string(),
            };
        };
        let session_id = msg.session_id;
        let reply = self.workout.receive_handoff(msg.clone()).await;

        let delivered = inbound.respond(PeerReply::Handoff(reply.clone()));
        if reply.is_accepted() && !delivered {
            tracing::info!(session_id = %session_id, "Announcing handoff acceptance");
            let accepted = PeerMessage::HandoffAccepted { session_id };
            if let Err(e) = send_or_park(self.link().as_ref(), accepted).await {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to announce handoff acceptance"
                );
            }
        }
        reply
    }

    /// The peer took over a session this device offered earlier.
    ///
    /// The session is relinquished and its final snapshot sent so the
    /// peer can max-merge what was tracked here in the meantime. A session
    /// that already ended here is reported back through a sync update.
    pub async fn handle_accepted(&self, session_id: SessionId) {
        self.clear_pending(session_id).await;

        if let Some(last) = self.workout.relinquish(session_id).await {
            tracing::info!(
                session_id = %session_id,
                "Deferred handoff completed, sending final snapshot"
            );
            if let Err(e) = send_or_park(self.link().as_ref(), PeerMessage::Handoff(last)).await {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to send final snapshot"
                );
            }
            return;
        }

        match self.workout.snapshot().await {
            Some(s) if s.id == session_id && s.owner == self.workout.local() => {
                tracing::info!(
                    session_id = %session_id,
                    state = ?s.state,
                    "Accepted handoff for a session no longer live"
                );
                self.workout.sync_now().await;
            }
            _ => {
                tracing::debug!(session_id = %session_id, "Handoff acceptance for unknown session");
            }
        }
    }
}
