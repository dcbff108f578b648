// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cross-device messaging.
//!
//! The link offers three delivery paths with no ordering guarantees:
//! - `notify`: fire-and-forget send to a reachable peer
//! - `request`: send to a reachable peer and wait for its reply
//! - `update_context`: last-value-wins slot replicated when the peer is
//!   next reachable

pub mod simulated;

pub use simulated::{SimulatedLink, SimulatedNetwork};

use crate::error::AppError;
use crate::models::{HandoffMessage, HandoffReply, SessionId, SyncUpdate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};

/// Message carried between the devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PeerMessage {
    /// Periodic metric/state push
    Sync(SyncUpdate),
    /// Request to take over a session
    Handoff(HandoffMessage),
    /// A handoff picked up from the shared context was accepted
    HandoffAccepted { session_id: SessionId },
}

impl PeerMessage {
    /// Slot name in the shared context; one value is kept per slot.
    pub fn context_slot(&self) -> &'static str {
        match self {
            PeerMessage::Handoff(_) => "handoff",
            PeerMessage::HandoffAccepted { .. } => "handoff_accepted",
            PeerMessage::Sync(_) => "sync",
        }
    }
}

/// Reply to a `request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PeerReply {
    Ack,
    Handoff(HandoffReply),
}

/// A message received from the peer, with a reply handle when the sender waits.
#[derive(Debug)]
pub struct Inbound {
    pub message: PeerMessage,
    reply: Option<oneshot::Sender<PeerReply>>,
}

impl Inbound {
    pub fn new(message: PeerMessage, reply: Option<oneshot::Sender<PeerReply>>) -> Self {
        Self { message, reply }
    }

    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answer the sender.
    ///
    /// Returns `false` when there was nobody to answer: the message came
    /// through the shared context, or the sender stopped waiting.
    pub fn respond(&mut self, reply: PeerReply) -> bool {
        match self.reply.take() {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }
}

/// Messaging channel between the paired devices.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Whether the peer can currently receive immediate messages.
    fn is_reachable(&self) -> bool;

    /// Reachability change notifications.
    fn reachability(&self) -> watch::Receiver<bool>;

    /// Send without waiting for a reply. Fails if the peer is unreachable.
    async fn notify(&self, message: PeerMessage) -> Result<(), AppError>;

    /// Send and wait for the peer's reply. Callers bound the wait.
    async fn request(&self, message: PeerMessage) -> Result<PeerReply, AppError>;

    /// Store `message` in the shared context for opportunistic delivery.
    async fn update_context(&self, message: PeerMessage) -> Result<(), AppError>;
}
