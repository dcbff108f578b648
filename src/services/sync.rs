// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Metrics synchronization channel.
//!
//! Best-effort push of the local snapshot to the peer: an immediate send
//! when the peer is reachable, otherwise the shared context slot.

use crate::error::AppError;
use crate::link::{PeerLink, PeerMessage};
use crate::models::SyncUpdate;
use std::sync::Arc;

/// How an update left this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Immediate,
    Context,
}

/// Pushes sync updates over the peer link.
#[derive(Clone)]
pub struct MetricsSync {
    link: Arc<dyn PeerLink>,
}

impl MetricsSync {
    pub fn new(link: Arc<dyn PeerLink>) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &Arc<dyn PeerLink> {
        &self.link
    }

    /// Push one update.
    pub async fn push(&self, update: SyncUpdate) -> Result<Delivery, AppError> {
        send_or_park(self.link.as_ref(), PeerMessage::Sync(update)).await
    }
}

/// Send immediately when possible, falling back to the shared context.
pub async fn send_or_park(link: &dyn PeerLink, message: PeerMessage) -> Result<Delivery, AppError> {
    if link.is_reachable() {
        match link.notify(message.clone()).await {
            Ok(()) => return Ok(Delivery::Immediate),
            Err(e) => {
                tracing::debug!(error = %e, "Immediate send failed, using shared context");
            }
        }
    }
    link.update_context(message).await?;
    Ok(Delivery::Context)
}
