// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process peer link.
//!
//! Connects a handheld and a wearable inside one process. Reachability is
//! controlled by the test or simulation; shared-context values parked while
//! the peer is away are delivered when it comes back.

use super::{Inbound, PeerLink, PeerMessage, PeerReply};
use crate::error::AppError;
use crate::models::DeviceKind;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

const INBOX_CAPACITY: usize = 256;

/// Context slots waiting to be replicated to one device.
type ContextSlots = Arc<Mutex<BTreeMap<&'static str, PeerMessage>>>;

struct Endpoint {
    inbox: mpsc::Sender<Inbound>,
    context: ContextSlots,
}

/// The simulated radio shared by both ends.
pub struct SimulatedNetwork {
    reachable: watch::Sender<bool>,
    handheld: Endpoint,
    wearable: Endpoint,
}

impl SimulatedNetwork {
    fn endpoint(&self, device: DeviceKind) -> &Endpoint {
        match device {
            DeviceKind::Handheld => &self.handheld,
            DeviceKind::Wearable => &self.wearable,
        }
    }

    /// Change reachability. Coming back flushes parked context to both devices.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.send_replace(reachable);
        tracing::info!(reachable, "Simulated link reachability changed");
        if reachable {
            self.flush(DeviceKind::Handheld);
            self.flush(DeviceKind::Wearable);
        }
    }

    pub fn is_reachable(&self) -> bool {
        *self.reachable.borrow()
    }

    fn flush(&self, to: DeviceKind) {
        let endpoint = self.endpoint(to);
        let parked: Vec<PeerMessage> = {
            let mut slots = endpoint.context.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *slots).into_values().collect()
        };
        for message in parked {
            if endpoint.inbox.try_send(Inbound::new(message, None)).is_err() {
                tracing::warn!(device = %to, "Dropped context delivery (inbox full or closed)");
            }
        }
    }
}

/// One end of a simulated link.
#[derive(Clone)]
pub struct SimulatedLink {
    local: DeviceKind,
    network: Arc<SimulatedNetwork>,
    latency: Duration,
}

impl SimulatedLink {
    /// Create a connected handheld/wearable pair, initially reachable.
    ///
    /// Returns the shared network handle plus each end with its inbox.
    #[allow(clippy::type_complexity)]
    pub fn pair() -> (
        Arc<SimulatedNetwork>,
        (SimulatedLink, mpsc::Receiver<Inbound>),
        (SimulatedLink, mpsc::Receiver<Inbound>),
    ) {
        let (handheld_tx, handheld_rx) = mpsc::channel(INBOX_CAPACITY);
        let (wearable_tx, wearable_rx) = mpsc::channel(INBOX_CAPACITY);
        let (reachable, _) = watch::channel(true);

        let network = Arc::new(SimulatedNetwork {
            reachable,
            handheld: Endpoint {
                inbox: handheld_tx,
                context: Arc::new(Mutex::new(BTreeMap::new())),
            },
            wearable: Endpoint {
                inbox: wearable_tx,
                context: Arc::new(Mutex::new(BTreeMap::new())),
            },
        });

        let handheld = SimulatedLink {
            local: DeviceKind::Handheld,
            network: network.clone(),
            latency: Duration::ZERO,
        };
        let wearable = SimulatedLink {
            local: DeviceKind::Wearable,
            network: network.clone(),
            latency: Duration::ZERO,
        };
        (network, (handheld, handheld_rx), (wearable, wearable_rx))
    }

    /// Delay applied before each immediate delivery.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn local(&self) -> DeviceKind {
        self.local
    }

    fn peer(&self) -> &Endpoint {
        self.network.endpoint(self.local.peer())
    }

    async fn deliver(&self, inbound: Inbound) -> Result<(), AppError> {
        if !self.network.is_reachable() {
            return Err(AppError::PeerUnreachable);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.peer()
            .inbox
            .send(inbound)
            .await
            .map_err(|_| AppError::Link("peer inbox closed".to_string()))
    }
}

#[async_trait]
impl PeerLink for SimulatedLink {
    fn is_reachable(&self) -> bool {
        self.network.is_reachable()
    }

    fn reachability(&self) -> watch::Receiver<bool> {
        self.network.reachable.subscribe()
    }

    async fn notify(&self, message: PeerMessage) -> Result<(), AppError> {
        self.deliver(Inbound::new(message, None)).await
    }

    async fn request(&self, message: PeerMessage) -> Result<PeerReply, AppError> {
        let (tx, rx) = oneshot::channel();
        self.deliver(Inbound::new(message, Some(tx))).await?;
        rx.await
            .map_err(|_| AppError::Link("peer dropped the request".to_string()))
    }

    async fn update_context(&self, message: PeerMessage) -> Result<(), AppError> {
        let slot = message.context_slot();
        {
            let mut slots = self.peer().context.lock().unwrap_or_else(|e| e.into_inner());
            slots.insert(slot, message);
        }
        tracing::debug!(from = %self.local, slot, "Updated shared context");
        if self.network.is_reachable() {
            self.network.flush(self.local.peer());
        }
        Ok(())
    }
}
