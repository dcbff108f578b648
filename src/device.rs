// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Device runtime: the background tasks that keep one device in step with
//! its peer.
//!
//! - Inbound loop dispatching peer messages
//! - Reachability watcher
//! - Periodic sync ticker

use crate::link::{Inbound, PeerMessage, PeerReply};
use crate::services::{HandoffCoordinator, WorkoutService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A running device.
pub struct Device {
    workout: Arc<WorkoutService>,
    handoff: Arc<HandoffCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl Device {
    /// Spawn the background tasks for a device.
    pub fn spawn(
        workout: Arc<WorkoutService>,
        handoff_timeout: Duration,
        inbox: mpsc::Receiver<Inbound>,
        sync_interval: Duration,
    ) -> Self {
        let handoff = Arc::new(HandoffCoordinator::new(workout.clone(), handoff_timeout));
        let tasks = vec![
            spawn_inbound_loop(workout.clone(), handoff.clone(), inbox),
            spawn_reachability_watcher(workout.clone()),
            spawn_sync_ticker(workout.clone(), sync_interval),
        ];
        tracing::info!(
            device = %workout.local(),
            sync_interval_ms = sync_interval.as_millis() as u64,
            "Device runtime started"
        );
        Self {
            workout,
            handoff,
            tasks,
        }
    }

    pub fn workout(&self) -> &Arc<WorkoutService> {
        &self.workout
    }

    pub fn handoff(&self) -> &Arc<HandoffCoordinator> {
        &self.handoff
    }

    /// Stop the background tasks.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle messages from the peer, one at a time.
pub fn spawn_inbound_loop(
    workout: Arc<WorkoutService>,
    handoff: Arc<HandoffCoordinator>,
    mut inbox: mpsc::Receiver<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(inbound) = inbox.recv().await {
            dispatch(&workout, &handoff, inbound).await;
        }
        tracing::debug!(device = %workout.local(), "Peer inbox closed");
    })
}

async fn dispatch(workout: &WorkoutService, handoff: &HandoffCoordinator, mut inbound: Inbound) {
    match &inbound.message {
        PeerMessage::Sync(update) => {
            let update = update.clone();
            workout.apply_peer_update(update).await;
            inbound.respond(PeerReply::Ack);
        }
        PeerMessage::Handoff(_) => {
            handoff.handle_incoming(inbound).await;
        }
        PeerMessage::HandoffAccepted { session_id } => {
            let session_id = *session_id;
            handoff.handle_accepted(session_id).await;
            inbound.respond(PeerReply::Ack);
        }
    }
}

/// Recompute roles (and resync) whenever the peer comes or goes.
pub fn spawn_reachability_watcher(workout: Arc<WorkoutService>) -> JoinHandle<()> {
    let mut reachability = workout.link().reachability();
    tokio::spawn(async move {
        while reachability.changed().await.is_ok() {
            let reachable = *reachability.borrow_and_update();
            workout.on_reachability_changed(reachable).await;
        }
    })
}

/// Push the live session to the peer every `interval`.
///
/// Missed ticks are skipped; each push carries the full snapshot.
pub fn spawn_sync_ticker(workout: Arc<WorkoutService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            workout.tick().await;
        }
    })
}
