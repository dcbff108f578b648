// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types shared by every service.

/// Application error type.
///
/// Session-logic mistakes (ending twice, pausing an idle session) are not
/// errors; they are reported as ignored transitions by the state machine.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Peer device is not reachable")]
    PeerUnreachable,

    #[error("Timed out waiting for handoff reply")]
    HandoffTimeout,

    #[error("Peer link error: {0}")]
    Link(String),

    #[error("Remote store error: {0}")]
    RemoteStore(String),

    #[error("Local storage error: {0}")]
    Storage(String),

    #[error("Session setup failed: {0}")]
    SessionSetup(String),

    #[error("Invalid payload: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Marker included in remote store errors caused by a 429 response.
    pub const REMOTE_RATE_LIMIT: &'static str = "Rate limit exceeded";

    /// Whether this failure is transient infrastructure trouble that the
    /// caller should retry (or fall back from) automatically.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::PeerUnreachable
                | AppError::HandoffTimeout
                | AppError::Link(_)
                | AppError::RemoteStore(_)
                | AppError::Storage(_)
        )
    }

    /// Whether this is a remote store rate-limit error.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            AppError::RemoteStore(msg) => msg.contains(Self::REMOTE_RATE_LIMIT),
            _ => false,
        }
    }
}

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, AppError>;
