// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Remote workout store client.
//!
//! Handles:
//! - Submitting finished workouts
//! - Mapping non-success statuses and decode failures to errors
//! - Rate limit detection (the retry path waits an extra backoff step)

use crate::error::AppError;
use crate::models::{SaveWorkoutRequest, SaveWorkoutResponse};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Destination for finished workouts: `submit(payload) -> id | error`.
#[async_trait]
pub trait WorkoutStore: Send + Sync {
    /// Submit a workout and return the activity id assigned by the store.
    async fn submit(&self, request: &SaveWorkoutRequest) -> Result<String, AppError>;
}

/// HTTP client for the remote workout store.
#[derive(Clone)]
pub struct HttpWorkoutStore {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpWorkoutStore {
    /// Create a client for the store at `base_url`.
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                tracing::warn!("Remote store rate limit hit (429)");
                return Err(AppError::RemoteStore(AppError::REMOTE_RATE_LIMIT.to_string()));
            }

            return Err(AppError::RemoteStore(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::RemoteStore(format!("JSON parse error: {}", e)))
    }
}

#[async_trait]
impl WorkoutStore for HttpWorkoutStore {
    async fn submit(&self, request: &SaveWorkoutRequest) -> Result<String, AppError> {
        let url = format!("{}/workouts", self.base_url);

        let mut builder = self.http.post(&url).json(request);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::RemoteStore(e.to_string()))?;

        let body: SaveWorkoutResponse = self.check_response_json(response).await?;
        if !body.success {
            return Err(AppError::RemoteStore(
                body.error
                    .unwrap_or_else(|| "save rejected without reason".to_string()),
            ));
        }

        let activity_id = body
            .activity_id
            .ok_or_else(|| AppError::RemoteStore("response missing activity_id".to_string()))?;

        tracing::info!(
            session_id = %request.session_id,
            activity_id = %activity_id,
            "Workout saved to remote store"
        );
        Ok(activity_id)
    }
}
