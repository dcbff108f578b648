// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Platform collaborators consulted while starting and ending a session.

use crate::error::AppError;
use crate::models::WorkoutKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// External workout store (platform health store).
///
/// Used for audit/history only; failures never abort tracking.
#[async_trait]
pub trait WorkoutRecorder: Send + Sync {
    async fn begin_collection(&self, start: DateTime<Utc>) -> Result<(), AppError>;
    async fn end_collection(&self, end: DateTime<Utc>) -> Result<(), AppError>;
    async fn finish_workout(&self) -> Result<(), AppError>;
}

/// Recorder for platforms without a health store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

#[async_trait]
impl WorkoutRecorder for NoopRecorder {
    async fn begin_collection(&self, _start: DateTime<Utc>) -> Result<(), AppError> {
        Ok(())
    }

    async fn end_collection(&self, _end: DateTime<Utc>) -> Result<(), AppError> {
        Ok(())
    }

    async fn finish_workout(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Sensor authorization performed while a session is starting.
///
/// A failure here is unrecoverable for the start attempt.
#[async_trait]
pub trait SensorAuthorizer: Send + Sync {
    async fn authorize(&self, kind: WorkoutKind) -> Result<(), AppError>;
}

/// Authorizer that grants everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllSensors;

#[async_trait]
impl SensorAuthorizer for AllowAllSensors {
    async fn authorize(&self, _kind: WorkoutKind) -> Result<(), AppError> {
        Ok(())
    }
}
