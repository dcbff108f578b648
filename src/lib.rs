// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Workout Relay: coordinate a workout session across a handheld and a
//! wearable and persist it once it ends.
//!
//! This crate provides the session state machine, per-metric device
//! coordination, the best-effort sync channel, two-phase handoff and the
//! durable save client with retry.

pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod link;
pub mod models;
pub mod services;
pub mod time_utils;

pub use device::Device;
pub use error::{AppError, Result};
