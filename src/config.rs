// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Device configuration loaded from environment variables.

use crate::models::DeviceKind;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Horizontal accuracy (meters) below which a handheld GPS fix counts as good.
pub const DEFAULT_GPS_ACCURACY_THRESHOLD_M: f64 = 20.0;

/// Body weight used for calorie estimates when none is configured.
pub const DEFAULT_BODY_WEIGHT_KG: f64 = 70.0;

/// Configuration for one device, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which device this process runs on
    pub device: DeviceKind,
    /// User identity attached to saved workouts
    pub user_id: String,
    /// Base URL of the remote workout store
    pub remote_base_url: String,
    /// Optional bearer token for the remote store
    pub remote_api_token: Option<String>,
    /// Directory holding the durable pending-save slots
    pub store_dir: PathBuf,
    /// Interval between metric sync pushes
    pub sync_interval: Duration,
    /// How long a handoff waits for the peer's reply
    pub handoff_timeout: Duration,
    /// Base delay for save retries (doubled per attempt)
    pub save_base_delay: Duration,
    /// Total save attempts before giving up until the next explicit retry
    pub save_max_attempts: u32,
    /// GPS accuracy threshold for handheld primacy (meters)
    pub gps_accuracy_threshold_m: f64,
    /// Body weight used by the MET calorie estimate (kg)
    pub body_weight_kg: f64,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            device: DeviceKind::Handheld,
            user_id: "test-user".to_string(),
            remote_base_url: "http://localhost:8080".to_string(),
            remote_api_token: None,
            store_dir: PathBuf::from("./pending"),
            sync_interval: Duration::from_millis(1000),
            handoff_timeout: Duration::from_secs(5),
            save_base_delay: Duration::from_secs(2),
            save_max_attempts: 5,
            gps_accuracy_threshold_m: DEFAULT_GPS_ACCURACY_THRESHOLD_M,
            body_weight_kg: DEFAULT_BODY_WEIGHT_KG,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let device = match env::var("DEVICE_KIND") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid("DEVICE_KIND", value))?,
            Err(_) => DeviceKind::Handheld,
        };

        Ok(Self {
            device,
            user_id: env::var("USER_ID").map_err(|_| ConfigError::Missing("USER_ID"))?,
            remote_base_url: env::var("REMOTE_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .map_err(|_| ConfigError::Missing("REMOTE_BASE_URL"))?,
            remote_api_token: env::var("REMOTE_API_TOKEN")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            store_dir: env::var("STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./pending")),
            sync_interval: Duration::from_millis(parse_or("SYNC_INTERVAL_MS", 1000)?),
            handoff_timeout: Duration::from_millis(parse_or("HANDOFF_TIMEOUT_MS", 5000)?),
            save_base_delay: Duration::from_millis(parse_or("SAVE_BASE_DELAY_MS", 2000)?),
            save_max_attempts: parse_or("SAVE_MAX_ATTEMPTS", 5)?,
            gps_accuracy_threshold_m: parse_or(
                "GPS_ACCURACY_THRESHOLD_M",
                DEFAULT_GPS_ACCURACY_THRESHOLD_M,
            )?,
            body_weight_kg: parse_or("BODY_WEIGHT_KG", DEFAULT_BODY_WEIGHT_KG)?,
        })
    }
}

/// Parse an optional numeric variable, rejecting values that are set but malformed.
fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, value)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("USER_ID", "athlete-42");
        env::set_var("REMOTE_BASE_URL", "https://api.example.com/");
        env::set_var("DEVICE_KIND", "wearable");
        env::set_var("SAVE_MAX_ATTEMPTS", "3");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.user_id, "athlete-42");
        assert_eq!(config.remote_base_url, "https://api.example.com");
        assert_eq!(config.device, DeviceKind::Wearable);
        assert_eq!(config.save_max_attempts, 3);
        assert_eq!(config.sync_interval, Duration::from_millis(1000));
    }
}
