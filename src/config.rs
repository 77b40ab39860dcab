//! System configuration parameters
//!
//! Two layers:
//!
//! - [`MeterConfig`]: runtime tunables (calibration, cadences, history,
//!   backoff).  Persisted in NVS through the
//!   [`ConfigPort`](crate::app::ports::ConfigPort); a `calibrate` command
//!   updates it at runtime.
//! - [`NetworkConfig`]: credentials and broker address, baked in at
//!   compile time from `HIDROMETRO_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

/// Pulses per litre of the YF-S201 style sensor (`f = 7.5 × Q`).
pub const DEFAULT_CALIBRATION_FACTOR: f64 = 7.5;

/// Accepted calibration range (pulses per litre).  Outside it a single
/// pulse maps to a non-finite or meaningless volume.
pub const MIN_CALIBRATION_FACTOR: f64 = 0.01;
pub const MAX_CALIBRATION_FACTOR: f64 = 100_000.0;

/// `true` if `factor` is a usable pulses-per-litre value.
pub fn calibration_factor_ok(factor: f64) -> bool {
    (MIN_CALIBRATION_FACTOR..=MAX_CALIBRATION_FACTOR).contains(&factor)
}

/// Size of the persisted block (bytes).  The encoded accumulator record
/// must never exceed it.
pub const STORE_BLOCK_SIZE: usize = 512;

/// Upper bound for the history ring, chosen so a full record fits in
/// [`STORE_BLOCK_SIZE`].
pub const MAX_HISTORY: usize = 48;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterConfig {
    // --- Sensor ---
    /// Sensor pulses per litre.
    pub calibration_factor: f64,

    // --- Timing ---
    /// Pulse sampling period (milliseconds)
    pub update_interval_ms: u32,
    /// Telemetry publish period (milliseconds)
    pub publish_interval_ms: u32,
    /// Minimum spacing between flash commits (milliseconds)
    pub save_interval_ms: u32,

    // --- Persistence ---
    /// Entries in the rolling consumption history (1..=MAX_HISTORY)
    pub history_size: u16,

    // --- Network ---
    /// First reconnect delay after a failed attempt (milliseconds)
    pub reconnect_initial_ms: u32,
    /// Reconnect backoff cap (milliseconds)
    pub reconnect_max_ms: u32,
    /// Publish telemetry with the MQTT retain flag
    pub retain: bool,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            calibration_factor: DEFAULT_CALIBRATION_FACTOR,

            update_interval_ms: 1_000, // 1 Hz
            publish_interval_ms: 5_000,
            save_interval_ms: 60_000, // 1/min

            history_size: 24,

            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 30_000,
            retain: false,
        }
    }
}

impl MeterConfig {
    /// Range-check every field.  Rejects, never clamps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !calibration_factor_ok(self.calibration_factor) {
            return Err(ConfigError::ValidationFailed(
                "calibration_factor must be 0.01..=100000",
            ));
        }
        if !(100..=60_000).contains(&self.update_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "update_interval_ms must be 100..=60000",
            ));
        }
        if self.publish_interval_ms < self.update_interval_ms || self.publish_interval_ms > 3_600_000
        {
            return Err(ConfigError::ValidationFailed(
                "publish_interval_ms must be between update_interval_ms and 3600000",
            ));
        }
        if !(10_000..=86_400_000).contains(&self.save_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "save_interval_ms must be 10000..=86400000",
            ));
        }
        if self.history_size == 0 || self.history_size as usize > MAX_HISTORY {
            return Err(ConfigError::ValidationFailed("history_size must be 1..=48"));
        }
        if self.reconnect_initial_ms == 0 || self.reconnect_initial_ms > self.reconnect_max_ms {
            return Err(ConfigError::ValidationFailed(
                "reconnect_initial_ms must be between 1 and reconnect_max_ms",
            ));
        }
        if self.reconnect_max_ms > 600_000 {
            return Err(ConfigError::ValidationFailed(
                "reconnect_max_ms must be at most 600000",
            ));
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Network (compile-time)
// ───────────────────────────────────────────────────────────────

/// Credentials and broker address.
#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    pub wifi_ssid: &'static str,
    pub wifi_password: &'static str,
    pub broker_host: &'static str,
    pub broker_port: u16,
    pub base_topic: &'static str,
}

impl NetworkConfig {
    /// Values from the build environment, falling back to the public
    /// simulator network and broker.
    pub fn from_build_env() -> Self {
        Self {
            wifi_ssid: option_env!("HIDROMETRO_WIFI_SSID").unwrap_or("Wokwi-GUEST"),
            wifi_password: option_env!("HIDROMETRO_WIFI_PASSWORD").unwrap_or(""),
            broker_host: option_env!("HIDROMETRO_MQTT_HOST").unwrap_or("broker.hivemq.com"),
            broker_port: parse_port(option_env!("HIDROMETRO_MQTT_PORT")).unwrap_or(1883),
            base_topic: option_env!("HIDROMETRO_BASE_TOPIC").unwrap_or("hidrometro/leandro"),
        }
    }

    /// `mqtt://host:port`
    pub fn broker_url(&self) -> String {
        format!("mqtt://{}:{}", self.broker_host, self.broker_port)
    }
}

fn parse_port(raw: Option<&str>) -> Option<u16> {
    raw.and_then(|s| s.trim().parse::<u16>().ok()).filter(|p| *p != 0)
}
