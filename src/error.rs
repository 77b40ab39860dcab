//! Error types for the hidrometro firmware.
//!
//! Each component reports its own small `Copy` error so it can travel
//! through events and logs without allocation.  None of these conditions
//! is fatal once the main loop is running: transport errors are retried
//! with backoff, corrupt storage is treated as empty, and rejected
//! commands are logged and dropped.  Boot code lifts them into
//! `anyhow::Error` through their `std::error::Error` impls.

use core::fmt;

use crate::app::ports::{ConfigError, StorageError};
use crate::persistence::PersistError;

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// The network path (WiFi link + MQTT session) is unavailable or refused
/// an operation.  Always retried; never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// WiFi station is not associated / has no IP.
    LinkDown,
    /// MQTT client could not be created or the broker refused the session.
    ConnectFailed,
    /// Operation requires an established session.
    NotConnected,
    /// The client refused to enqueue a publish.
    PublishFailed,
    /// The client refused a subscription request.
    SubscribeFailed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkDown => write!(f, "WiFi link down"),
            Self::ConnectFailed => write!(f, "MQTT connect failed"),
            Self::NotConnected => write!(f, "MQTT not connected"),
            Self::PublishFailed => write!(f, "MQTT publish failed"),
            Self::SubscribeFailed => write!(f, "MQTT subscribe failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Command errors
// ---------------------------------------------------------------------------

/// Rejected inbound command.  Logged and discarded by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Payload is not a recognised command.
    UnknownCommand,
    /// `calibrate` with a missing, non-numeric or out-of-range factor.
    InvalidCalibration,
    /// Inbound command rate exceeded the token bucket.
    RateLimited,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::InvalidCalibration => write!(f, "invalid calibration factor"),
            Self::RateLimited => write!(f, "command rate limited"),
        }
    }
}

impl std::error::Error for TransportError {}
impl std::error::Error for CommandError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}
impl std::error::Error for PersistError {}
