//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ MeterService (domain)
//! ```
//!
//! Driven adapters (storage, network transport, event sinks) implement
//! these traits.  The [`MeterService`](super::service::MeterService) and its
//! components consume them via generics, so the domain core never touches
//! the radio or flash directly and every component can be exercised with a
//! fake on the host.

use crate::config::MeterConfig;
use crate::error::TransportError;

// ───────────────────────────────────────────────────────────────
// Telemetry transport (driven adapter: domain ↔ WiFi + MQTT)
// ───────────────────────────────────────────────────────────────

/// Maximum topic length accepted for inbound messages.
pub const MAX_TOPIC_LEN: usize = 64;
/// Maximum inbound payload length (command bodies are tiny).
pub const MAX_INBOUND_LEN: usize = 128;

/// A message delivered by the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: heapless::String<MAX_TOPIC_LEN>,
    pub body: heapless::Vec<u8, MAX_INBOUND_LEN>,
}

impl InboundMessage {
    /// Build a message.  Returns `None` if either field does not fit: a
    /// cut topic would be misrouted and a cut body could parse as a
    /// different command.
    pub fn new(topic: &str, body: &[u8]) -> Option<Self> {
        let mut t = heapless::String::new();
        t.push_str(topic).ok()?;
        let b = heapless::Vec::from_slice(body).ok()?;
        Some(Self { topic: t, body: b })
    }
}

/// The network path the publisher drives.
///
/// Every method must return promptly: `connect` starts (or restarts) a
/// session and reports whether the attempt could be *started*; whether it
/// succeeded is observed later through `is_connected`.
pub trait TelemetryTransport {
    /// Start a connection attempt.  Never blocks on the handshake.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// `true` while the MQTT session is established.
    fn is_connected(&self) -> bool;

    /// Send `payload` to `topic`.  Best-effort.
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError>;

    /// Subscribe to `topic` on the current session.
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Pop the next inbound message, if any.
    fn poll_inbound(&mut self) -> Option<InboundMessage>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the runtime configuration.
///
/// Implementations MUST validate before persisting.  Invalid values are
/// rejected with [`ConfigError::ValidationFailed`], not silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`MeterConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<MeterConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &MeterConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - A single `write` is atomic per key (ESP-IDF NVS guarantees this per
///   `nvs_commit`).  Torn-write protection across keys is the caller's job;
///   see [`PersistenceStore`](crate::persistence::PersistenceStore).
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
