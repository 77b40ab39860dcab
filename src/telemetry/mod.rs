//! Telemetry over MQTT.
//!
//! | Module      | Contents                                        |
//! |-------------|-------------------------------------------------|
//! | `link`      | link state machine, reconnect backoff           |
//! | `payload`   | JSON wire payload for the data topic            |
//! | `publisher` | `TelemetryPublisher` over a `TelemetryTransport`|

pub mod link;
pub mod payload;
pub mod publisher;

use core::fmt::Write;

use crate::app::ports::{ConfigError, MAX_TOPIC_LEN};

pub use link::{Backoff, LinkEvent, LinkState};
pub use payload::TelemetryMessage;
pub use publisher::{PublishOutcome, TelemetryPublisher, TickReport};

/// Suffix of the telemetry topic.
pub const PUBLISH_SUFFIX: &str = "dados";
/// Suffix of the command topic.
pub const COMMAND_SUFFIX: &str = "cmd";

/// The two topics derived from the base topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub publish: heapless::String<MAX_TOPIC_LEN>,
    pub command: heapless::String<MAX_TOPIC_LEN>,
}

impl Topics {
    /// `<base>/dados` and `<base>/cmd`.  The base must be non-empty, free
    /// of MQTT wildcards, and short enough for both topics to fit.
    pub fn new(base: &str) -> Result<Self, ConfigError> {
        let base = base.trim_end_matches('/');
        if base.is_empty() {
            return Err(ConfigError::ValidationFailed("base topic is empty"));
        }
        if base.contains(['+', '#']) {
            return Err(ConfigError::ValidationFailed(
                "base topic must not contain wildcards",
            ));
        }

        let mut publish = heapless::String::new();
        let mut command = heapless::String::new();
        write!(publish, "{}/{}", base, PUBLISH_SUFFIX)
            .map_err(|_| ConfigError::ValidationFailed("base topic too long"))?;
        write!(command, "{}/{}", base, COMMAND_SUFFIX)
            .map_err(|_| ConfigError::ValidationFailed("base topic too long"))?;
        Ok(Self { publish, command })
    }
}
