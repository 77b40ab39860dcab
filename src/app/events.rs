//! Outbound application events.
//!
//! The [`MeterService`](super::service::MeterService) emits these through
//! the [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them (the firmware logs them to serial).

use crate::app::commands::MeterCommand;
use crate::app::ports::ConfigError;
use crate::error::{CommandError, TransportError};
use crate::persistence::PersistError;
use crate::sensors::flow::FlowReading;

/// How the running total was obtained at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreKind {
    /// A valid persisted record was found.
    Restored,
    /// Nothing was stored (first boot).
    Empty,
    /// Stored data failed validation; started from zero.
    Corrupt,
}

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The service started; carries the restored total.
    Started {
        total_liters: f64,
        restore: RestoreKind,
    },

    /// A sampling window closed.
    Sampled(FlowReading),

    /// The accumulator record was written to flash.
    Committed { write_seq: u32, total_liters: f64 },

    /// A commit attempt failed; retried at the next save interval.
    CommitFailed(PersistError),

    /// MQTT session established.
    LinkUp,

    /// MQTT session lost.
    LinkDown,

    /// A connection attempt failed.
    LinkRetry {
        error: TransportError,
        retry_in_ms: u32,
    },

    /// A reading was handed to the transport.
    Published { total_liters: f64, flow_rate: f64 },

    /// A reading could not be sent and was dropped.
    PublishDropped(TransportError),

    /// An inbound command was applied.
    CommandApplied(MeterCommand),

    /// An inbound command was rejected.
    CommandRejected(CommandError),

    /// Runtime configuration persisted.
    ConfigSaved,

    /// Runtime configuration could not be persisted; retried later.
    ConfigSaveFailed(ConfigError),
}
