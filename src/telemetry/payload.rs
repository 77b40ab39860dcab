//! Wire payload for the `<base>/dados` topic.
//!
//! ```json
//! {"totalLiters":100.0,"flowRate":0.1}
//! ```
//!
//! ASCII JSON, no trailing newline.  Field names are the ones the
//! dashboard backend subscribes to.

use serde::Serialize;

use crate::sensors::flow::FlowReading;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireReading {
    total_liters: f64,
    flow_rate: f64,
}

/// One outbound publish.  Built per publish tick, discarded after the send
/// attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage<'t> {
    topic: &'t str,
    payload: Vec<u8>,
    retain: bool,
}

impl<'t> TelemetryMessage<'t> {
    /// Serialise `reading` for `topic`.
    pub fn from_reading(
        topic: &'t str,
        reading: &FlowReading,
        retain: bool,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(&WireReading {
            total_liters: reading.total_liters,
            flow_rate: reading.flow_rate,
        })?;
        Ok(Self {
            topic,
            payload,
            retain,
        })
    }

    pub fn topic(&self) -> &str {
        self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn retain(&self) -> bool {
        self.retain
    }
}
