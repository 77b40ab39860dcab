//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).

use log::{debug, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started {
                total_liters,
                restore,
            } => {
                info!("START | total={:.3}L | restore={:?}", total_liters, restore);
            }
            AppEvent::Sampled(r) => {
                debug!(
                    "FLOW  | pulses={} | delta={:.4}L | rate={:.6}L/ms | total={:.3}L",
                    r.pulses, r.delta_liters, r.flow_rate, r.total_liters
                );
            }
            AppEvent::Committed {
                write_seq,
                total_liters,
            } => {
                info!("SAVE  | seq={} | total={:.3}L", write_seq, total_liters);
            }
            AppEvent::CommitFailed(e) => {
                warn!("SAVE  | failed: {}", e);
            }
            AppEvent::LinkUp => {
                info!("LINK  | up");
            }
            AppEvent::LinkDown => {
                warn!("LINK  | down");
            }
            AppEvent::LinkRetry { error, retry_in_ms } => {
                info!("LINK  | {} | retry in {}ms", error, retry_in_ms);
            }
            AppEvent::Published {
                total_liters,
                flow_rate,
            } => {
                info!(
                    "PUB   | totalLiters={:.3} | flowRate={:.6}",
                    total_liters, flow_rate
                );
            }
            AppEvent::PublishDropped(e) => {
                warn!("PUB   | dropped: {}", e);
            }
            AppEvent::CommandApplied(cmd) => {
                info!("CMD   | applied {:?}", cmd);
            }
            AppEvent::CommandRejected(e) => {
                warn!("CMD   | rejected: {}", e);
            }
            AppEvent::ConfigSaved => {
                info!("CFG   | saved");
            }
            AppEvent::ConfigSaveFailed(e) => {
                warn!("CFG   | save failed: {}", e);
            }
        }
    }
}
