//! Hall-effect water flow sensor: pulse counting and integration.
//!
//! The sensor outputs one pulse per fixed volume of water (the calibration
//! factor, in pulses per litre).  A GPIO ISR increments an atomic counter
//! on each rising edge; the main loop periodically swaps it back to zero
//! and turns the count into a litres delta and a flow rate.
//!
//! The ISR and the main loop run in different execution contexts, and no
//! lock can be taken inside an interrupt.  The counter is therefore the
//! only shared state, accessed with a `fetch_add` (producer) and a
//! `swap(0)` (consumer): every pulse is counted exactly once.

use core::sync::atomic::{AtomicU32, Ordering};

use log::{info, warn};
use serde::Serialize;

use crate::app::commands::MeterCommand;
use crate::config::calibration_factor_ok;
use crate::error::CommandError;

/// ISR-side pulse counter.
pub struct PulseCounter {
    pulses: AtomicU32,
}

impl PulseCounter {
    pub const fn new() -> Self {
        Self {
            pulses: AtomicU32::new(0),
        }
    }

    /// Count one pulse.  Lock-free, allocation-free: safe from an ISR.
    #[inline]
    pub fn on_pulse(&self) {
        self.pulses.fetch_add(1, Ordering::Relaxed);
    }

    /// Read and clear the count in one atomic step.
    pub fn take(&self) -> u32 {
        self.pulses.swap(0, Ordering::Relaxed)
    }

    /// Pulses counted since the last [`take`](Self::take), without clearing.
    pub fn pending(&self) -> u32 {
        self.pulses.load(Ordering::Relaxed)
    }
}

impl Default for PulseCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Global counter fed by the flow GPIO ISR.
/// `static` because ESP-IDF ISR callbacks cannot capture state.
pub static FLOW_PULSES: PulseCounter = PulseCounter::new();

/// Called from the GPIO ISR on each rising edge.
pub fn flow_isr_handler() {
    FLOW_PULSES.on_pulse();
}

/// Result of one sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlowReading {
    /// Running total (litres) after this window.
    pub total_liters: f64,
    /// Litres per millisecond of the window (`delta_liters / elapsed_ms`).
    pub flow_rate: f64,
    /// Uptime at which the window closed.
    pub timestamp_ms: u32,
    /// Litres measured in this window.
    pub delta_liters: f64,
    /// Raw pulses counted in this window.
    pub pulses: u32,
}

impl FlowReading {
    /// A reading carrying only a total (no flow observed yet).
    pub fn idle(total_liters: f64, timestamp_ms: u32) -> Self {
        Self {
            total_liters,
            flow_rate: 0.0,
            timestamp_ms,
            delta_liters: 0.0,
            pulses: 0,
        }
    }
}

/// What a successfully applied command changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandOutcome {
    /// Total zeroed; the caller must request a persistence commit.
    TotalReset { previous_total: f64 },
    /// Calibration replaced; the caller should persist the new config.
    Calibrated { previous: f64, current: f64 },
}

/// Converts pulse counts into litres and owns the running total.
pub struct PulseAccumulator<'a> {
    counter: &'a PulseCounter,
    /// Pulses per litre.
    calibration_factor: f64,
    total_liters: f64,
}

impl<'a> PulseAccumulator<'a> {
    /// `calibration_factor` must already be validated (positive, finite).
    pub fn new(counter: &'a PulseCounter, calibration_factor: f64) -> Self {
        Self::with_total(counter, calibration_factor, 0.0)
    }

    /// Resume from a persisted total.
    pub fn with_total(counter: &'a PulseCounter, calibration_factor: f64, total_liters: f64) -> Self {
        let total_liters = if total_liters.is_finite() && total_liters >= 0.0 {
            total_liters
        } else {
            warn!("flow: discarding implausible restored total {}", total_liters);
            0.0
        };
        Self {
            counter,
            calibration_factor,
            total_liters,
        }
    }

    /// Count one pulse.  ISR-safe.
    #[inline]
    pub fn on_pulse(&self) {
        self.counter.on_pulse();
    }

    /// Close the current sampling window.
    ///
    /// `elapsed_ms` is the real time since the previous tick; `now_ms`
    /// stamps the reading.  Main-loop context only.
    pub fn tick(&mut self, elapsed_ms: u32, now_ms: u32) -> FlowReading {
        let pulses = self.counter.take();
        let delta_liters = f64::from(pulses) / self.calibration_factor;
        self.total_liters += delta_liters;

        let flow_rate = if elapsed_ms > 0 {
            delta_liters / f64::from(elapsed_ms)
        } else {
            0.0
        };

        FlowReading {
            total_liters: self.total_liters,
            flow_rate,
            timestamp_ms: now_ms,
            delta_liters,
            pulses,
        }
    }

    /// Apply a command.  The accumulator is the only owner of the total and
    /// the calibration factor.
    pub fn apply_command(&mut self, cmd: MeterCommand) -> Result<CommandOutcome, CommandError> {
        match cmd {
            MeterCommand::Reset => {
                let previous_total = self.total_liters;
                // Pulses already counted belong to the window being discarded.
                let dropped = self.counter.take();
                self.total_liters = 0.0;
                info!(
                    "flow: total reset (was {:.3} L, {} pending pulses dropped)",
                    previous_total, dropped
                );
                Ok(CommandOutcome::TotalReset { previous_total })
            }
            MeterCommand::Calibrate(factor) => {
                if !calibration_factor_ok(factor) {
                    warn!("flow: rejected calibration factor {}", factor);
                    return Err(CommandError::InvalidCalibration);
                }
                let previous = self.calibration_factor;
                self.calibration_factor = factor;
                info!("flow: calibration {} -> {} pulses/L", previous, factor);
                Ok(CommandOutcome::Calibrated {
                    previous,
                    current: factor,
                })
            }
        }
    }

    pub fn total_liters(&self) -> f64 {
        self.total_liters
    }

    pub fn calibration_factor(&self) -> f64 {
        self.calibration_factor
    }
}
