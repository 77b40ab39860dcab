//! Application core: pure domain logic, zero direct I/O.
//!
//! This module holds the metering loop: the [`MeterService`] that drives
//! the accumulator, persistence and telemetry, plus the command and event
//! vocabulary.  All interaction with flash and the network happens through
//! **port traits** defined in [`ports`], keeping this layer testable
//! without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;

pub use service::MeterService;
