//! Hidrometro firmware library.
//!
//! Exposes the metering core for integration testing. All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; host builds get simulation adapters instead.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;
pub mod persistence;
pub mod pins;
pub mod scheduler;
pub mod sensors;
pub mod telemetry;

pub mod adapters;
pub mod drivers;
