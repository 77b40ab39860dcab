//! Sensor subsystem.
//!
//! Only the flow meter exists on this board; its ISR-facing counter and
//! the main-loop accumulator live in [`flow`].

pub mod flow;
