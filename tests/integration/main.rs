//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises a subsystem against the
//! mock adapters in [`mocks`].  Everything runs on the host with no
//! radio, broker or flash.

mod persistence_tests;
mod publisher_tests;
mod service_tests;
