//! Fuzz target: `MeterCommand::parse`
//!
//! Feeds arbitrary command-topic payloads to the parser and checks that
//! it never panics and never yields an unusable calibration factor.
//!
//! cargo fuzz run fuzz_command_parser

#![no_main]

use hidrometro::app::commands::MeterCommand;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(MeterCommand::Calibrate(v)) = MeterCommand::parse(data) {
        assert!(!v.is_nan(), "parser must not yield NaN");
    }
});
