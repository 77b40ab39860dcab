//! Inbound commands to the meter.
//!
//! Commands arrive on the `<base>/cmd` MQTT topic.  Two encodings are
//! accepted:
//!
//! - plain text: `reset`, `calibrate:<factor>`
//! - JSON, as published by the dashboard backend:
//!   `{"action":"reset"}`, `{"action":"setCalibration","value":7.5}`
//!
//! Parsing only checks shape.  Whether a calibration factor is acceptable
//! is decided by the accumulator that applies it.

use serde::Deserialize;

use crate::error::CommandError;

/// Commands that external adapters can send into the meter core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeterCommand {
    /// Zero the running total and commit it.
    Reset,
    /// Replace the calibration factor (pulses per litre).
    Calibrate(f64),
}

#[derive(Deserialize)]
struct JsonCommand {
    action: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

impl MeterCommand {
    /// Parse a raw command body.
    pub fn parse(raw: &[u8]) -> Result<Self, CommandError> {
        let text = core::str::from_utf8(raw).map_err(|_| CommandError::UnknownCommand)?;
        let text = text.trim();

        if text.starts_with('{') {
            return Self::parse_json(text);
        }

        if text.eq_ignore_ascii_case("reset") {
            return Ok(Self::Reset);
        }

        match text.split_once(':') {
            Some((verb, arg)) if verb.trim().eq_ignore_ascii_case("calibrate") => {
                parse_factor(arg).map(Self::Calibrate)
            }
            _ => Err(CommandError::UnknownCommand),
        }
    }

    fn parse_json(text: &str) -> Result<Self, CommandError> {
        let cmd: JsonCommand =
            serde_json::from_str(text).map_err(|_| CommandError::UnknownCommand)?;

        match cmd.action.as_str() {
            "reset" => Ok(Self::Reset),
            "setCalibration" | "calibrate" => {
                let factor = match cmd.value {
                    Some(serde_json::Value::Number(n)) => n.as_f64(),
                    Some(serde_json::Value::String(s)) => parse_factor(&s).ok(),
                    _ => None,
                };
                factor
                    .map(Self::Calibrate)
                    .ok_or(CommandError::InvalidCalibration)
            }
            _ => Err(CommandError::UnknownCommand),
        }
    }
}

fn parse_factor(arg: &str) -> Result<f64, CommandError> {
    arg.trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or(CommandError::InvalidCalibration)
}
