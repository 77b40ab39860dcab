//! GPIO assignments for the hidrometro board.
//!
//! Every driver references this module rather than hard-coding pin
//! numbers.

/// Hall-effect flow sensor pulse output, counted on the rising edge.
pub const FLOW_SENSOR_GPIO: i32 = 2;
