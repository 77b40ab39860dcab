//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements           | Connects to                  |
//! |-------------|----------------------|------------------------------|
//! | `device_id` |                      | eFuse factory MAC            |
//! | `log_sink`  | EventSink            | Serial log output            |
//! | `mqtt`      | TelemetryTransport   | ESP-IDF MQTT client          |
//! | `nvs`       | ConfigPort           | NVS / in-memory store        |
//! |             | StoragePort          |                              |
//! | `time`      |                      | ESP32 system timer           |
//! | `wifi`      | ConnectivityPort     | ESP-IDF WiFi STA             |

pub mod device_id;
pub mod log_sink;
pub mod mqtt;
pub mod nvs;
pub mod time;
pub(super) mod utils;
pub mod wifi;
