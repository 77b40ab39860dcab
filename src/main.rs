//! Hidrometro firmware entry point.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Adapters (outer ring)                     │
//! │                                                             │
//! │  NvsAdapter       WifiAdapter ─▶ MqttAdapter  LogEventSink  │
//! │  (Config+Storage) (Connectivity) (Transport)  (EventSink)   │
//! │                                                             │
//! │  ─────────────── Port Trait Boundary ───────────────────    │
//! │                                                             │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │           MeterService (pure logic)                   │  │
//! │  │  Accumulator · PersistenceStore · TelemetryPublisher  │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │                                                             │
//! │  GPIO ISR ─▶ FLOW_PULSES          Esp32TimeAdapter          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::time::Duration;

use anyhow::Result;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::wifi::EspWifi;
use log::{error, info, warn};

use hidrometro::adapters::device_id;
use hidrometro::adapters::log_sink::LogEventSink;
use hidrometro::adapters::mqtt::{MqttAdapter, MqttSettings};
use hidrometro::adapters::nvs::NvsAdapter;
use hidrometro::adapters::time::Esp32TimeAdapter;
use hidrometro::adapters::wifi::{ConnectivityPort, WifiAdapter};
use hidrometro::app::MeterService;
use hidrometro::app::ports::ConfigPort;
use hidrometro::config::{MeterConfig, NetworkConfig};
use hidrometro::drivers::{hw_init, watchdog::Watchdog};
use hidrometro::sensors::flow::FLOW_PULSES;
use hidrometro::telemetry::Topics;

/// Idle time between loop iterations.  Short enough that every
/// cadence is hit within a few milliseconds of its deadline.
const LOOP_SLEEP: Duration = Duration::from_millis(10);

const MQTT_KEEP_ALIVE_SECS: u16 = 30;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("hidrometro v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Flow sensor input + ISR ────────────────────────────
    hw_init::init_peripherals()?;
    hw_init::init_isr_service()?;
    let watchdog = Watchdog::default();

    // ── 3. Storage + config ───────────────────────────────────
    let nvs = NvsAdapter::new()?;
    let config = match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS");
            cfg
        }
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            MeterConfig::default()
        }
    };
    let network = NetworkConfig::from_build_env();

    // ── 4. Network adapters ───────────────────────────────────
    let mac = device_id::read_mac();
    info!("Device ID: {}", device_id::device_id(&mac));

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let esp_wifi = EspWifi::new(peripherals.modem, sysloop, None)?;

    let mut wifi = WifiAdapter::new(esp_wifi);
    if let Err(e) = wifi.set_credentials(network.wifi_ssid, network.wifi_password) {
        error!("WiFi credentials rejected: {}", e);
    }

    let mqtt = MqttAdapter::new(
        wifi,
        MqttSettings {
            broker_url: network.broker_url(),
            client_id: device_id::client_id(&mac),
            keep_alive_secs: MQTT_KEEP_ALIVE_SECS,
        },
    );
    let topics = Topics::new(network.base_topic)?;
    info!(
        "Broker {} | publish '{}' | commands '{}'",
        network.broker_url(),
        topics.publish,
        topics.command
    );

    // ── 5. Service ────────────────────────────────────────────
    let clock = Esp32TimeAdapter::new();
    let mut sink = LogEventSink::new();
    let mut service = MeterService::new(config, &FLOW_PULSES, mqtt, nvs, topics);
    service.start(clock.uptime_ms(), &mut sink);

    info!("System ready. Entering metering loop.");

    // ── 6. Metering loop ──────────────────────────────────────
    loop {
        service.tick(clock.uptime_ms(), &mut sink);
        watchdog.feed();
        std::thread::sleep(LOOP_SLEEP);
    }
}
