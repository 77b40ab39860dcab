//! Telemetry publisher driven through the simulated WiFi + MQTT adapters.

use hidrometro::adapters::mqtt::{MqttAdapter, MqttSettings};
use hidrometro::adapters::wifi::{ConnectivityPort, WifiAdapter};
use hidrometro::app::commands::MeterCommand;
use hidrometro::app::ports::TelemetryTransport;
use hidrometro::config::MeterConfig;
use hidrometro::error::{CommandError, TransportError};
use hidrometro::sensors::flow::FlowReading;
use hidrometro::telemetry::{LinkEvent, LinkState, PublishOutcome, TelemetryPublisher, Topics};

type Publisher = TelemetryPublisher<MqttAdapter<WifiAdapter>>;

fn publisher() -> Publisher {
    let mut wifi = WifiAdapter::new();
    wifi.set_credentials("Wokwi-GUEST", "").unwrap();
    let mqtt = MqttAdapter::new(
        wifi,
        MqttSettings {
            broker_url: "mqtt://broker.hivemq.com:1883".into(),
            client_id: heapless::String::try_from("hidrometro-efcafe").unwrap(),
            keep_alive_secs: 30,
        },
    );
    let mut p = TelemetryPublisher::new(
        mqtt,
        Topics::new("hidrometro/leandro").unwrap(),
        &MeterConfig::default(),
    );
    p.begin(0);
    p
}

fn reading(total: f64) -> FlowReading {
    FlowReading {
        total_liters: total,
        flow_rate: 0.002,
        timestamp_ms: 1_000,
        delta_liters: 2.0,
        pulses: 15,
    }
}

#[test]
fn comes_up_over_wifi_and_subscribes() {
    let mut p = publisher();

    assert_eq!(p.poll_link(0), Some(LinkEvent::Up));
    assert!(p.transport().link().is_connected());
    assert_eq!(
        p.transport().sim_subscriptions(),
        ["hidrometro/leandro/cmd".to_string()]
    );
}

#[test]
fn publishes_camel_case_payload_on_data_topic() {
    let mut p = publisher();
    p.poll_link(0);

    let report = p.tick(5_000, &reading(42.5));
    assert!(matches!(report.publish, PublishOutcome::Sent { .. }));

    let (topic, payload, retain) = &p.transport().sim_published()[0];
    assert_eq!(topic, "hidrometro/leandro/dados");
    assert!(!retain);
    let json: serde_json::Value = serde_json::from_slice(payload).unwrap();
    assert_eq!(json["totalLiters"].as_f64(), Some(42.5));
    assert_eq!(json["flowRate"].as_f64(), Some(0.002));
    assert_eq!(json.as_object().map(|o| o.len()), Some(2));
}

#[test]
fn retain_flag_is_forwarded() {
    let mut p = publisher();
    p.set_retain(true);
    p.poll_link(0);
    p.tick(5_000, &reading(1.0));
    assert!(p.transport().sim_published()[0].2);
}

#[test]
fn wifi_outage_backs_off_then_recovers() {
    let mut p = publisher();
    p.transport_mut().link_mut().sim_set_ap_available(false);

    assert_eq!(
        p.poll_link(0),
        Some(LinkEvent::AttemptFailed {
            error: TransportError::LinkDown,
            retry_in_ms: 1_000,
        })
    );
    let report = p.tick(500, &reading(1.0));
    assert_eq!(report.publish, PublishOutcome::Skipped);
    assert!(report.link.is_none());

    p.transport_mut().link_mut().sim_set_ap_available(true);
    assert_eq!(p.poll_link(999), None);
    assert_eq!(p.poll_link(1_000), Some(LinkEvent::Up));
}

#[test]
fn broker_session_loss_is_detected_and_replaced() {
    let mut p = publisher();
    p.poll_link(0);

    p.transport_mut().sim_drop_session();
    assert_eq!(p.poll_link(100), Some(LinkEvent::Down));
    assert!(matches!(p.state(), LinkState::Disconnected { .. }));

    assert_eq!(p.poll_link(100), Some(LinkEvent::Up));
    assert_eq!(p.transport().sim_subscriptions().len(), 1);
    assert!(p.transport().sim_published().is_empty());
}

#[test]
fn commands_arrive_through_the_session() {
    let mut p = publisher();
    p.poll_link(0);

    assert!(p.transport_mut().sim_deliver("hidrometro/leandro/cmd", b"calibrate:7.2"));
    assert!(p.transport_mut().sim_deliver("hidrometro/leandro/cmd", b"nope"));
    assert!(p.transport_mut().sim_deliver("hidrometro/leandro/dados", b"reset"));
    assert!(
        p.transport_mut()
            .sim_deliver("hidrometro/leandro/cmd", br#"{"action":"setCalibration","value":7.0}"#)
    );

    assert_eq!(p.next_command(), Some(Ok(MeterCommand::Calibrate(7.2))));
    assert_eq!(p.next_command(), Some(Err(CommandError::UnknownCommand)));
    assert_eq!(p.next_command(), Some(Ok(MeterCommand::Calibrate(7.0))));
    assert_eq!(p.next_command(), None);
    assert!(p.transport_mut().poll_inbound().is_none());
}

#[test]
fn oversized_command_body_is_dropped_whole() {
    let mut p = publisher();
    p.poll_link(0);

    // Cut at the inbound limit this would read as a valid calibration.
    let mut body = b"calibrate:7.5".to_vec();
    body.resize(132, b'9');
    assert!(!p.transport_mut().sim_deliver("hidrometro/leandro/cmd", &body));
    assert_eq!(p.next_command(), None);
}
