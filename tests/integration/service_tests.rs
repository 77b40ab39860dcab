//! Integration tests for the MeterService pipeline:
//! pulses → accumulator → persistence → publisher, plus inbound commands.

use hidrometro::app::commands::MeterCommand;
use hidrometro::app::events::{AppEvent, RestoreKind};
use hidrometro::app::ports::{ConfigError, StorageError};
use hidrometro::app::service::{CONFIG_SAVE_DEBOUNCE_MS, MeterService};
use hidrometro::config::MeterConfig;
use hidrometro::error::{CommandError, TransportError};
use hidrometro::persistence::PersistError;
use hidrometro::sensors::flow::PulseCounter;
use hidrometro::telemetry::{LinkState, Topics};

use crate::mocks::{MockBroker, MockNvs, RecordingSink};

const BASE: &str = "hidrometro/test";
const CMD_TOPIC: &str = "hidrometro/test/cmd";
const DATA_TOPIC: &str = "hidrometro/test/dados";

type Service<'a> = MeterService<'a, MockBroker, MockNvs>;

fn service<'a>(counter: &'a PulseCounter, broker: MockBroker, nvs: MockNvs) -> Service<'a> {
    let topics = Topics::new(BASE).unwrap();
    MeterService::new(MeterConfig::default(), counter, broker, nvs, topics)
}

fn pulses(counter: &PulseCounter, n: u32) {
    for _ in 0..n {
        counter.on_pulse();
    }
}

/// Tick every `step` ms over `from..=to`.
fn run(svc: &mut Service<'_>, sink: &mut RecordingSink, from: u32, to: u32, step: u32) {
    let mut t = from;
    while t <= to {
        svc.tick(t, sink);
        t += step;
    }
}

// ── Startup ───────────────────────────────────────────────────

#[test]
fn first_boot_starts_from_zero() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();

    svc.start(0, &mut sink);

    assert_eq!(svc.total_liters(), 0.0);
    assert_eq!(
        sink.events.first(),
        Some(&AppEvent::Started {
            total_liters: 0.0,
            restore: RestoreKind::Empty,
        })
    );
}

#[test]
fn tick_before_start_does_nothing() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();

    pulses(&counter, 75);
    svc.tick(5_000, &mut sink);

    assert!(sink.events.is_empty());
    assert_eq!(svc.transport().connect_calls, 0);
    assert_eq!(counter.pending(), 75);
}

#[test]
fn first_tick_brings_the_link_up_and_subscribes() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();

    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    assert!(sink.contains(&AppEvent::LinkUp));
    assert_eq!(svc.link_state(), LinkState::Connected);
    assert_eq!(svc.transport().subscriptions, vec![CMD_TOPIC.to_string()]);
}

// ── Sampling and publishing ───────────────────────────────────

#[test]
fn pulses_become_litres_and_are_published_as_json() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    pulses(&counter, 750);
    svc.tick(1_000, &mut sink);
    let r = *svc.last_reading();
    assert_eq!(r.total_liters, 100.0);
    assert_eq!(r.flow_rate, 0.1);
    assert!(svc.transport().published.is_empty(), "publish waits for its own cadence");

    run(&mut svc, &mut sink, 2_000, 4_000, 1_000);
    pulses(&counter, 75);
    svc.tick(5_000, &mut sink);

    let published = &svc.transport().published;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, DATA_TOPIC);
    assert!(!published[0].retain);

    let json = svc.transport().last_json().unwrap();
    assert_eq!(json["totalLiters"].as_f64(), Some(110.0));
    assert_eq!(json["flowRate"].as_f64(), Some(0.01));
    assert!(sink.contains(&AppEvent::Published {
        total_liters: 110.0,
        flow_rate: 0.01,
    }));
}

#[test]
fn publishes_once_per_publish_interval() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);

    run(&mut svc, &mut sink, 0, 20_000, 100);

    assert_eq!(svc.transport().published.len(), 4);
}

#[test]
fn rejected_publish_is_dropped_and_link_stays_up() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    svc.transport_mut().reject_publish = true;
    run(&mut svc, &mut sink, 1_000, 5_000, 1_000);

    assert!(sink.contains(&AppEvent::PublishDropped(TransportError::PublishFailed)));
    assert_eq!(svc.link_state(), LinkState::Connected);

    svc.transport_mut().reject_publish = false;
    run(&mut svc, &mut sink, 6_000, 10_000, 1_000);
    assert_eq!(svc.transport().published.len(), 1, "dropped readings are not replayed");
}

// ── Broker unavailable ────────────────────────────────────────

#[test]
fn unreachable_broker_is_retried_with_backoff() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::unreachable(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);

    run(&mut svc, &mut sink, 0, 20_000, 100);

    // Attempts at 0, 1000, 3000, 7000, 15000.
    assert_eq!(svc.transport().connect_calls, 5);
    let delays: Vec<u32> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::LinkRetry { retry_in_ms, .. } => Some(*retry_in_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
    assert!(svc.transport().published.is_empty());
    assert_eq!(sink.count(|e| matches!(e, AppEvent::Published { .. })), 0);

    // The broker comes back, but the next attempt waits for its deadline.
    svc.transport_mut().reachable = true;
    run(&mut svc, &mut sink, 20_100, 30_900, 100);
    assert!(!sink.contains(&AppEvent::LinkUp));

    svc.tick(31_000, &mut sink);
    assert!(sink.contains(&AppEvent::LinkUp));
}

#[test]
fn metering_continues_while_offline() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::unreachable(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);

    pulses(&counter, 15);
    run(&mut svc, &mut sink, 0, 1_000, 500);

    assert_eq!(svc.total_liters(), 2.0);
}

#[test]
fn lost_session_reconnects_and_resubscribes() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    svc.transport_mut().drop_session();
    svc.tick(100, &mut sink);
    assert!(sink.contains(&AppEvent::LinkDown));

    svc.tick(200, &mut sink);
    assert_eq!(svc.link_state(), LinkState::Connected);
    assert_eq!(svc.transport().subscriptions.len(), 2);
}

// ── Persistence ───────────────────────────────────────────────

#[test]
fn total_survives_a_restart() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    pulses(&counter, 150);
    run(&mut svc, &mut sink, 1_000, 60_000, 1_000);
    assert!(sink.contains(&AppEvent::Committed {
        write_seq: 1,
        total_liters: 20.0,
    }));

    let nvs = svc.storage().clone();
    let counter2 = PulseCounter::new();
    let mut rebooted = service(&counter2, MockBroker::new(), nvs);
    let mut sink2 = RecordingSink::new();
    rebooted.start(0, &mut sink2);

    assert_eq!(rebooted.total_liters(), 20.0);
    assert_eq!(
        sink2.events[0],
        AppEvent::Started {
            total_liters: 20.0,
            restore: RestoreKind::Restored,
        }
    );
    assert_eq!(rebooted.store().record().write_seq, 1);
}

#[test]
fn commits_wait_for_the_save_interval() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);

    pulses(&counter, 75);
    run(&mut svc, &mut sink, 0, 59_000, 1_000);
    assert_eq!(svc.storage().writes, 0);

    svc.tick(60_000, &mut sink);
    assert_eq!(svc.storage().writes, 1);
}

#[test]
fn failed_commit_is_reported_and_total_is_kept() {
    let counter = PulseCounter::new();
    let mut nvs = MockNvs::new();
    nvs.fail_writes = true;
    let mut svc = service(&counter, MockBroker::new(), nvs);
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);

    pulses(&counter, 75);
    run(&mut svc, &mut sink, 0, 60_000, 1_000);

    assert!(sink.contains(&AppEvent::CommitFailed(PersistError::Storage(
        StorageError::IoError
    ))));
    assert_eq!(svc.total_liters(), 10.0);
    assert_eq!(svc.store().record().write_seq, 0);
}

// ── Commands ──────────────────────────────────────────────────

#[test]
fn reset_command_zeroes_total_and_commits_next_step() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    pulses(&counter, 75);
    svc.tick(1_000, &mut sink);
    assert_eq!(svc.total_liters(), 10.0);

    svc.transport_mut().deliver(CMD_TOPIC, "reset");
    svc.tick(1_100, &mut sink);
    assert!(sink.contains(&AppEvent::CommandApplied(MeterCommand::Reset)));
    assert_eq!(svc.total_liters(), 0.0);
    assert_eq!(svc.last_reading().total_liters, 0.0);
    assert!(svc.store().commit_requested());

    svc.tick(1_200, &mut sink);
    assert!(sink.contains(&AppEvent::Committed {
        write_seq: 1,
        total_liters: 0.0,
    }));
}

#[test]
fn reset_flood_does_not_hammer_flash() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    let mut t = 125;
    while t <= 10_000 {
        svc.handle_command(MeterCommand::Reset, t, &mut sink).unwrap();
        if t % 1_000 == 0 {
            pulses(&counter, 75);
        }
        svc.tick(t, &mut sink);
        t += 125;
    }

    assert_eq!(
        sink.count(|e| matches!(e, AppEvent::CommandApplied(MeterCommand::Reset))),
        80
    );
    // One immediate commit, then at most one per spacing window.
    assert!(svc.storage().writes <= 3, "writes = {}", svc.storage().writes);
    assert!(svc.storage().writes >= 1);
}

#[test]
fn idle_reset_flood_writes_once() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    let mut t = 125;
    while t <= 20_000 {
        svc.handle_command(MeterCommand::Reset, t, &mut sink).unwrap();
        svc.tick(t, &mut sink);
        t += 125;
    }
    assert_eq!(svc.storage().writes, 1);
}

#[test]
fn json_reset_from_backend_is_accepted() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    svc.transport_mut().deliver(CMD_TOPIC, r#"{"action":"reset"}"#);
    svc.tick(100, &mut sink);

    assert!(sink.contains(&AppEvent::CommandApplied(MeterCommand::Reset)));
}

#[test]
fn calibrate_changes_factor_and_saves_config_after_debounce() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    svc.transport_mut().deliver(CMD_TOPIC, "calibrate:5");
    svc.tick(2_000, &mut sink);

    assert_eq!(svc.calibration_factor(), 5.0);
    assert_eq!(svc.config().calibration_factor, 5.0);
    assert!(svc.is_config_dirty());
    assert!(sink.contains(&AppEvent::CommandApplied(MeterCommand::Calibrate(5.0))));

    svc.tick(2_000 + CONFIG_SAVE_DEBOUNCE_MS - 1, &mut sink);
    assert!(svc.storage().saved_config().is_none());

    svc.tick(2_000 + CONFIG_SAVE_DEBOUNCE_MS, &mut sink);
    assert!(sink.contains(&AppEvent::ConfigSaved));
    assert!(!svc.is_config_dirty());
    assert_eq!(
        svc.storage().saved_config().map(|c| c.calibration_factor),
        Some(5.0)
    );

    // New factor applies to pulses from now on.
    pulses(&counter, 10);
    svc.tick(8_000, &mut sink);
    assert_eq!(svc.total_liters(), 2.0);
}

#[test]
fn repeated_calibration_restarts_the_debounce() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);

    svc.handle_command(MeterCommand::Calibrate(6.0), 1_000, &mut sink).unwrap();
    svc.handle_command(MeterCommand::Calibrate(6.5), 4_000, &mut sink).unwrap();

    svc.tick(6_000, &mut sink);
    assert_eq!(svc.storage().config_saves.get(), 0);
    svc.tick(9_000, &mut sink);
    assert_eq!(svc.storage().config_saves.get(), 1);
    assert_eq!(
        svc.storage().saved_config().map(|c| c.calibration_factor),
        Some(6.5)
    );
}

#[test]
fn failed_config_save_stays_dirty_and_retries() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);

    svc.storage().fail_config_save.set(true);
    svc.handle_command(MeterCommand::Calibrate(8.0), 0, &mut sink).unwrap();
    assert!(!svc.auto_save_if_needed(5_000, &mut sink));
    assert!(sink.contains(&AppEvent::ConfigSaveFailed(ConfigError::IoError)));
    assert!(svc.is_config_dirty());

    svc.storage().fail_config_save.set(false);
    assert!(!svc.auto_save_if_needed(9_999, &mut sink));
    assert!(svc.auto_save_if_needed(10_000, &mut sink));
}

#[test]
fn invalid_calibration_is_rejected_and_factor_kept() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    for body in ["calibrate:0", "calibrate:-3", "calibrate:abc"] {
        svc.transport_mut().deliver(CMD_TOPIC, body);
    }
    svc.tick(100, &mut sink);

    assert_eq!(
        sink.count(|e| *e == AppEvent::CommandRejected(CommandError::InvalidCalibration)),
        3
    );
    assert_eq!(svc.calibration_factor(), 7.5);
    assert!(!svc.is_config_dirty());
}

#[test]
fn unknown_command_is_logged_and_ignored() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    pulses(&counter, 75);
    svc.tick(1_000, &mut sink);
    svc.transport_mut().deliver(CMD_TOPIC, "explode");
    svc.tick(1_100, &mut sink);

    assert!(sink.contains(&AppEvent::CommandRejected(CommandError::UnknownCommand)));
    assert_eq!(svc.total_liters(), 10.0);
}

#[test]
fn oversized_calibrate_body_leaves_factor_alone() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    let body = format!("calibrate:7.5{}", "9".repeat(119));
    assert_eq!(body.len(), 132);
    svc.transport_mut().deliver(CMD_TOPIC, &body);
    svc.tick(100, &mut sink);

    assert_eq!(svc.calibration_factor(), 7.5);
    assert_eq!(
        sink.count(|e| matches!(
            e,
            AppEvent::CommandApplied(_) | AppEvent::CommandRejected(_)
        )),
        0
    );
}

#[test]
fn messages_on_other_topics_are_not_commands() {
    let counter = PulseCounter::new();
    let mut svc = service(&counter, MockBroker::new(), MockNvs::new());
    let mut sink = RecordingSink::new();
    svc.start(0, &mut sink);
    svc.tick(0, &mut sink);

    pulses(&counter, 75);
    svc.tick(1_000, &mut sink);
    svc.transport_mut().deliver(DATA_TOPIC, "reset");
    svc.tick(1_100, &mut sink);

    assert_eq!(
        sink.count(|e| matches!(
            e,
            AppEvent::CommandApplied(_) | AppEvent::CommandRejected(_)
        )),
        0
    );
    assert_eq!(svc.total_liters(), 10.0);
}
