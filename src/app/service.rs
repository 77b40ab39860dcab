//! Application service: the hexagonal core.
//!
//! [`MeterService`] owns the accumulator, the persistence store with its
//! storage port, the telemetry publisher with its transport, and the live
//! configuration.  One call to [`MeterService::tick`] is one cooperative
//! step of the firmware loop.
//!
//! ```text
//!  PulseCounter ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!   (ISR)           │         MeterService          │
//!  StoragePort ◀──▶ │ Accumulator · Store · Publisher│ ◀─▶ TelemetryTransport
//!  ConfigPort  ◀──  └──────────────────────────────┘
//! ```

use log::{debug, info, warn};

use crate::config::MeterConfig;
use crate::error::CommandError;
use crate::persistence::{LoadOutcome, PersistenceStore};
use crate::scheduler::{Interval, elapsed_ms};
use crate::sensors::flow::{CommandOutcome, FlowReading, PulseAccumulator, PulseCounter};
use crate::telemetry::{LinkEvent, LinkState, PublishOutcome, TelemetryPublisher, Topics};

use super::commands::MeterCommand;
use super::events::{AppEvent, RestoreKind};
use super::ports::{ConfigPort, EventSink, StoragePort, TelemetryTransport};

/// A changed config is written this long after the last change.
pub const CONFIG_SAVE_DEBOUNCE_MS: u32 = 5_000;

/// Commands handled per step.
const MAX_COMMANDS_PER_TICK: usize = 4;

pub struct MeterService<'a, T, S>
where
    T: TelemetryTransport,
    S: StoragePort + ConfigPort,
{
    config: MeterConfig,
    counter: &'a PulseCounter,
    accumulator: PulseAccumulator<'a>,
    store: PersistenceStore,
    storage: S,
    publisher: TelemetryPublisher<T>,
    sample_interval: Interval,
    publish_interval: Interval,
    last_sample_ms: u32,
    last_reading: FlowReading,
    config_dirty_since: Option<u32>,
    started: bool,
}

impl<'a, T, S> MeterService<'a, T, S>
where
    T: TelemetryTransport,
    S: StoragePort + ConfigPort,
{
    /// Wire the components together.  `config` must already be validated.
    ///
    /// Does **not** touch storage or the network; call [`start`](Self::start).
    pub fn new(
        config: MeterConfig,
        counter: &'a PulseCounter,
        transport: T,
        storage: S,
        topics: Topics,
    ) -> Self {
        let accumulator = PulseAccumulator::new(counter, config.calibration_factor);
        let store = PersistenceStore::new(config.history_size, config.save_interval_ms);
        let publisher = TelemetryPublisher::new(transport, topics, &config);
        Self {
            sample_interval: Interval::new(config.update_interval_ms, 0),
            publish_interval: Interval::new(config.publish_interval_ms, 0),
            config,
            counter,
            accumulator,
            store,
            storage,
            publisher,
            last_sample_ms: 0,
            last_reading: FlowReading::idle(0.0, 0),
            config_dirty_since: None,
            started: false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Restore the persisted total and arm every cadence at `now_ms`.
    pub fn start(&mut self, now_ms: u32, sink: &mut impl EventSink) {
        let (total, restore) = match self.store.load(&self.storage) {
            LoadOutcome::Restored(rec) => (rec.total_liters, RestoreKind::Restored),
            LoadOutcome::Empty => (0.0, RestoreKind::Empty),
            LoadOutcome::Corrupt => (0.0, RestoreKind::Corrupt),
        };

        self.accumulator =
            PulseAccumulator::with_total(self.counter, self.config.calibration_factor, total);
        let total = self.accumulator.total_liters();

        self.sample_interval = Interval::new(self.config.update_interval_ms, now_ms);
        self.publish_interval = Interval::new(self.config.publish_interval_ms, now_ms);
        self.last_sample_ms = now_ms;
        self.last_reading = FlowReading::idle(total, now_ms);
        self.publisher.begin(now_ms);
        self.started = true;

        info!("MeterService started: {:.3} L ({:?})", total, restore);
        sink.emit(&AppEvent::Started {
            total_liters: total,
            restore,
        });
    }

    // ── Per-step orchestration ────────────────────────────────

    /// One cooperative step: sample → commit → link → publish → commands
    /// → config auto-save.  Each stage is deadline-gated and returns
    /// promptly.
    pub fn tick(&mut self, now_ms: u32, sink: &mut impl EventSink) {
        if !self.started {
            debug!("MeterService: tick before start ignored");
            return;
        }

        // 1. Close the sampling window.
        if self.sample_interval.poll(now_ms) {
            let elapsed = elapsed_ms(now_ms, self.last_sample_ms);
            self.last_sample_ms = now_ms;
            let reading = self.accumulator.tick(elapsed, now_ms);
            self.last_reading = reading;
            sink.emit(&AppEvent::Sampled(reading));
        }

        // 2. Persist (interval-gated or explicitly requested).
        if let Some(result) =
            self.store
                .maybe_commit(&mut self.storage, self.accumulator.total_liters(), now_ms)
        {
            match result {
                Ok(write_seq) => sink.emit(&AppEvent::Committed {
                    write_seq,
                    total_liters: self.store.record().total_liters,
                }),
                Err(e) => {
                    warn!("MeterService: commit failed: {}", e);
                    sink.emit(&AppEvent::CommitFailed(e));
                }
            }
        }

        // 3. Link maintenance every step.
        if let Some(ev) = self.publisher.poll_link(now_ms) {
            emit_link_event(ev, sink);
        }

        // 4. Publish the latest reading.
        if self.publish_interval.poll(now_ms) {
            let report = self.publisher.tick(now_ms, &self.last_reading);
            if let Some(ev) = report.link {
                emit_link_event(ev, sink);
            }
            match report.publish {
                PublishOutcome::Sent { .. } => sink.emit(&AppEvent::Published {
                    total_liters: self.last_reading.total_liters,
                    flow_rate: self.last_reading.flow_rate,
                }),
                PublishOutcome::Dropped(e) => sink.emit(&AppEvent::PublishDropped(e)),
                PublishOutcome::Skipped | PublishOutcome::EncodeFailed => {}
            }
        }

        // 5. Inbound commands.
        for _ in 0..MAX_COMMANDS_PER_TICK {
            match self.publisher.next_command() {
                Some(Ok(cmd)) => match self.handle_command(cmd, now_ms, sink) {
                    Ok(outcome) => debug!("MeterService: {:?} -> {:?}", cmd, outcome),
                    // Already reported through the sink.
                    Err(e) => debug!("MeterService: {:?} rejected: {}", cmd, e),
                },
                Some(Err(e)) => sink.emit(&AppEvent::CommandRejected(e)),
                None => break,
            }
        }

        // 6. Debounced config persistence.
        self.auto_save_if_needed(now_ms, sink);
    }

    // ── Command handling ──────────────────────────────────────

    /// Apply a command to the accumulator and propagate its side effects.
    pub fn handle_command(
        &mut self,
        cmd: MeterCommand,
        now_ms: u32,
        sink: &mut impl EventSink,
    ) -> Result<CommandOutcome, CommandError> {
        match self.accumulator.apply_command(cmd) {
            Ok(outcome) => {
                match outcome {
                    CommandOutcome::TotalReset { .. } => {
                        self.store.request_commit();
                        self.last_reading = FlowReading::idle(0.0, now_ms);
                    }
                    CommandOutcome::Calibrated { current, .. } => {
                        self.config.calibration_factor = current;
                        self.mark_config_dirty(now_ms);
                    }
                }
                sink.emit(&AppEvent::CommandApplied(cmd));
                Ok(outcome)
            }
            Err(e) => {
                sink.emit(&AppEvent::CommandRejected(e));
                Err(e)
            }
        }
    }

    // ── Config dirty-flag management ──────────────────────────

    /// Mark the config as modified; restarts the save debounce.
    pub fn mark_config_dirty(&mut self, now_ms: u32) {
        self.config_dirty_since = Some(now_ms);
    }

    /// Save the config once it has been stable for
    /// [`CONFIG_SAVE_DEBOUNCE_MS`].  Returns `true` if it was saved.
    pub fn auto_save_if_needed(&mut self, now_ms: u32, sink: &mut impl EventSink) -> bool {
        let Some(since) = self.config_dirty_since else {
            return false;
        };
        if elapsed_ms(now_ms, since) < CONFIG_SAVE_DEBOUNCE_MS {
            return false;
        }
        match self.storage.save(&self.config) {
            Ok(()) => {
                self.config_dirty_since = None;
                info!("Config auto-saved to NVS");
                sink.emit(&AppEvent::ConfigSaved);
                true
            }
            Err(e) => {
                warn!("Config auto-save failed: {}", e);
                self.config_dirty_since = Some(now_ms);
                sink.emit(&AppEvent::ConfigSaveFailed(e));
                false
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn total_liters(&self) -> f64 {
        self.accumulator.total_liters()
    }

    pub fn calibration_factor(&self) -> f64 {
        self.accumulator.calibration_factor()
    }

    /// Most recent reading (what the next publish will send).
    pub fn last_reading(&self) -> &FlowReading {
        &self.last_reading
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty_since.is_some()
    }

    pub fn link_state(&self) -> LinkState {
        self.publisher.state()
    }

    pub fn store(&self) -> &PersistenceStore {
        &self.store
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn transport(&self) -> &T {
        self.publisher.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.publisher.transport_mut()
    }
}

fn emit_link_event(ev: LinkEvent, sink: &mut impl EventSink) {
    match ev {
        LinkEvent::Up => sink.emit(&AppEvent::LinkUp),
        LinkEvent::Down => sink.emit(&AppEvent::LinkDown),
        LinkEvent::AttemptFailed { error, retry_in_ms } => {
            sink.emit(&AppEvent::LinkRetry { error, retry_in_ms });
        }
    }
}
