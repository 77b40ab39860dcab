//! Telemetry publisher: link maintenance, publishing and inbound commands.
//!
//! The publisher owns its [`TelemetryTransport`], injected at construction.
//! Nothing here blocks: reconnecting is a state-machine step gated by the
//! backoff deadline (see [`link`](super::link)), publishing is best-effort,
//! and a reading that cannot be sent is dropped, never queued.

use burster::Limiter;
use core::time::Duration;
use log::{debug, info, warn};

use crate::app::commands::MeterCommand;
use crate::app::ports::{InboundMessage, TelemetryTransport};
use crate::config::MeterConfig;
use crate::error::{CommandError, TransportError};
use crate::scheduler::{deadline_reached, elapsed_ms};
use crate::sensors::flow::FlowReading;

use super::Topics;
use super::link::{Backoff, HANDSHAKE_TIMEOUT_MS, LinkEvent, LinkState};
use super::payload::TelemetryMessage;

/// Inbound commands accepted per second, and back-to-back.
const COMMAND_RATE_PER_SEC: u64 = 8;
const COMMAND_BURST: u64 = 8;
/// Inbound messages handled per call to [`TelemetryPublisher::next_command`].
const MAX_INBOUND_PER_POLL: usize = 8;

/// What a publish tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Payload handed to the transport.
    Sent { bytes: usize },
    /// Link not up; nothing sent.
    Skipped,
    /// The transport refused the publish; the reading is dropped.
    Dropped(TransportError),
    /// The reading could not be serialised.
    EncodeFailed,
}

/// Result of one [`TelemetryPublisher::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub link: Option<LinkEvent>,
    pub publish: PublishOutcome,
}

pub struct TelemetryPublisher<T: TelemetryTransport> {
    transport: T,
    topics: Topics,
    state: LinkState,
    backoff: Backoff,
    retain: bool,
    subscribed: bool,
    rate_limiter: burster::TokenBucket<fn() -> Duration>,
}

impl<T: TelemetryTransport> TelemetryPublisher<T> {
    pub fn new(transport: T, topics: Topics, config: &MeterConfig) -> Self {
        Self {
            transport,
            topics,
            state: LinkState::Disconnected { next_attempt_ms: 0 },
            backoff: Backoff::new(config.reconnect_initial_ms, config.reconnect_max_ms),
            retain: config.retain,
            subscribed: false,
            rate_limiter: burster::TokenBucket::new_with_time_provider(
                COMMAND_RATE_PER_SEC,
                COMMAND_BURST,
                platform_now as fn() -> Duration,
            ),
        }
    }

    /// Arm the first connection attempt for `now_ms`.
    pub fn begin(&mut self, now_ms: u32) {
        self.state = LinkState::Disconnected {
            next_attempt_ms: now_ms,
        };
        self.backoff.reset();
        self.subscribed = false;
    }

    // ── Link maintenance ──────────────────────────────────────

    /// Advance the link state machine by one step.  Cheap when nothing is
    /// due; safe to call every loop iteration.
    pub fn poll_link(&mut self, now_ms: u32) -> Option<LinkEvent> {
        match self.state {
            LinkState::Disconnected { next_attempt_ms } => {
                if !deadline_reached(now_ms, next_attempt_ms) {
                    return None;
                }
                match self.transport.connect() {
                    Ok(()) => {
                        debug!("telemetry: connection attempt started");
                        self.state = LinkState::Connecting { since_ms: now_ms };
                        // Synchronous transports are up already.
                        self.poll_link(now_ms)
                    }
                    Err(error) => Some(self.attempt_failed(now_ms, error)),
                }
            }
            LinkState::Connecting { since_ms } => {
                if self.transport.is_connected() {
                    self.state = LinkState::Connected;
                    self.backoff.reset();
                    self.subscribed = false;
                    self.ensure_subscribed();
                    info!("telemetry: link up");
                    Some(LinkEvent::Up)
                } else if elapsed_ms(now_ms, since_ms) >= HANDSHAKE_TIMEOUT_MS {
                    Some(self.attempt_failed(now_ms, TransportError::ConnectFailed))
                } else {
                    None
                }
            }
            LinkState::Connected => {
                if self.transport.is_connected() {
                    self.ensure_subscribed();
                    None
                } else {
                    warn!("telemetry: link lost, reconnecting");
                    self.state = LinkState::Disconnected {
                        next_attempt_ms: now_ms,
                    };
                    self.backoff.reset();
                    self.subscribed = false;
                    Some(LinkEvent::Down)
                }
            }
        }
    }

    fn attempt_failed(&mut self, now_ms: u32, error: TransportError) -> LinkEvent {
        let retry_in_ms = self.backoff.next_delay();
        warn!(
            "telemetry: connect failed ({}), retry in {} ms",
            error, retry_in_ms
        );
        self.state = LinkState::Disconnected {
            next_attempt_ms: now_ms.wrapping_add(retry_in_ms),
        };
        LinkEvent::AttemptFailed { error, retry_in_ms }
    }

    /// Subscribe to the command topic once per session.  A refused
    /// subscription is retried on the next poll.
    fn ensure_subscribed(&mut self) {
        if self.subscribed {
            return;
        }
        match self.transport.subscribe(&self.topics.command) {
            Ok(()) => {
                info!("telemetry: subscribed to {}", self.topics.command);
                self.subscribed = true;
            }
            Err(e) => warn!("telemetry: subscribe {} failed: {}", self.topics.command, e),
        }
    }

    // ── Publishing ────────────────────────────────────────────

    /// One publish tick: maintain the link, then publish `reading` if the
    /// session is up.  Never publishes while disconnected.
    pub fn tick(&mut self, now_ms: u32, reading: &FlowReading) -> TickReport {
        let link = self.poll_link(now_ms);
        let publish = self.publish_reading(reading);
        TickReport { link, publish }
    }

    fn publish_reading(&mut self, reading: &FlowReading) -> PublishOutcome {
        if !self.state.is_connected() || !self.transport.is_connected() {
            return PublishOutcome::Skipped;
        }

        let msg = match TelemetryMessage::from_reading(&self.topics.publish, reading, self.retain) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("telemetry: payload encoding failed: {}", e);
                return PublishOutcome::EncodeFailed;
            }
        };

        match self
            .transport
            .publish(msg.topic(), msg.payload(), msg.retain())
        {
            Ok(()) => {
                debug!(
                    "telemetry: {} <- {}",
                    msg.topic(),
                    core::str::from_utf8(msg.payload()).unwrap_or("<binary>")
                );
                PublishOutcome::Sent {
                    bytes: msg.payload().len(),
                }
            }
            Err(e) => {
                // Stay Connected: only a transport-level disconnect moves
                // the link, and poll_link sees that on its own.
                warn!("telemetry: publish failed ({}), reading dropped", e);
                PublishOutcome::Dropped(e)
            }
        }
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Parse a command body, subject to the inbound rate limit.
    pub fn on_command(&mut self, raw: &[u8]) -> Result<MeterCommand, CommandError> {
        if self.rate_limiter.try_consume(1).is_err() {
            warn!("telemetry: command rate limit exceeded, dropping");
            return Err(CommandError::RateLimited);
        }
        MeterCommand::parse(raw).inspect_err(|e| {
            warn!(
                "telemetry: rejected command {:?}: {}",
                String::from_utf8_lossy(raw),
                e
            );
        })
    }

    /// Next command from the command topic, skipping messages on other
    /// topics.  Handles at most a few messages per call so a flood cannot
    /// starve the loop.
    pub fn next_command(&mut self) -> Option<Result<MeterCommand, CommandError>> {
        for _ in 0..MAX_INBOUND_PER_POLL {
            let msg = self.poll_inbound()?;
            if msg.topic.as_str() == self.topics.command.as_str() {
                return Some(self.on_command(&msg.body));
            }
            debug!("telemetry: ignoring message on {}", msg.topic);
        }
        None
    }

    /// Raw inbound message from the transport.
    pub fn poll_inbound(&mut self) -> Option<InboundMessage> {
        self.transport.poll_inbound()
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn set_retain(&mut self, retain: bool) {
        self.retain = retain;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

// ── Platform time for the rate limiter ───────────────────────

#[cfg(target_os = "espidf")]
fn platform_now() -> Duration {
    let us = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    Duration::from_micros(us as u64)
}

#[cfg(not(target_os = "espidf"))]
fn platform_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}
