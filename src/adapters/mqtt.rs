//! MQTT adapter.
//!
//! Implements [`TelemetryTransport`] on top of a [`ConnectivityPort`]:
//! the MQTT session can only exist while the WiFi link is up, so
//! `connect()` first makes sure the link is on its way.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::mqtt::client::EspMqttClient`.
//!   The ESP-IDF client runs its own task; a small connection thread
//!   drains its event stream, mirrors the session state into an
//!   `AtomicBool` and forwards received messages over a bounded channel.
//! - **all other targets**: an in-memory broker session for host tests.
//!
//! Nothing here blocks the caller.  When the inbound channel is full,
//! further messages are dropped and logged.

use log::{info, warn};

use crate::app::ports::{InboundMessage, TelemetryTransport};
use crate::error::TransportError;

use super::wifi::ConnectivityPort;

/// Inbound messages buffered between the MQTT task and the main loop.
pub const INBOUND_QUEUE_DEPTH: usize = 8;

/// Broker session parameters.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// `mqtt://host:port`
    pub broker_url: String,
    pub client_id: heapless::String<32>,
    pub keep_alive_secs: u16,
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF session
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod session {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
    use std::time::Duration;

    use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};
    use log::{debug, info, warn};

    use super::{INBOUND_QUEUE_DEPTH, MqttSettings};
    use crate::app::ports::InboundMessage;
    use crate::error::TransportError;

    /// One broker session: the client handle plus its event thread.
    pub struct Session {
        client: EspMqttClient<'static>,
        connected: Arc<AtomicBool>,
        inbound: Receiver<InboundMessage>,
    }

    impl Session {
        pub fn open(settings: &MqttSettings) -> Result<Self, TransportError> {
            let conf = MqttClientConfiguration {
                client_id: Some(settings.client_id.as_str()),
                keep_alive_interval: Some(Duration::from_secs(u64::from(settings.keep_alive_secs))),
                ..Default::default()
            };

            let (client, mut connection) =
                EspMqttClient::new(&settings.broker_url, &conf).map_err(|e| {
                    warn!("MQTT: client creation failed: {:?}", e);
                    TransportError::ConnectFailed
                })?;

            let connected = Arc::new(AtomicBool::new(false));
            let (tx, rx): (SyncSender<InboundMessage>, _) = sync_channel(INBOUND_QUEUE_DEPTH);
            let flag = Arc::clone(&connected);

            std::thread::Builder::new()
                .stack_size(6144)
                .name("mqtt_conn".into())
                .spawn(move || {
                    // Ends when the client is dropped and the stream errors out.
                    while let Ok(event) = connection.next() {
                        match event.payload() {
                            EventPayload::Connected(session_present) => {
                                info!("MQTT: connected (session_present={})", session_present);
                                flag.store(true, Ordering::Release);
                            }
                            EventPayload::Disconnected => {
                                info!("MQTT: disconnected");
                                flag.store(false, Ordering::Release);
                            }
                            EventPayload::Received {
                                topic: Some(topic),
                                data,
                                ..
                            } => match InboundMessage::new(topic, data) {
                                Some(msg) => match tx.try_send(msg) {
                                    Ok(()) => {}
                                    Err(TrySendError::Full(_)) => {
                                        warn!("MQTT: inbound queue full, dropping message")
                                    }
                                    Err(TrySendError::Disconnected(_)) => break,
                                },
                                None => warn!("MQTT: oversized topic or body, dropping message"),
                            },
                            EventPayload::Error(e) => debug!("MQTT: error event {:?}", e),
                            _ => {}
                        }
                    }
                    flag.store(false, Ordering::Release);
                    info!("MQTT: connection thread exiting");
                })
                .map_err(|_| TransportError::ConnectFailed)?;

            Ok(Self {
                client,
                connected,
                inbound: rx,
            })
        }

        pub fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Acquire)
        }

        pub fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
            self.client
                .enqueue(topic, QoS::AtMostOnce, retain, payload)
                .map(|_| ())
                .map_err(|_| TransportError::PublishFailed)
        }

        pub fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
            self.client
                .subscribe(topic, QoS::AtMostOnce)
                .map(|_| ())
                .map_err(|_| TransportError::SubscribeFailed)
        }

        pub fn poll_inbound(&mut self) -> Option<InboundMessage> {
            self.inbound.try_recv().ok()
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation session
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod session {
    use std::collections::VecDeque;

    use super::{INBOUND_QUEUE_DEPTH, MqttSettings};
    use crate::app::ports::InboundMessage;
    use crate::error::TransportError;

    /// In-memory broker session.  Connects instantly.
    #[derive(Default)]
    pub struct Session {
        pub connected: bool,
        pub published: Vec<(String, Vec<u8>, bool)>,
        pub subscriptions: Vec<String>,
        pub inbound: VecDeque<InboundMessage>,
    }

    impl Session {
        pub fn open(_settings: &MqttSettings) -> Result<Self, TransportError> {
            Ok(Self {
                connected: true,
                ..Default::default()
            })
        }

        pub fn is_connected(&self) -> bool {
            self.connected
        }

        pub fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
            if !self.connected {
                return Err(TransportError::NotConnected);
            }
            self.published.push((topic.into(), payload.to_vec(), retain));
            Ok(())
        }

        pub fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
            if !self.connected {
                return Err(TransportError::NotConnected);
            }
            self.subscriptions.push(topic.into());
            Ok(())
        }

        pub fn poll_inbound(&mut self) -> Option<InboundMessage> {
            self.inbound.pop_front()
        }

        pub fn deliver(&mut self, msg: InboundMessage) -> bool {
            if self.inbound.len() >= INBOUND_QUEUE_DEPTH {
                return false;
            }
            self.inbound.push_back(msg);
            true
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Adapter
// ───────────────────────────────────────────────────────────────

pub struct MqttAdapter<C: ConnectivityPort> {
    link: C,
    settings: MqttSettings,
    session: Option<session::Session>,
}

impl<C: ConnectivityPort> MqttAdapter<C> {
    pub fn new(link: C, settings: MqttSettings) -> Self {
        Self {
            link,
            settings,
            session: None,
        }
    }

    pub fn link(&self) -> &C {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut C {
        &mut self.link
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }
}

impl<C: ConnectivityPort> TelemetryTransport for MqttAdapter<C> {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.link.poll();
        if !self.link.is_connected() {
            if let Err(e) = self.link.connect() {
                warn!("MQTT: WiFi unavailable: {}", e);
            }
            if !self.link.is_connected() {
                return Err(TransportError::LinkDown);
            }
        }

        // Replace a dead session instead of waiting on its internal retry.
        if self.session.as_ref().is_some_and(session::Session::is_connected) {
            return Ok(());
        }
        self.session = None;
        info!(
            "MQTT: opening session to {} as {}",
            self.settings.broker_url, self.settings.client_id
        );
        self.session = Some(session::Session::open(&self.settings)?);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected() && self.session.as_ref().is_some_and(session::Session::is_connected)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        match self.session.as_mut() {
            Some(s) => s.publish(topic, payload, retain),
            None => Err(TransportError::NotConnected),
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        match self.session.as_mut() {
            Some(s) => s.subscribe(topic),
            None => Err(TransportError::NotConnected),
        }
    }

    fn poll_inbound(&mut self) -> Option<InboundMessage> {
        self.session.as_mut()?.poll_inbound()
    }
}

// ── Simulation controls ──────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl<C: ConnectivityPort> MqttAdapter<C> {
    /// Messages published on the current session.
    pub fn sim_published(&self) -> &[(String, Vec<u8>, bool)] {
        self.session.as_ref().map_or(&[], |s| s.published.as_slice())
    }

    /// Topics subscribed on the current session.
    pub fn sim_subscriptions(&self) -> &[String] {
        self.session.as_ref().map_or(&[], |s| s.subscriptions.as_slice())
    }

    /// Deliver a message as if the broker sent it.  `false` if there is
    /// no session, the message is oversized or the queue is full.
    pub fn sim_deliver(&mut self, topic: &str, body: &[u8]) -> bool {
        match (self.session.as_mut(), InboundMessage::new(topic, body)) {
            (Some(s), Some(msg)) => s.deliver(msg),
            _ => false,
        }
    }

    /// Drop the broker session as a network fault would.
    pub fn sim_drop_session(&mut self) {
        if let Some(s) = self.session.as_mut() {
            s.connected = false;
        }
    }
}
