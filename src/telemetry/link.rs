//! MQTT link state and reconnect backoff.
//!
//! ```text
//!                 deadline reached, connect() ok
//!  Disconnected ─────────────────────────────────▶ Connecting
//!       ▲  ▲                                          │
//!       │  └──── connect() error / handshake timeout ─┤
//!       │                                             │ is_connected()
//!       └──────────── session lost ─────── Connected ◀┘
//! ```
//!
//! Each failed attempt pushes the next deadline out by the current
//! backoff, which doubles up to the cap.  A session that is lost after it
//! was established retries immediately and starts from the initial delay.

use crate::error::TransportError;

/// How long a started connection may take to report `is_connected()`.
pub const HANDSHAKE_TIMEOUT_MS: u32 = 10_000;

/// Exponential backoff with a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u32,
    max_ms: u32,
    current_ms: u32,
}

impl Backoff {
    pub fn new(initial_ms: u32, max_ms: u32) -> Self {
        let initial_ms = initial_ms.max(1);
        let max_ms = max_ms.max(initial_ms);
        Self {
            initial_ms,
            max_ms,
            current_ms: initial_ms,
        }
    }

    /// Delay to wait before the next attempt; doubles the following one.
    pub fn next_delay(&mut self) -> u32 {
        let delay = self.current_ms;
        self.current_ms = self.current_ms.saturating_mul(2).min(self.max_ms);
        delay
    }

    /// Back to the initial delay (after a successful connection).
    pub fn reset(&mut self) {
        self.current_ms = self.initial_ms;
    }
}

/// Where the publisher's link currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Waiting for the backoff deadline before the next attempt.
    Disconnected { next_attempt_ms: u32 },
    /// A connection attempt was started at `since_ms`.
    Connecting { since_ms: u32 },
    /// Session established; publishing.
    Connected,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Transitions reported by link maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Session established and the command topic subscribed (or queued).
    Up,
    /// An established session was lost.
    Down,
    /// An attempt failed; the next one is `retry_in_ms` away.
    AttemptFailed {
        error: TransportError,
        retry_in_ms: u32,
    },
}
