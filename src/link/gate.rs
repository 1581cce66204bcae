//! Send deduplication
//!
//! Peripheral links are slow and low duty-cycle, so the same color is not
//! resent until the keep-alive interval has passed. The periodic resend doubles
//! as a liveness signal for firmware that blanks itself when left alone.

use std::time::Duration;

use tokio::time::Instant;

use crate::color::Rgb;

/// The last color actually transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LastSent {
    color: Rgb,
    at: Instant,
}

/// Decides whether a color needs to go out to the peripheral
#[derive(Debug)]
pub struct SendGate {
    keep_alive: Duration,
    last_sent: Option<LastSent>,
}

impl SendGate {
    pub fn new(keep_alive: Duration) -> Self {
        Self {
            keep_alive,
            last_sent: None,
        }
    }

    /// True when connected and the color differs from the last one sent, or
    /// the keep-alive interval has elapsed since then
    pub fn should_send(&self, color: Rgb, now: Instant, connected: bool) -> bool {
        if !connected {
            return false;
        }

        match self.last_sent {
            None => true,
            Some(last) => {
                last.color != color || now.saturating_duration_since(last.at) > self.keep_alive
            }
        }
    }

    /// Remember a successful transmit
    pub fn record_sent(&mut self, color: Rgb, now: Instant) {
        self.last_sent = Some(LastSent { color, at: now });
    }

    /// Forget the last transmit, used when a new session starts
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}
