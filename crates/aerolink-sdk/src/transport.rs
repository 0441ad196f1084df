//! Transport and time abstractions consumed by the message-list engine.
//!
//! The engine never touches sockets: it hands outgoing messages to a
//! [`ClientTransport`] and is fed incoming messages by whoever owns the
//! transport. [`LinkClient`](crate::link::LinkClient) is the production
//! implementation; tests substitute scripted mocks.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Timelike;

use aerolink_models::Message;

// ---------------------------------------------------------------------------
// SendToken / SendStatus / LogonStatus
// ---------------------------------------------------------------------------

/// Opaque handle to one in-flight send, used to query its fate later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SendToken(u64);

impl SendToken {
    /// Wrap a raw token value. Transports mint these; the engine only
    /// stores and returns them.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw token value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SendToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fate of one send operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Queued or being written to the link.
    Sending,
    /// Flushed to the link.
    Sent,
    /// The link dropped before the frame was flushed.
    SendFailed,
}

/// State of the logon exchange on the underlying link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonStatus {
    /// No link, or the link has gone down.
    Disconnected,
    /// Link established, logon frame not yet flushed.
    InProgress,
    /// Logon frame flushed; the station is addressable.
    Complete,
}

// ---------------------------------------------------------------------------
// ClientTransport
// ---------------------------------------------------------------------------

/// The engine's view of the underlying link.
///
/// `send` must not block: implementations enqueue the encoded frame and
/// report progress through `send_status`. The engine polls the status on
/// every recomputation, so asynchronous completion needs no callback.
pub trait ClientTransport: Send + Sync {
    /// Enqueue a message for transmission and return a tracking token.
    fn send(&self, msg: &Message) -> SendToken;

    /// Report the fate of a previously sent message.
    fn send_status(&self, token: SendToken) -> SendStatus;

    /// Current logon state of the link.
    fn logon_status(&self) -> LogonStatus;
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time source for the engine.
///
/// Split from the transport so reply-timeout behaviour can be driven with
/// simulated time in tests.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch, for timeout arithmetic.
    fn unix_time(&self) -> u64;

    /// Local wall-clock time as (hours, minutes), for display.
    fn display_time(&self) -> (u8, u8);
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn display_time(&self) -> (u8, u8) {
        let now = chrono::Local::now();
        (now.hour() as u8, now.minute() as u8)
    }
}
