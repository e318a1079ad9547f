//! Wire link and platform trait seams.
//!
//! The physical radio/serial driver, clock and reset are external
//! collaborators: the core only speaks to these traits. Implementations
//! for real hardware live outside this crate; the tests use in-memory
//! fakes.

use std::time::{SystemTime, UNIX_EPOCH};

/// Single-hop radio/serial link: byte-level send/receive plus address
/// configuration.
pub trait WireLink {
    /// Configure the physical address frames are received on.
    fn set_address(&mut self, address: u8);

    /// Poll for an inbound frame. Returns the physical address the
    /// pending frame was sent to (this node's address or broadcast), or
    /// None when nothing is pending.
    fn available(&mut self) -> Option<u8>;

    /// Pull the pending frame into `buf`, returning its length.
    fn receive(&mut self, buf: &mut [u8]) -> usize;

    /// Transmit a frame to a physical address. Broadcast sends always
    /// report success (no ack on the broadcast pipe).
    fn send(&mut self, to: u8, frame: &[u8]) -> bool;
}

/// Monotonic time and reset control.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch.
    fn now_ms(&self) -> u64;

    /// Reboot the node. On hardware this does not return; in tests it
    /// records the request and the core stops processing.
    fn reboot(&mut self);
}

/// Wall-clock backed implementation for hosted targets.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn reboot(&mut self) {
        // Hosted builds have no reset line; the node parks itself in the
        // Rebooting state instead.
    }
}

/// Observational activity/error signal (LED pulse on hardware).
///
/// Indicators never influence control flow; they exist so tests and
/// hardware builds can observe transmit/receive/error activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Indicator {
    Tx,
    Rx,
    Error,
}
