//! Receive deadlines and the bounded retry budget.
//!
//! Every wait in the protocol either returns a packet or times out after
//! [`TimerConfig::rto`].  A timeout is never surfaced directly; the waiting
//! step retransmits and tries again, and a [`RetryCounter`] bounds how many
//! consecutive timeouts it may absorb before the peer is declared
//! unresponsive.
//!
//! The deadline is fixed.  There is no RTT estimation or back-off: one
//! connection, one outstanding batch, a loopback-scale RTO.

use std::time::Duration;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// How long a bounded read waits before reporting a timeout.
    pub rto: Duration,
    /// Consecutive timeouts tolerated by one wait; one more fails it.
    pub retry_limit: u32,
    /// Per-datagram deadline used when sweeping a burst of duplicates.
    pub drain_timeout: Duration,
    /// Receive buffer size; larger datagrams are truncated and then fail
    /// to decode.
    pub max_datagram: usize,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            rto: Duration::from_millis(200),
            retry_limit: 5,
            drain_timeout: Duration::from_millis(5),
            max_datagram: 65_535,
        }
    }
}

/// Raised when a [`RetryCounter`] runs past its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetriesExhausted {
    pub attempts: u32,
}

/// Consecutive-timeout counter shared by every wait loop of a connection.
///
/// Any successful read resets it; each timeout bumps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    count: u32,
    limit: u32,
}

impl RetryCounter {
    pub fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    /// Record one timeout.
    ///
    /// Returns the new count while it is within the limit, or
    /// [`RetriesExhausted`] once it exceeds it.  The counter is reset on
    /// exhaustion so the next operation starts from zero.
    pub fn on_timeout(&mut self) -> Result<u32, RetriesExhausted> {
        self.count += 1;
        if self.count > self.limit {
            let attempts = self.count;
            self.count = 0;
            return Err(RetriesExhausted { attempts });
        }
        Ok(self.count)
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}
