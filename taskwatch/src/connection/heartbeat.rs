//! Liveness probing while connected.

use std::time::Duration;

use tokio::time::Instant;

use super::ConnectionState;

/// Default interval between `ping` probes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Decides when the next probe is due.
///
/// `last` is the instant of the previous probe, or of the connection's
/// open when no probe has been sent yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// Time between probes.
    pub interval: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl HeartbeatPolicy {
    /// Creates a policy probing every `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// When the probe after `last` is due.
    #[must_use]
    pub fn next_due(&self, last: Instant) -> Instant {
        last + self.interval
    }

    /// Whether a probe is due at `now`.
    #[must_use]
    pub fn is_due(&self, last: Instant, now: Instant) -> bool {
        now >= self.next_due(last)
    }

    /// Whether a probe should be sent: only while connected, and only when due.
    #[must_use]
    pub fn should_probe(&self, state: ConnectionState, last: Instant, now: Instant) -> bool {
        state == ConnectionState::Connected && self.is_due(last, now)
    }
}
