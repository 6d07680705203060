//! Connection lifecycle state machine.
//!
//! [`ConnectionManager`] is sans-IO: it owns the [`ConnectionState`], the
//! reconnect timer and the heartbeat timer, and is driven by the session
//! loop through [`ConnectionManager::connect`], [`ConnectionManager::on_open`],
//! [`ConnectionManager::on_close`] and [`ConnectionManager::poll_timers`].
//! It never touches a socket; what it wants done is returned as [`Notice`]s.
//!
//! ```text
//!   Disconnected ──connect()──▶ Connecting ──on_open──▶ Connected
//!        ▲  │                        │                      │
//!        │  └─reconnect timer──▶ Reconnecting ──on_open─────┘
//!        │                           │                      │
//!        └────────on_close───────────┴──────on_close────────┘
//! ```

pub mod backoff;
pub mod heartbeat;

use std::fmt;

use tokio::time::Instant;

pub use backoff::ReconnectPolicy;
pub use heartbeat::HeartbeatPolicy;

/// Lifecycle state of the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No channel and no attempt in flight.
    Disconnected,
    /// First attempt in flight.
    Connecting,
    /// Channel open; inbound messages are processed.
    Connected,
    /// A timer-driven retry is in flight.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// A cancellable deadline.
///
/// Counts how often it was armed and cancelled so callers can check that
/// no armed instance is ever leaked or cancelled twice.
#[derive(Debug, Default, Clone)]
pub struct Timer {
    deadline: Option<Instant>,
    arms: u32,
    cancels: u32,
}

impl Timer {
    /// Arms the timer. Returns `false` (and changes nothing) if already armed.
    pub fn arm(&mut self, deadline: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(deadline);
        self.arms += 1;
        true
    }

    /// Moves the deadline of an armed timer. No effect when disarmed.
    pub fn reschedule(&mut self, deadline: Instant) {
        if self.deadline.is_some() {
            self.deadline = Some(deadline);
        }
    }

    /// Disarms the timer. Returns `false` if it was not armed.
    pub fn cancel(&mut self) -> bool {
        if self.deadline.take().is_some() {
            self.cancels += 1;
            true
        } else {
            false
        }
    }

    /// Whether the timer is armed.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The pending deadline, if armed.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the timer is armed and its deadline has passed.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    /// How many times the timer has been armed.
    #[must_use]
    pub const fn arm_count(&self) -> u32 {
        self.arms
    }

    /// How many times an armed timer has been cancelled.
    #[must_use]
    pub const fn cancel_count(&self) -> u32 {
        self.cancels
    }
}

/// Something the session loop must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Connection status changed; forward to the sink.
    Status {
        /// Whether the channel is now open.
        connected: bool,
    },
    /// The reconnect timer fired and a new attempt must be started.
    Reconnecting {
        /// 1-based attempt number since the last successful open.
        attempt: u32,
    },
    /// Send a liveness probe on the open channel.
    SendProbe,
}

/// Owns the connection state and its two timers.
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    reconnect_policy: ReconnectPolicy,
    heartbeat_policy: HeartbeatPolicy,
    reconnect_timer: Timer,
    heartbeat_timer: Timer,
    attempt: u32,
    last_probe: Option<Instant>,
}

impl ConnectionManager {
    /// Creates a manager in [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn new(reconnect_policy: ReconnectPolicy, heartbeat_policy: HeartbeatPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_policy,
            heartbeat_policy,
            reconnect_timer: Timer::default(),
            heartbeat_timer: Timer::default(),
            attempt: 0,
            last_probe: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether inbound messages should be processed.
    #[must_use]
    pub fn accepts_messages(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Reconnect attempts since the last successful open.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The reconnect timer.
    #[must_use]
    pub const fn reconnect_timer(&self) -> &Timer {
        &self.reconnect_timer
    }

    /// The heartbeat timer.
    #[must_use]
    pub const fn heartbeat_timer(&self) -> &Timer {
        &self.heartbeat_timer
    }

    /// Requests a connection attempt.
    ///
    /// Only valid from `Disconnected`; returns `true` when the caller must
    /// start an attempt. Any other state means an attempt is already in
    /// flight or the channel is open, and nothing happens.
    pub fn connect(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            tracing::debug!(state = %self.state, "connect ignored");
            return false;
        }
        self.state = if self.reconnect_timer.is_armed() {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };
        tracing::debug!(state = %self.state, "connection attempt started");
        true
    }

    /// The channel opened.
    pub fn on_open(&mut self, now: Instant) -> Option<Notice> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            tracing::warn!(state = %self.state, "open reported outside a connection attempt");
            return None;
        }
        self.state = ConnectionState::Connected;
        self.reconnect_timer.cancel();
        self.attempt = 0;
        self.last_probe = Some(now);
        self.heartbeat_timer
            .arm(self.heartbeat_policy.next_due(now));
        tracing::info!("connected");
        Some(Notice::Status { connected: true })
    }

    /// The channel closed, or an attempt failed.
    ///
    /// Ignored while already `Disconnected`, so a burst of close signals
    /// arms at most one reconnect timer.
    pub fn on_close(&mut self, now: Instant) -> Option<Notice> {
        if self.state == ConnectionState::Disconnected {
            tracing::debug!("close ignored while disconnected");
            return None;
        }
        let was = self.state;
        self.state = ConnectionState::Disconnected;
        self.heartbeat_timer.cancel();
        self.last_probe = None;

        let delay = self.reconnect_policy.delay(self.attempt + 1);
        if self.reconnect_timer.arm(now + delay) {
            tracing::info!(from = %was, ?delay, "disconnected; reconnect scheduled");
        } else {
            tracing::debug!(from = %was, "disconnected; reconnect already scheduled");
        }
        Some(Notice::Status { connected: false })
    }

    /// A channel error. Logged only; the close that follows does the work.
    pub fn on_error(&self, reason: &str) {
        tracing::warn!(state = %self.state, reason, "connection error");
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (
            self.reconnect_timer.deadline(),
            self.heartbeat_timer.deadline(),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fires every due timer.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<Notice> {
        let mut notices = Vec::new();

        if self.heartbeat_timer.is_due(now) {
            let last = self.last_probe.unwrap_or(now);
            if self.heartbeat_policy.should_probe(self.state, last, now) {
                self.last_probe = Some(now);
                self.heartbeat_timer
                    .reschedule(self.heartbeat_policy.next_due(now));
                notices.push(Notice::SendProbe);
            } else {
                self.heartbeat_timer.cancel();
            }
        }

        if self.reconnect_timer.is_due(now) {
            self.attempt = self.attempt.saturating_add(1);
            let delay = self.reconnect_policy.delay(self.attempt + 1);
            self.reconnect_timer.reschedule(now + delay);
            if self.connect() {
                tracing::info!(attempt = self.attempt, "reconnecting");
                notices.push(Notice::Reconnecting {
                    attempt: self.attempt,
                });
            } else {
                tracing::debug!(attempt = self.attempt, "reconnect tick while attempt in flight");
            }
        }

        notices
    }
}
