//! Delay policy between reconnect attempts.

use std::time::Duration;

use rand::Rng;

/// Default delay of the fixed policy.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// How long to wait before reconnect attempt `n` (1-based).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt.
    Fixed {
        /// Delay between attempts.
        interval: Duration,
    },
    /// `initial * 2^(n-1)`, randomised by `±jitter` and capped at `max`.
    Exponential {
        /// Delay before the first attempt.
        initial: Duration,
        /// Upper bound for any delay.
        max: Duration,
        /// Relative jitter in `[0, 1]`.
        jitter: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed {
            interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt`, jitter applied.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { interval } => interval,
            Self::Exponential { max, jitter, .. } => {
                let jitter = jitter.clamp(0.0, 1.0);
                let factor = if jitter > 0.0 {
                    rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter))
                } else {
                    1.0
                };
                self.base_delay(attempt).mul_f64(factor).min(max)
            }
        }
    }

    /// Delay before attempt `attempt` without jitter, capped at `max`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { interval } => interval,
            Self::Exponential { initial, max, .. } => {
                let exponent = attempt.saturating_sub(1).min(31);
                initial.saturating_mul(1u32 << exponent).min(max)
            }
        }
    }
}
