//! Reconnection backoff.

use std::time::Duration;

use crate::{BASE_RECONNECT_DELAY_MS, MAX_RECONNECT_ATTEMPTS};

/// Exponential backoff between reconnect attempts.
///
/// Attempt `n` (starting at 0) waits `base_delay * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Retries after a broken connection before giving up.
    pub max_attempts: u32,

    pub base_delay: Duration,

    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_RECONNECT_DELAY_MS),
            max_delay: Duration::from_secs(32),
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    /// Whether retry number `attempt` is allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
