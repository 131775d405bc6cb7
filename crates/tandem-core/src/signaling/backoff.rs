//! Reconnect delay policy.

use std::time::Duration;

use crate::env::Environment;

/// First redial delay.
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_millis(500);

/// Longest redial delay.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Exponential backoff with bounded jitter.
///
/// Delay for attempt `n` (1-based) is `base * 2^(n-1)`, capped at `max`, plus
/// up to 20% jitter from the environment RNG.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    /// Policy with the given base and cap.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max: max.max(base), attempt: 0 }
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record an attempt and return how long to wait before it.
    pub fn next_delay<E: Environment>(&mut self, env: &E) -> Duration {
        self.attempt = self.attempt.saturating_add(1);

        let exponent = (self.attempt - 1).min(16);
        let delay = self.base.saturating_mul(1u32 << exponent).min(self.max);

        let jitter_ms = delay.as_millis() as u64 / 5;
        let jitter = if jitter_ms == 0 { 0 } else { env.random_u64() % (jitter_ms + 1) };

        delay + Duration::from_millis(jitter)
    }

    /// Back to the base delay (after a successful handshake).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_BASE, DEFAULT_RECONNECT_MAX)
    }
}
