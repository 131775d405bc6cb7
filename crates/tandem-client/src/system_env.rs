//! Production environment implementation.
//!
//! Real monotonic time, tokio sleeps for reconnect backoff, and OS entropy
//! for client identifiers and chat ids.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tandem_core::Environment;

/// Production environment using the system clock and OS entropy.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. Without entropy no identity
/// can be minted.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS entropy source available");
    }
}
