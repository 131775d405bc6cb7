//! Simulated environment.
//!
//! Virtual time that only moves when told to (or when something sleeps),
//! and a seeded ChaCha RNG. Two runs with the same seed draw the same
//! identities, chat ids and backoff jitter.

use std::{
    ops::Sub,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tandem_core::Environment;

/// Wall clock at virtual time zero (2023-11-14T22:13:20Z).
const EPOCH_MS: u64 = 1_700_000_000_000;

/// Default seed for [`SimEnv::new`].
const DEFAULT_SEED: u64 = 0x7A4D_E11A;

/// Point on the virtual clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

#[derive(Debug)]
struct State {
    now: Duration,
    rng: ChaCha8Rng,
}

/// Deterministic environment shared by clones.
#[derive(Debug, Clone)]
pub struct SimEnv {
    state: Arc<Mutex<State>>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment with the default seed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Environment with an explicit seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        let state = State { now: Duration::ZERO, rng: ChaCha8Rng::seed_from_u64(seed) };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Move virtual time forward.
    pub fn advance(&self, duration: Duration) {
        self.lock().now += duration;
    }

    /// Virtual time since start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.lock().now
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.lock().now)
    }

    fn wall_clock_ms(&self) -> u64 {
        EPOCH_MS + self.lock().now.as_millis() as u64
    }

    /// Advances virtual time instead of waiting, then yields once.
    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }
}
