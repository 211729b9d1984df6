//! Deterministic environment for tests and simulation.
//!
//! `SimEnv` replaces the system clock with a manually advanced virtual clock
//! and the OS RNG with a seeded ChaCha20 RNG. Two `SimEnv`s built from the same
//! seed produce the same keys, nonces and session IDs.
//!
//! Not for production: seeded randomness is predictable by construction.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::env::Environment;

/// Wall-clock origin for simulated time (2024-01-01T00:00:00Z).
pub const SIM_EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Simulated environment with a virtual clock and seeded RNG.
///
/// Clones share the same clock and RNG stream.
#[derive(Clone)]
pub struct SimEnv {
    inner: Arc<SimInner>,
}

struct SimInner {
    rng: Mutex<ChaCha20Rng>,
    elapsed_nanos: AtomicU64,
    epoch_millis: u64,
}

impl SimEnv {
    /// Create a simulated environment from an RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(SimInner {
                rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
                elapsed_nanos: AtomicU64::new(0),
                epoch_millis: SIM_EPOCH_MILLIS,
            }),
        }
    }

    /// Advance the virtual clock.
    pub fn advance(&self, duration: Duration) {
        self.inner.elapsed_nanos.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Time elapsed on the virtual clock since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.inner.elapsed_nanos.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("elapsed", &self.elapsed()).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    type Instant = Duration;

    fn now(&self) -> Self::Instant {
        self.elapsed()
    }

    fn wall_clock_millis(&self) -> u64 {
        self.inner.epoch_millis + self.elapsed().as_millis() as u64
    }

    /// Advances the virtual clock by `duration`, then yields once so other
    /// tasks on the runtime get to observe the new time.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        let env = self.clone();
        async move {
            env.advance(duration);
            tokio::task::yield_now().await;
        }
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.inner.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
