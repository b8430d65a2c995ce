//! Simulated environment.
//!
//! Monotonic time is tokio's clock, so it is virtual inside
//! `#[tokio::test(start_paused = true)]` and real elsewhere. The wall clock
//! starts at a fixed epoch and moves with that clock plus any manual
//! [`SimEnv::advance`].

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parley_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;

/// Wall clock at creation: 2023-11-14T22:13:20Z.
pub const SIM_EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// Deterministic environment for tests.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    created: Instant,
    offset_millis: Arc<AtomicU64>,
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with an explicit seed.
    ///
    /// Same seed, same random bytes in the same order.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            created: Instant::now(),
            offset_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move the wall clock forward without touching the monotonic clock.
    pub fn advance(&self, by: Duration) {
        self.offset_millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("SimEnv RNG mutex poisoned").fill_bytes(buffer);
    }

    fn wall_clock_millis(&self) -> u64 {
        let elapsed = (Instant::now() - self.created).as_millis() as u64;
        SIM_EPOCH_MILLIS + elapsed + self.offset_millis.load(Ordering::SeqCst)
    }
}
