//! Deterministic environment for unit tests inside this crate.
//!
//! Integration tests use `parley_harness::SimEnv`; unit tests cannot, because
//! the harness links a separate build of this crate.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::env::Environment;

/// Fixed wall clock and a seeded ChaCha byte stream.
#[derive(Clone)]
pub(crate) struct TestEnv {
    millis: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha8Rng>>,
    start: Instant,
}

impl TestEnv {
    pub(crate) fn new() -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(1_700_000_000_000)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(0))),
            start: Instant::now(),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.start
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("TestEnv RNG mutex poisoned").fill_bytes(buffer);
    }

    fn wall_clock_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
