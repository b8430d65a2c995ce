//! Production Environment implementation using system time and RNG.
//!
//! - Real monotonic time (`std::time::Instant`)
//! - OS cryptographic RNG (getrandom) for nonces and fresh keys
//! - System wall clock for message timestamps and conversation ids

use parley_core::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A client without functioning cryptographic
/// randomness would produce predictable nonces and keys, so it must not
/// continue.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - cannot encrypt securely");
    }

    #[allow(clippy::disallowed_methods)]
    #[allow(clippy::expect_used)]
    fn wall_clock_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)")
            .as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    #[allow(clippy::disallowed_methods)]
    fn time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = env.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[test]
    fn random_bytes_differ() {
        let env = SystemEnv::new();

        assert_ne!(env.random_array::<32>(), env.random_array::<32>());
    }

    #[test]
    fn wall_clock_is_after_2023() {
        assert!(SystemEnv::new().wall_clock_millis() > 1_700_000_000_000);
    }
}
