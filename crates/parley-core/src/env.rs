//! Environment abstraction for deterministic testing.
//!
//! Decouples the key and sync state machines from system resources (time,
//! randomness). Production uses the OS clock and CSPRNG; simulation uses a
//! virtual clock and a seeded RNG so nonces, random keys and timestamps are
//! reproducible.

use std::time::Duration;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production,
///   since it supplies AES-GCM nonces and fresh shared keys
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - Subsequent calls return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Milliseconds since the Unix epoch.
    ///
    /// Used for message timestamps and conversation ids. Wall-clock time may
    /// jump, so nothing orders by it.
    fn wall_clock_millis(&self) -> u64;

    /// Fixed-size array of random bytes.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }
}
