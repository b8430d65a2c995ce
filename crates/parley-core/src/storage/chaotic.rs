//! Chaotic storage wrapper for fault injection testing
//!
//! Randomly fails raw operations so the persistence error paths of the key
//! manager, message store and conversation index can be driven
//! deterministically. Typed accessors go through the raw operations, so they
//! fail at the same rate.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use super::{Storage, StorageError, StorageKey};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but randomly fails
/// operations based on a configured failure rate. A failed operation never
/// reaches the inner storage, so there are no partial writes. Uses
/// Arc<Mutex<>> for the RNG state, making it Clone and thread-safe.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operations attempted, including failed ones
    operation_count: Arc<Mutex<usize>>,
}

/// Linear congruential generator. Same seed, same failure schedule.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper with the default seed
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of raw storage operations attempted.
    #[allow(clippy::expect_used)]
    pub fn operation_count(&self) -> usize {
        *self.operation_count.lock().expect("operation_count mutex poisoned")
    }

    /// Count the operation and decide whether it fails.
    #[allow(clippy::expect_used)]
    fn roll(&self) -> Result<(), StorageError> {
        let mut count = self.operation_count.lock().expect("operation_count mutex poisoned");
        *count += 1;
        drop(count);

        let fail =
            self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(self.failure_rate);

        if fail { Err(StorageError::Io("chaotic failure injection".to_string())) } else { Ok(()) }
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn read(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        self.roll()?;
        self.inner.read(key)
    }

    fn write(&self, key: &StorageKey, value: &[u8]) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.write(key, value)
    }

    fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.delete(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{conversation::ConversationId, storage::MemoryStorage};

    #[test]
    fn zero_failure_rate_never_fails() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 0.0);

        for i in 0..100 {
            let id = ConversationId::new(i.to_string());
            chaotic.store_key(&id, "AAAA").expect("should not fail with 0% rate");
        }

        assert_eq!(chaotic.inner().entry_count(), 100);
        assert_eq!(chaotic.operation_count(), 100);
    }

    #[test]
    fn full_failure_rate_always_fails() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 1.0);
        let id = ConversationId::new("c");

        let result = chaotic.store_key(&id, "AAAA");
        assert!(matches!(result, Err(StorageError::Io(msg)) if msg.contains("chaotic")));

        // Failed writes never reach the inner storage
        assert_eq!(chaotic.inner().entry_count(), 0);
    }

    #[test]
    fn same_seed_same_failure_schedule() {
        let run = |seed| {
            let chaotic = ChaoticStorage::with_seed(MemoryStorage::new(), 0.5, seed);
            (0..64)
                .map(|_| chaotic.read(&StorageKey::ConversationIndex).is_ok())
                .collect::<Vec<_>>()
        };

        assert_eq!(run(7), run(7));
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn rejects_out_of_range_rate() {
        let _ = ChaoticStorage::new(MemoryStorage::new(), 1.5);
    }
}
