//! Fuzz target for pasted key import
//!
//! # Invariants
//!
//! - NEVER panic on arbitrary input
//! - Accepted keys are exactly 32 bytes and re-export to canonical base64
//! - A rejected import leaves the key manager `Invalid` with its generation
//!   unchanged

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_core::{ConversationId, KeyManager, KeyStatus, MemoryStorage};
use parley_crypto::{export_key, import_key, KeyMaterial};

fuzz_target!(|input: &str| {
    match import_key(input) {
        Ok(key) => {
            let exported = export_key(&key);
            assert_eq!(exported, input.trim());
        }
        Err(err) => assert!(err.is_key_rejection()),
    }

    let mut keys = KeyManager::new(ConversationId::new("fuzz"), MemoryStorage::new());
    keys.adopt(KeyMaterial::random([7; 32]));
    let generation = keys.generation();

    match keys.import_key(input) {
        Ok(status) => {
            assert_eq!(status, KeyStatus::Shared);
            assert_eq!(keys.generation(), generation + 1);
        }
        Err(_) => {
            assert_eq!(keys.status(), KeyStatus::Invalid);
            assert_eq!(keys.generation(), generation);
        }
    }
});
