//! Fuzz target for persisted state decoding
//!
//! Storage can be corrupted on disk. Loading a conversation must report an
//! error rather than crash.
//!
//! # Invariants
//!
//! - NEVER panic on arbitrary bytes under `messages_<id>` or `chats`
//! - A log that decodes loads with every message `Pending`

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_core::{
    ConversationId, ConversationIndex, ConversationStore, DecryptStatus, MemoryStorage, Storage,
    StorageKey,
};

fuzz_target!(|bytes: &[u8]| {
    let id = ConversationId::new("fuzz");
    let storage = MemoryStorage::new();
    let _ = storage.write(&StorageKey::MessageLog(id.clone()), bytes);
    let _ = storage.write(&StorageKey::ConversationIndex, bytes);

    if let Ok(messages) = ConversationStore::new(storage.clone()).load(&id) {
        assert!(messages.iter().all(|m| m.decrypt_status == DecryptStatus::Pending));
    }
    let _ = ConversationIndex::new(storage).list();
});
