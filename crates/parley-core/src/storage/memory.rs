#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::{Storage, StorageError, StorageKey};

/// In-memory storage implementation for testing and ephemeral sessions
///
/// A `HashMap` from the rendered key name to the raw value. All state is
/// wrapped in Arc<Mutex<>> to allow Clone and concurrent access. Uses
/// `lock().expect()` which will panic if the mutex is poisoned - acceptable for
/// test code.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    ///
    /// Useful for debugging and testing.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (a thread panicked while
    /// holding the lock). This is acceptable for test/simulation code.
    #[allow(clippy::expect_used)]
    pub fn entry_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").len()
    }

    /// Whether an entry exists under `key`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn contains(&self, key: &StorageKey) -> bool {
        self.inner.lock().expect("Mutex poisoned").contains_key(&key.to_string())
    }
}

impl Storage for MemoryStorage {
    #[allow(clippy::expect_used)]
    fn read(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").get(&key.to_string()).cloned())
    }

    #[allow(clippy::expect_used)]
    fn write(&self, key: &StorageKey, value: &[u8]) -> Result<(), StorageError> {
        self.inner.lock().expect("Mutex poisoned").insert(key.to_string(), value.to_vec());
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        self.inner.lock().expect("Mutex poisoned").remove(&key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conversation::{Conversation, ConversationId},
        message::{Sender, StoredMessage},
    };

    #[test]
    fn key_roundtrip() {
        let storage = MemoryStorage::new();
        let id = ConversationId::new("abc");

        assert_eq!(storage.load_key(&id).unwrap(), None);

        storage.store_key(&id, "AAAA").unwrap();
        assert_eq!(storage.load_key(&id).unwrap().as_deref(), Some("AAAA"));

        storage.delete_key(&id).unwrap();
        assert_eq!(storage.load_key(&id).unwrap(), None);
    }

    #[test]
    fn log_overwrite_replaces_previous() {
        let storage = MemoryStorage::new();
        let id = ConversationId::new("abc");

        let first = vec![StoredMessage::new("blob-a", Sender::Me, 1)];
        let second = vec![
            StoredMessage::new("blob-a", Sender::Me, 1),
            StoredMessage::new("blob-b", Sender::Peer, 2),
        ];

        storage.store_log(&id, &first).unwrap();
        storage.store_log(&id, &second).unwrap();

        assert_eq!(storage.load_log(&id).unwrap(), Some(second));
    }

    #[test]
    fn conversations_are_isolated() {
        let storage = MemoryStorage::new();
        let a = ConversationId::new("a");
        let b = ConversationId::new("b");

        storage.store_key(&a, "key-a").unwrap();
        storage.store_log(&a, &[StoredMessage::new("x", Sender::Me, 0)]).unwrap();

        assert_eq!(storage.load_key(&b).unwrap(), None);
        assert_eq!(storage.load_log(&b).unwrap(), None);
    }

    #[test]
    fn clones_share_state() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();

        storage.store_index(&[Conversation::new(ConversationId::new("1"), "Alice")]).unwrap();

        assert_eq!(clone.load_index().unwrap().len(), 1);
        assert_eq!(clone.entry_count(), 1);
        assert!(clone.contains(&StorageKey::ConversationIndex));
    }

    #[test]
    fn delete_absent_key_is_ok() {
        let storage = MemoryStorage::new();
        storage.delete(&StorageKey::ConversationIndex).unwrap();
        assert_eq!(storage.entry_count(), 0);
    }
}
