//! Storage abstraction for Parley conversations
//!
//! A namespaced key-value store. Three kinds of entry exist:
//!
//! | Key                | Value                                          |
//! |--------------------|------------------------------------------------|
//! | `key_<id>`         | base64 text of the conversation's shared key   |
//! | `messages_<id>`    | CBOR array of `{encrypted, sender, timestamp}` |
//! | `chats`            | CBOR array of `{id, name}`                     |
//!
//! The trait is synchronous (no async). Backends only implement raw
//! `read`/`write`/`delete`; the typed accessors are provided on top so every
//! backend encodes values identically.

mod chaotic;
mod error;
mod memory;
mod redb;

use std::fmt;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;

pub use self::redb::RedbStorage;
use crate::{
    conversation::{Conversation, ConversationId},
    message::StoredMessage,
};

/// Namespaced storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// Persisted shared key of a conversation (`key_<id>`).
    ConversationKey(ConversationId),
    /// Message log of a conversation (`messages_<id>`).
    MessageLog(ConversationId),
    /// List of all conversations (`chats`).
    ConversationIndex,
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConversationKey(id) => write!(f, "key_{id}"),
            Self::MessageLog(id) => write!(f, "messages_{id}"),
            Self::ConversationIndex => f.write_str("chats"),
        }
    }
}

/// Storage abstraction for keys, message logs and the conversation index
///
/// Must be Clone (shared by the key manager, the message store and the
/// index), Send + Sync (thread-safe), and synchronous. Implementations
/// typically share internal state via Arc, so clones access the same
/// underlying storage.
///
/// Every `write` and `delete` is durable on return for persistent backends.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Raw value stored under `key`. `None` if absent.
    fn read(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the value stored under `key`.
    fn write(&self, key: &StorageKey, value: &[u8]) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &StorageKey) -> Result<(), StorageError>;

    /// Persisted shared key (base64 text) for a conversation.
    fn load_key(&self, id: &ConversationId) -> Result<Option<String>, StorageError> {
        let Some(raw) = self.read(&StorageKey::ConversationKey(id.clone()))? else {
            return Ok(None);
        };

        String::from_utf8(raw)
            .map(Some)
            .map_err(|e| StorageError::Serialization(format!("key entry is not UTF-8: {e}")))
    }

    /// Persist the exported form of a conversation's shared key.
    fn store_key(&self, id: &ConversationId, exported: &str) -> Result<(), StorageError> {
        self.write(&StorageKey::ConversationKey(id.clone()), exported.as_bytes())
    }

    /// Remove a conversation's persisted shared key.
    fn delete_key(&self, id: &ConversationId) -> Result<(), StorageError> {
        self.delete(&StorageKey::ConversationKey(id.clone()))
    }

    /// Persisted message log for a conversation. `None` if never written.
    fn load_log(&self, id: &ConversationId) -> Result<Option<Vec<StoredMessage>>, StorageError> {
        self.read(&StorageKey::MessageLog(id.clone()))?.map(|raw| decode(&raw)).transpose()
    }

    /// Overwrite a conversation's message log.
    fn store_log(&self, id: &ConversationId, log: &[StoredMessage]) -> Result<(), StorageError> {
        self.write(&StorageKey::MessageLog(id.clone()), &encode(&log)?)
    }

    /// Remove a conversation's message log.
    fn delete_log(&self, id: &ConversationId) -> Result<(), StorageError> {
        self.delete(&StorageKey::MessageLog(id.clone()))
    }

    /// All known conversations, in creation order. Empty if never written.
    fn load_index(&self) -> Result<Vec<Conversation>, StorageError> {
        match self.read(&StorageKey::ConversationIndex)? {
            Some(raw) => decode(&raw),
            None => Ok(Vec::new()),
        }
    }

    /// Overwrite the conversation index.
    fn store_index(&self, conversations: &[Conversation]) -> Result<(), StorageError> {
        self.write(&StorageKey::ConversationIndex, &encode(&conversations)?)
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: serde::de::DeserializeOwned>(raw: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(raw).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_match_persisted_layout() {
        let id = ConversationId::new("1700000000000");

        assert_eq!(StorageKey::ConversationKey(id.clone()).to_string(), "key_1700000000000");
        assert_eq!(StorageKey::MessageLog(id).to_string(), "messages_1700000000000");
        assert_eq!(StorageKey::ConversationIndex.to_string(), "chats");
    }

    #[test]
    fn corrupt_log_is_serialization_error() {
        let storage = MemoryStorage::new();
        let id = ConversationId::new("c");
        storage.write(&StorageKey::MessageLog(id.clone()), &[0xFF, 0x00, 0x13]).unwrap();

        assert!(matches!(storage.load_log(&id), Err(StorageError::Serialization(_))));
    }

    #[test]
    fn non_utf8_key_entry_is_serialization_error() {
        let storage = MemoryStorage::new();
        let id = ConversationId::new("c");
        storage.write(&StorageKey::ConversationKey(id.clone()), &[0xC3, 0x28]).unwrap();

        assert!(matches!(storage.load_key(&id), Err(StorageError::Serialization(_))));
    }

    #[test]
    fn missing_index_is_empty() {
        assert!(MemoryStorage::new().load_index().unwrap().is_empty());
    }
}
