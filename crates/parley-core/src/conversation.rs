//! Conversations and the persisted conversation index.
//!
//! The index (`chats`) is the list a presentation layer renders. The core only
//! needs it for its deletion lifecycle: removing a conversation must also
//! remove its shared key and its message log.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    env::Environment,
    storage::{Storage, StorageError},
};

/// Opaque conversation identifier.
///
/// Namespaces the conversation's key entry and message log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// An entry of the conversation index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier
    pub id: ConversationId,
    /// Display name chosen by the user
    pub name: String,
}

impl Conversation {
    /// Create an index entry.
    pub fn new(id: ConversationId, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// Errors from conversation index operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Display name is empty after trimming
    #[error("conversation name must not be empty")]
    EmptyName,

    /// Index could not be read or written
    #[error("conversation index persistence failed: {0}")]
    Persistence(#[from] StorageError),
}

/// Persisted list of conversations.
#[derive(Clone)]
pub struct ConversationIndex<S: Storage> {
    storage: S,
}

impl<S: Storage> ConversationIndex<S> {
    /// Index over the given storage.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// All conversations, in creation order.
    pub fn list(&self) -> Result<Vec<Conversation>, IndexError> {
        Ok(self.storage.load_index()?)
    }

    /// Look up a conversation by id.
    pub fn get(&self, id: &ConversationId) -> Result<Option<Conversation>, IndexError> {
        Ok(self.storage.load_index()?.into_iter().find(|c| &c.id == id))
    }

    /// Create a conversation named `name`.
    ///
    /// The id is the current wall-clock time in milliseconds. If that id is
    /// already taken (two conversations created within the same millisecond)
    /// the next free millisecond is used.
    ///
    /// # Errors
    ///
    /// - `EmptyName` if `name` is blank
    /// - `Persistence` if the index cannot be read or written
    pub fn create<E: Environment>(&self, name: &str, env: &E) -> Result<Conversation, IndexError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IndexError::EmptyName);
        }

        let mut conversations = self.storage.load_index()?;

        let mut millis = env.wall_clock_millis();
        while conversations.iter().any(|c| c.id.as_str() == millis.to_string()) {
            millis += 1;
        }

        let conversation = Conversation::new(ConversationId::new(millis.to_string()), name);
        conversations.push(conversation.clone());
        self.storage.store_index(&conversations)?;

        info!(conversation_id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    /// Whether a shared key is persisted for the conversation.
    ///
    /// False means the conversation runs on the insecure fallback key.
    pub fn has_shared_key(&self, id: &ConversationId) -> Result<bool, IndexError> {
        Ok(self.storage.load_key(id)?.is_some())
    }

    /// Remove a conversation together with its key entry and message log.
    ///
    /// Returns whether the conversation was listed. The key and log are
    /// removed either way, so a half-finished earlier removal is completed.
    pub fn remove(&self, id: &ConversationId) -> Result<bool, IndexError> {
        self.storage.delete_key(id)?;
        self.storage.delete_log(id)?;

        let mut conversations = self.storage.load_index()?;
        let before = conversations.len();
        conversations.retain(|c| &c.id != id);
        let existed = conversations.len() != before;

        if existed {
            self.storage.store_index(&conversations)?;
        }

        debug!(conversation_id = %id, existed, "conversation removed");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::{Sender, StoredMessage},
        storage::MemoryStorage,
        test_env::TestEnv,
    };

    #[test]
    fn create_uses_wall_clock_millis_as_id() {
        let env = TestEnv::new();
        let index = ConversationIndex::new(MemoryStorage::new());

        let conversation = index.create("Alice", &env).unwrap();

        assert_eq!(conversation.id.as_str(), env.wall_clock_millis().to_string());
        assert_eq!(conversation.name, "Alice");
        assert_eq!(index.list().unwrap(), vec![conversation]);
    }

    #[test]
    fn same_millisecond_creates_distinct_ids() {
        let env = TestEnv::new();
        let index = ConversationIndex::new(MemoryStorage::new());

        let a = index.create("Alice", &env).unwrap();
        let b = index.create("Bob", &env).unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(index.list().unwrap().len(), 2);
    }

    #[test]
    fn later_creation_gets_later_id() {
        let env = TestEnv::new();
        let index = ConversationIndex::new(MemoryStorage::new());

        let a = index.create("Alice", &env).unwrap();
        env.advance(std::time::Duration::from_secs(1));
        let b = index.create("Bob", &env).unwrap();

        let a_ms: u64 = a.id.as_str().parse().unwrap();
        let b_ms: u64 = b.id.as_str().parse().unwrap();
        assert_eq!(b_ms - a_ms, 1000);
    }

    #[test]
    fn blank_name_rejected() {
        let env = TestEnv::new();
        let index = ConversationIndex::new(MemoryStorage::new());

        assert_eq!(index.create("   ", &env), Err(IndexError::EmptyName));
        assert!(index.list().unwrap().is_empty());
    }

    #[test]
    fn remove_cascades_to_key_and_log() {
        let env = TestEnv::new();
        let storage = MemoryStorage::new();
        let index = ConversationIndex::new(storage.clone());

        let conversation = index.create("Alice", &env).unwrap();
        storage.store_key(&conversation.id, "AAAA").unwrap();
        storage.store_log(&conversation.id, &[StoredMessage::new("blob", Sender::Me, 1)]).unwrap();
        assert!(index.has_shared_key(&conversation.id).unwrap());

        assert!(index.remove(&conversation.id).unwrap());

        assert!(index.list().unwrap().is_empty());
        assert!(!index.has_shared_key(&conversation.id).unwrap());
        assert_eq!(storage.load_log(&conversation.id).unwrap(), None);
        assert_eq!(storage.entry_count(), 1, "only the (now empty) index remains");
    }

    #[test]
    fn remove_unknown_conversation_reports_absent() {
        let index = ConversationIndex::new(MemoryStorage::new());
        assert!(!index.remove(&ConversationId::new("nope")).unwrap());
    }

    #[test]
    fn get_finds_by_id() {
        let env = TestEnv::new();
        let index = ConversationIndex::new(MemoryStorage::new());
        let conversation = index.create("Alice", &env).unwrap();

        assert_eq!(index.get(&conversation.id).unwrap(), Some(conversation));
        assert_eq!(index.get(&ConversationId::new("other")).unwrap(), None);
    }
}
