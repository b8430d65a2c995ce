//! Reconciliation of a local conversation log with the remote feed.
//!
//! One cycle: fetch the remote list, then merge every entry whose blob is not
//! already local, in remote order, as a `Peer` message. Merging goes through
//! [`ConversationStore::append_all`], so a duplicate never lands twice even
//! when a send and a merge race.
//!
//! Fetching and merging are split so callers can hold their key lock for the
//! merge only, never across network I/O.

use async_trait::async_trait;
use parley_crypto::{CiphertextBlob, SecretKey, decrypt_message};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    conversation::ConversationId,
    log_store::{ConversationStore, LogError},
    message::{Message, Sender},
    storage::Storage,
};

/// One message as listed by the remote feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Ciphertext blob
    pub encrypted: CiphertextBlob,
    /// Epoch milliseconds assigned by the server, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// Errors talking to the remote feed
///
/// All of them are retried on the next poll cycle and never surfaced
/// synchronously to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Request could not be sent or the connection failed
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-2xx status
    #[error("unexpected status {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// Response body could not be decoded
    #[error("malformed response: {0}")]
    Decode(String),
}

impl FeedError {
    /// Returns true if retrying later can plausibly succeed.
    ///
    /// Client errors (4xx) and malformed bodies point at a server or protocol
    /// mismatch; they are still retried but logged louder.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status } => *status >= 500 || *status == 429,
            Self::Decode(_) => false,
        }
    }
}

/// Remote message feed for conversations.
#[async_trait]
pub trait RemoteFeed: Send + Sync + 'static {
    /// All messages the feed holds for a conversation, oldest first.
    async fn fetch(&self, conversation_id: &ConversationId) -> Result<Vec<RemoteEntry>, FeedError>;

    /// Publish a blob to the conversation.
    async fn submit(
        &self,
        conversation_id: &ConversationId,
        blob: &CiphertextBlob,
    ) -> Result<(), FeedError>;
}

/// Result of merging one fetched list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReport {
    /// Entries returned by the feed
    pub fetched: usize,
    /// Entries that were new and appended
    pub appended: usize,
}

/// Drives fetch and merge against one remote feed.
#[derive(Clone)]
pub struct SyncEngine<F: RemoteFeed> {
    feed: F,
}

impl<F: RemoteFeed> SyncEngine<F> {
    /// Engine over `feed`.
    pub fn new(feed: F) -> Self {
        Self { feed }
    }

    /// Fetch the remote list for a conversation.
    pub async fn fetch(&self, id: &ConversationId) -> Result<Vec<RemoteEntry>, FeedError> {
        self.feed.fetch(id).await.inspect_err(|err| {
            if err.is_transient() {
                debug!(conversation_id = %id, error = %err, "fetch failed");
            } else {
                warn!(conversation_id = %id, error = %err, "fetch failed");
            }
        })
    }

    /// Best-effort publish of a locally appended blob.
    ///
    /// Failure never rolls back the local append.
    pub async fn submit(&self, id: &ConversationId, blob: &CiphertextBlob) -> Result<(), FeedError> {
        self.feed.submit(id, blob).await.inspect_err(|err| {
            warn!(conversation_id = %id, error = %err, "submit failed");
        })
    }

    /// Merge fetched entries into the local log.
    ///
    /// New entries become `Peer` messages stamped with the remote timestamp,
    /// or `now_ms` when the feed has none. They are decrypted with `key` when
    /// one is usable and stay `Pending` otherwise.
    pub fn merge<S: Storage>(
        &self,
        store: &ConversationStore<S>,
        id: &ConversationId,
        entries: Vec<RemoteEntry>,
        now_ms: u64,
        key: Option<&SecretKey>,
    ) -> Result<MergeReport, LogError> {
        let fetched = entries.len();

        let fresh: Vec<Message> = store
            .retain_unknown(id, entries, |entry| &entry.encrypted)?
            .into_iter()
            .map(|entry| {
                let mut message = Message::pending(
                    entry.encrypted,
                    Sender::Peer,
                    entry.timestamp.unwrap_or(now_ms),
                );
                if let Some(key) = key {
                    message.apply_decryption(decrypt_message(&message.blob, key));
                }
                message
            })
            .collect();

        let appended = store.append_all(id, fresh)?;
        if appended > 0 {
            debug!(conversation_id = %id, fetched, appended, "merged remote messages");
        }

        Ok(MergeReport { fetched, appended })
    }

    /// Fetch and merge in one step.
    pub async fn cycle<S: Storage>(
        &self,
        store: &ConversationStore<S>,
        id: &ConversationId,
        now_ms: u64,
        key: Option<&SecretKey>,
    ) -> Result<MergeReport, SyncError> {
        let entries = self.fetch(id).await?;
        Ok(self.merge(store, id, entries, now_ms, key)?)
    }
}

/// Errors from a full sync cycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Fetching failed; nothing was merged
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// Merged in memory but the log could not be persisted
    #[error(transparent)]
    Log(#[from] LogError),
}

#[cfg(test)]
mod tests {
    use parley_crypto::{KEY_SIZE, encrypt_message};

    use super::*;
    use crate::{message::DecryptStatus, storage::MemoryStorage};

    fn entry(blob: &str, timestamp: Option<u64>) -> RemoteEntry {
        RemoteEntry { encrypted: CiphertextBlob::new(blob), timestamp }
    }

    #[test]
    fn merge_appends_only_unknown_blobs_as_peer() {
        let store = ConversationStore::new(MemoryStorage::new());
        let id = ConversationId::new("c");
        store.append(&id, Message::pending(CiphertextBlob::new("A"), Sender::Me, 1)).unwrap();

        let report = SyncEngine::new(NoFeed).merge(
            &store,
            &id,
            vec![entry("A", Some(1)), entry("B", Some(2))],
            99,
            None,
        )
        .unwrap();

        assert_eq!(report, MergeReport { fetched: 2, appended: 1 });
        let log: Vec<_> =
            store.load(&id).unwrap().into_iter().map(|m| (m.blob.to_string(), m.sender)).collect();
        assert_eq!(log, vec![("A".to_string(), Sender::Me), ("B".to_string(), Sender::Peer)]);
    }

    #[test]
    fn missing_remote_timestamp_uses_receipt_time() {
        let store = ConversationStore::new(MemoryStorage::new());
        let id = ConversationId::new("c");

        SyncEngine::new(NoFeed).merge(&store, &id, vec![entry("A", None)], 1234, None).unwrap();

        assert_eq!(store.load(&id).unwrap()[0].timestamp_ms, 1234);
    }

    #[test]
    fn merge_decrypts_with_usable_key() {
        let key = SecretKey::from_bytes([8; KEY_SIZE]);
        let blob = encrypt_message("from peer", &key, [3; 12]);
        let store = ConversationStore::new(MemoryStorage::new());
        let id = ConversationId::new("c");

        let remote = vec![RemoteEntry { encrypted: blob, timestamp: Some(5) }, entry("junk", None)];
        SyncEngine::new(NoFeed).merge(&store, &id, remote, 0, Some(&key)).unwrap();

        let messages = store.load(&id).unwrap();
        assert_eq!(messages[0].plaintext.as_deref(), Some("from peer"));
        assert_eq!(messages[1].decrypt_status, DecryptStatus::Failed);
    }

    #[test]
    fn duplicate_entries_within_one_fetch_merge_once() {
        let store = ConversationStore::new(MemoryStorage::new());
        let id = ConversationId::new("c");

        let remote = vec![entry("A", None), entry("A", None)];
        let report = SyncEngine::new(NoFeed).merge(&store, &id, remote, 0, None).unwrap();

        assert_eq!(report.appended, 1);
    }

    #[test]
    fn transient_classification() {
        assert!(FeedError::Network("reset".into()).is_transient());
        assert!(FeedError::Status { status: 503 }.is_transient());
        assert!(!FeedError::Status { status: 404 }.is_transient());
        assert!(!FeedError::Decode("eof".into()).is_transient());
    }

    /// Placeholder feed type for calling the associated `merge`.
    struct NoFeed;

    #[async_trait]
    impl RemoteFeed for NoFeed {
        async fn fetch(&self, _: &ConversationId) -> Result<Vec<RemoteEntry>, FeedError> {
            Ok(Vec::new())
        }

        async fn submit(&self, _: &ConversationId, _: &CiphertextBlob) -> Result<(), FeedError> {
            Ok(())
        }
    }
}
