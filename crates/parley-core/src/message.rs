//! Messages and the in-memory conversation log.
//!
//! A message's ciphertext blob is its identity: the log never holds two
//! messages with the same blob. Plaintext and decrypt status are derived from
//! the active key and are never persisted.

use std::collections::HashSet;

use parley_crypto::{CiphertextBlob, CryptoError};
use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Sent from this device
    Me,
    /// Received through the remote feed
    Peer,
}

/// Outcome of decrypting a message under the active key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecryptStatus {
    /// Decrypted and authenticated
    Ok,
    /// Authentication failed or the blob is malformed
    Failed,
    /// Not attempted yet, or no usable key
    Pending,
}

/// A message as presented to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Immutable ciphertext, also the dedup identity
    pub blob: CiphertextBlob,
    /// Author
    pub sender: Sender,
    /// Epoch milliseconds. Informational, never used for ordering.
    pub timestamp_ms: u64,
    /// Decrypted text when `decrypt_status` is `Ok`
    pub plaintext: Option<String>,
    /// Result of the most recent decryption attempt
    pub decrypt_status: DecryptStatus,
}

impl Message {
    /// Message that has not been decrypted yet.
    pub fn pending(blob: CiphertextBlob, sender: Sender, timestamp_ms: u64) -> Self {
        Self { blob, sender, timestamp_ms, plaintext: None, decrypt_status: DecryptStatus::Pending }
    }

    /// Own message whose plaintext is already known.
    pub fn sent(blob: CiphertextBlob, plaintext: String, timestamp_ms: u64) -> Self {
        Self {
            blob,
            sender: Sender::Me,
            timestamp_ms,
            plaintext: Some(plaintext),
            decrypt_status: DecryptStatus::Ok,
        }
    }

    /// Record the result of a decryption attempt.
    pub fn apply_decryption(&mut self, result: Result<String, CryptoError>) {
        match result {
            Ok(plaintext) => {
                self.plaintext = Some(plaintext);
                self.decrypt_status = DecryptStatus::Ok;
            },
            Err(_) => {
                self.plaintext = None;
                self.decrypt_status = DecryptStatus::Failed;
            },
        }
    }

    /// Forget derived plaintext.
    pub fn reset_decryption(&mut self) {
        self.plaintext = None;
        self.decrypt_status = DecryptStatus::Pending;
    }
}

/// Persisted form of a message: `{encrypted, sender, timestamp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Ciphertext blob
    pub encrypted: CiphertextBlob,
    /// Author
    pub sender: Sender,
    /// Epoch milliseconds
    pub timestamp: u64,
}

impl StoredMessage {
    /// Create a stored message.
    pub fn new(encrypted: impl Into<String>, sender: Sender, timestamp: u64) -> Self {
        Self { encrypted: CiphertextBlob::new(encrypted), sender, timestamp }
    }
}

impl From<&Message> for StoredMessage {
    fn from(message: &Message) -> Self {
        Self {
            encrypted: message.blob.clone(),
            sender: message.sender,
            timestamp: message.timestamp_ms,
        }
    }
}

/// Ordered, append-only message log with blob dedup.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
    blobs: HashSet<CiphertextBlob>,
}

impl ConversationLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted entries.
    ///
    /// All messages start `Pending`. Duplicate blobs in the persisted data
    /// keep their first occurrence.
    pub fn from_stored(stored: Vec<StoredMessage>) -> Self {
        let mut log = Self::new();
        for entry in stored {
            log.push(Message::pending(entry.encrypted, entry.sender, entry.timestamp));
        }
        log
    }

    /// Append unless a message with the same blob exists.
    ///
    /// Returns whether the message was appended.
    pub fn push(&mut self, message: Message) -> bool {
        if !self.blobs.insert(message.blob.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Whether a message with this blob is in the log.
    pub fn contains(&self, blob: &CiphertextBlob) -> bool {
        self.blobs.contains(blob)
    }

    /// Messages in log order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Mutable access to every message, for re-deriving plaintext.
    ///
    /// Blobs must not be changed through this.
    pub fn messages_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.messages.iter_mut()
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Persisted form, in log order.
    pub fn to_stored(&self) -> Vec<StoredMessage> {
        self.messages.iter().map(StoredMessage::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(text: &str) -> CiphertextBlob {
        CiphertextBlob::new(text)
    }

    #[test]
    fn duplicate_blob_is_not_appended() {
        let mut log = ConversationLog::new();

        assert!(log.push(Message::pending(blob("a"), Sender::Me, 1)));
        assert!(!log.push(Message::pending(blob("a"), Sender::Peer, 2)));

        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].sender, Sender::Me, "first occurrence wins");
    }

    #[test]
    fn insertion_order_not_timestamp_order() {
        let mut log = ConversationLog::new();
        log.push(Message::pending(blob("late"), Sender::Peer, 900));
        log.push(Message::pending(blob("early"), Sender::Peer, 100));

        let order: Vec<_> = log.messages().iter().map(|m| m.blob.as_str()).collect();
        assert_eq!(order, ["late", "early"]);
    }

    #[test]
    fn from_stored_drops_duplicates_and_starts_pending() {
        let log = ConversationLog::from_stored(vec![
            StoredMessage::new("a", Sender::Me, 1),
            StoredMessage::new("b", Sender::Peer, 2),
            StoredMessage::new("a", Sender::Peer, 3),
        ]);

        assert_eq!(log.len(), 2);
        assert!(log.messages().iter().all(|m| m.decrypt_status == DecryptStatus::Pending));
        assert_eq!(log.to_stored(), vec![
            StoredMessage::new("a", Sender::Me, 1),
            StoredMessage::new("b", Sender::Peer, 2),
        ]);
    }

    #[test]
    fn stored_form_never_contains_plaintext() {
        let mut log = ConversationLog::new();
        log.push(Message::sent(blob("a"), "hello".to_string(), 5));

        assert_eq!(log.to_stored(), vec![StoredMessage::new("a", Sender::Me, 5)]);
    }

    #[test]
    fn failed_decryption_clears_plaintext() {
        let mut message = Message::sent(blob("a"), "hello".to_string(), 5);
        message.apply_decryption(Err(CryptoError::DecryptionFailed {
            reason: "authentication failed".to_string(),
        }));

        assert_eq!(message.decrypt_status, DecryptStatus::Failed);
        assert_eq!(message.plaintext, None);
    }

    #[test]
    fn sender_serializes_lowercase() {
        let mut bytes = Vec::new();
        ciborium::into_writer(&Sender::Me, &mut bytes).unwrap();
        let text: String = ciborium::from_reader(bytes.as_slice()).unwrap();

        assert_eq!(text, "me");
    }
}
