//! Per-conversation message logs with write-through persistence.
//!
//! # Invariants
//!
//! - A log never holds two messages with the same blob
//! - Log order is append order
//! - Each append is atomic: read, dedup check and write-through happen under
//!   the conversation's lock, so concurrent appends from send and sync commute
//! - Only `{encrypted, sender, timestamp}` is persisted; plaintext is always
//!   re-derived
//!
//! A failed write leaves the in-memory append applied. The whole log is
//! written on every mutation, so the next successful write repairs storage.

#![allow(clippy::disallowed_types, reason = "Short synchronous critical sections only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use parley_crypto::{CiphertextBlob, CryptoError, SecretKey, decrypt_message};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    conversation::ConversationId,
    message::{ConversationLog, Message},
    storage::{Storage, StorageError},
};

/// Errors from message log operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// Log could not be read or written. In-memory state is still applied.
    #[error("message log persistence failed: {0}")]
    Persistence(#[from] StorageError),
}

/// Decryption results for a snapshot of a log, tagged with the key generation
/// they were computed under.
#[derive(Debug)]
pub struct DecryptBatch {
    generation: u64,
    results: HashMap<CiphertextBlob, Result<String, CryptoError>>,
}

impl DecryptBatch {
    /// Decrypt every blob under `key`. Pure and CPU-bound.
    pub fn run(generation: u64, key: &SecretKey, blobs: Vec<CiphertextBlob>) -> Self {
        let results = blobs
            .into_iter()
            .map(|blob| {
                let result = decrypt_message(&blob, key);
                (blob, result)
            })
            .collect();

        Self { generation, results }
    }

    /// Generation the batch was computed under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of blobs that failed to decrypt.
    pub fn failures(&self) -> usize {
        self.results.values().filter(|r| r.is_err()).count()
    }
}

/// Owner of all loaded conversation logs.
///
/// Clone is cheap; clones share the same logs.
#[derive(Clone)]
pub struct ConversationStore<S: Storage> {
    storage: S,
    logs: Arc<Mutex<HashMap<ConversationId, Arc<Mutex<ConversationLog>>>>>,
}

impl<S: Storage> ConversationStore<S> {
    /// Store over the given storage. Nothing is loaded until first use.
    pub fn new(storage: S) -> Self {
        Self { storage, logs: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Messages of a conversation, loading the persisted log on first use.
    ///
    /// A conversation with no persisted log is empty.
    pub fn load(&self, id: &ConversationId) -> Result<Vec<Message>, LogError> {
        let log = self.handle(id)?;
        let messages = lock(&log).messages().to_vec();
        Ok(messages)
    }

    /// Append a message unless its blob is already in the log.
    ///
    /// Returns whether the message was appended.
    ///
    /// # Errors
    ///
    /// - `Persistence` if the log cannot be loaded (nothing appended) or
    ///   written (message appended in memory)
    pub fn append(&self, id: &ConversationId, message: Message) -> Result<bool, LogError> {
        Ok(self.append_all(id, [message])? == 1)
    }

    /// Append several messages in order as one atomic unit.
    ///
    /// Returns how many were new. Storage is written once, and only if
    /// something was appended.
    pub fn append_all(
        &self,
        id: &ConversationId,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<usize, LogError> {
        let log = self.handle(id)?;
        let mut log = lock(&log);

        let appended = messages.into_iter().map(|m| log.push(m)).filter(|&pushed| pushed).count();
        if appended > 0 {
            self.write_through(id, &log)?;
        }

        Ok(appended)
    }

    /// Write the current log to storage.
    pub fn persist(&self, id: &ConversationId) -> Result<(), LogError> {
        let log = self.handle(id)?;
        let log = lock(&log);
        self.write_through(id, &log)
    }

    /// Blobs of the conversation in log order, for a decrypt-all snapshot.
    pub fn blobs(&self, id: &ConversationId) -> Result<Vec<CiphertextBlob>, LogError> {
        let log = self.handle(id)?;
        let blobs = lock(&log).messages().iter().map(|m| m.blob.clone()).collect();
        Ok(blobs)
    }

    /// Apply a decrypt-all batch if it is still current.
    ///
    /// Returns false, changing nothing, when `batch` was computed under an
    /// older generation than `current_generation` or the conversation is not
    /// loaded. Messages appended after the snapshot are not in the batch and
    /// keep the status they were appended with.
    pub fn apply_decrypted(
        &self,
        id: &ConversationId,
        current_generation: u64,
        mut batch: DecryptBatch,
    ) -> bool {
        if batch.generation != current_generation {
            debug!(
                conversation_id = %id,
                batch_generation = batch.generation,
                current_generation,
                "discarding stale decrypt batch"
            );
            return false;
        }

        let Some(log) = lock(&self.logs).get(id).cloned() else {
            return false;
        };

        let mut log = lock(&log);
        for message in log.messages_mut() {
            if let Some(result) = batch.results.remove(&message.blob) {
                message.apply_decryption(result);
            }
        }

        true
    }

    /// Forget all derived plaintext of a conversation.
    ///
    /// Used when no usable key remains.
    pub fn reset_decryption(&self, id: &ConversationId) {
        if let Some(log) = lock(&self.logs).get(id).cloned() {
            lock(&log).messages_mut().for_each(Message::reset_decryption);
        }
    }

    /// Keep the items whose blob is not in the log yet.
    ///
    /// One lock and a set lookup per item, however long the log is.
    pub fn retain_unknown<T>(
        &self,
        id: &ConversationId,
        mut items: Vec<T>,
        blob: impl Fn(&T) -> &CiphertextBlob,
    ) -> Result<Vec<T>, LogError> {
        let log = self.handle(id)?;
        let log = lock(&log);
        items.retain(|item| !log.contains(blob(item)));
        Ok(items)
    }

    /// Drop a conversation's log from memory. Storage is untouched; the next
    /// use reloads it.
    pub fn evict(&self, id: &ConversationId) {
        lock(&self.logs).remove(id);
    }

    fn handle(&self, id: &ConversationId) -> Result<Arc<Mutex<ConversationLog>>, LogError> {
        let mut logs = lock(&self.logs);
        if let Some(log) = logs.get(id) {
            return Ok(Arc::clone(log));
        }

        let stored = self.storage.load_log(id)?.unwrap_or_default();
        let log = Arc::new(Mutex::new(ConversationLog::from_stored(stored)));
        logs.insert(id.clone(), Arc::clone(&log));
        Ok(log)
    }

    fn write_through(&self, id: &ConversationId, log: &ConversationLog) -> Result<(), LogError> {
        self.storage.store_log(id, &log.to_stored()).map_err(|err| {
            warn!(conversation_id = %id, error = %err, "message log write failed");
            LogError::Persistence(err)
        })
    }
}

/// Lock, recovering from poisoning. Every critical section leaves the data
/// consistent, so a panic elsewhere does not invalidate it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
