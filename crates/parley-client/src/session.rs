//! An open conversation.
//!
//! A [`ConversationSession`] composes the key manager, the message codec, the
//! shared message store and the sync engine for one conversation, and owns
//! that conversation's poll task. The messenger keeps at most one live
//! session per conversation; opening it again returns another handle to the
//! same session, so every caller sees one key manager.
//!
//! # Serialization
//!
//! The key manager sits behind an async mutex. Every operation that reads the
//! active key and writes the log (send, merge, applying a decrypt batch) holds
//! it for the whole step, so a message is never encrypted or decrypted under
//! one key and recorded under another. Network I/O and KDF work happen
//! outside the lock.
//!
//! Writes re-check that the session is active after taking the lock. Closing
//! flips the flag first and then waits for the lock, so once a close has
//! waited nothing further reaches storage.
//!
//! Decrypt-all snapshots `(generation, key, blobs)`, decrypts on a blocking
//! worker, and applies the results only if the generation is unchanged.
//! Results from a superseded key are dropped.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parley_core::{
    ConversationId, ConversationStore, DecryptBatch, Environment, KeyError, KeyManager,
    KeyStatus, MergeReport, Message, MessageCodec, RemoteFeed, Resolution, Storage, SyncEngine,
};
use parley_crypto::KeyMaterial;
use tokio::{
    sync::{Mutex, MutexGuard, broadcast},
    task::AbortHandle,
    time::{Instant, interval_at},
};
use tracing::{debug, info, warn};

use crate::{error::SessionError, event::SessionEvent};

/// State shared between a session and its poll task.
pub(crate) struct SessionCore<S: Storage, E: Environment, F: RemoteFeed> {
    pub(crate) id: ConversationId,
    pub(crate) keys: Mutex<KeyManager<S>>,
    pub(crate) store: ConversationStore<S>,
    pub(crate) codec: MessageCodec<E>,
    pub(crate) sync: Arc<SyncEngine<F>>,
    pub(crate) env: E,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) active: AtomicBool,
}

impl<S: Storage, E: Environment, F: RemoteFeed> SessionCore<S, E, F> {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.is_active() { Ok(()) } else { Err(SessionError::Inactive) }
    }

    /// Lock the key manager for a write. Fails once the session is closed.
    async fn lock_keys(&self) -> Result<MutexGuard<'_, KeyManager<S>>, SessionError> {
        let keys = self.keys.lock().await;
        self.ensure_active()?;
        Ok(keys)
    }

    /// Mark the session inactive. Returns whether it was active.
    fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_messages_updated(&self) {
        self.emit(SessionEvent::MessagesUpdated { conversation_id: self.id.clone() });
    }

    fn emit_key_status(&self, keys: &KeyManager<S>) {
        self.emit(SessionEvent::KeyStatusChanged {
            conversation_id: self.id.clone(),
            status: keys.status(),
            generation: keys.generation(),
        });
    }

    /// Resolve the key: persisted key if any, otherwise the fallback derived
    /// on a blocking worker.
    pub(crate) async fn resolve_key(&self) -> Result<(), SessionError> {
        let mut keys = self.keys.lock().await;

        match keys.load_persisted() {
            Ok(Resolution::Resolved(_)) => {},
            Ok(Resolution::NeedsFallback) => {
                let id = self.id.clone();
                let material =
                    tokio::task::spawn_blocking(move || KeyMaterial::fallback_for(id.as_str()))
                        .await?;
                keys.adopt(material);
            },
            // Malformed persisted key: the session runs with status Invalid
            Err(KeyError::InvalidKeyFormat { .. }) => {},
            Err(err) => return Err(err.into()),
        }

        if keys.status() == KeyStatus::Derived {
            warn!(
                conversation_id = %self.id,
                "using insecure fallback key; exchange a shared key with the peer"
            );
        }
        self.emit_key_status(&keys);
        Ok(())
    }

    /// Re-derive every message's plaintext under the current key.
    ///
    /// Returns whether the results were applied.
    pub(crate) async fn decrypt_all(&self) -> Result<bool, SessionError> {
        let (generation, key, blobs) = {
            let keys = self.keys.lock().await;
            if !self.is_active() {
                return Ok(false);
            }
            let Some(key) = keys.usable_key() else {
                return Ok(false);
            };
            (keys.generation(), key.clone(), self.store.blobs(&self.id)?)
        };

        let batch =
            tokio::task::spawn_blocking(move || DecryptBatch::run(generation, &key, blobs)).await?;
        let failures = batch.failures();

        let applied = {
            let keys = self.keys.lock().await;
            self.store.apply_decrypted(&self.id, keys.generation(), batch)
        };

        if applied {
            debug!(conversation_id = %self.id, generation, failures, "decrypt-all applied");
            self.emit_messages_updated();
        }
        Ok(applied)
    }

    /// One fetch-and-merge cycle.
    ///
    /// Fetch failures are reported as `SyncFailed` events. Results that
    /// arrive after the session became inactive are discarded.
    pub(crate) async fn sync_cycle(&self) -> Result<MergeReport, SessionError> {
        let started = self.env.now();

        let entries = match self.sync.fetch(&self.id).await {
            Ok(entries) => entries,
            Err(error) => {
                self.emit(SessionEvent::SyncFailed {
                    conversation_id: self.id.clone(),
                    error: error.clone(),
                });
                return Err(error.into());
            },
        };

        let result = {
            let keys = self.lock_keys().await.inspect_err(|_| {
                debug!(conversation_id = %self.id, "discarding fetch for inactive conversation");
            })?;
            let now_ms = self.env.wall_clock_millis();
            self.sync.merge(&self.store, &self.id, entries, now_ms, keys.usable_key())
        };

        let elapsed_ms = (self.env.now() - started).as_millis() as u64;
        match result {
            Ok(report) => {
                debug!(
                    conversation_id = %self.id,
                    fetched = report.fetched,
                    appended = report.appended,
                    elapsed_ms,
                    "sync cycle complete"
                );
                if report.appended > 0 {
                    self.emit_messages_updated();
                }
                Ok(report)
            },
            Err(err) => {
                // Merged in memory regardless
                self.emit_messages_updated();
                Err(err.into())
            },
        }
    }

    /// Finish a key change made under `keys`: publish the new status and,
    /// if the key changed, re-decrypt.
    ///
    /// An `Invalid` key leaves nothing to decrypt with, so plaintext derived
    /// under the previous key is dropped.
    async fn finish_key_change(
        &self,
        keys: MutexGuard<'_, KeyManager<S>>,
        generation_before: u64,
        result: Result<KeyStatus, KeyError>,
    ) -> Result<KeyStatus, SessionError> {
        let changed = keys.generation() != generation_before;
        let invalid = keys.status() == KeyStatus::Invalid;
        if invalid {
            self.store.reset_decryption(&self.id);
        }
        self.emit_key_status(&keys);
        drop(keys);

        if invalid {
            self.emit_messages_updated();
        } else if changed {
            self.decrypt_all().await?;
        }

        result.map_err(SessionError::from)
    }

    /// Install key material derived elsewhere.
    async fn install(&self, material: KeyMaterial) -> Result<KeyStatus, SessionError> {
        let mut keys = self.lock_keys().await?;
        let before = keys.generation();
        let result = keys.install(material);
        self.finish_key_change(keys, before, result).await
    }
}

/// Aborts the poll ticker when dropped.
struct PollHandle {
    abort: AbortHandle,
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Start the fixed-interval poll ticker.
///
/// Every tick spawns an independent cycle, so a slow fetch never delays the
/// next tick. The ticker holds only a weak reference and stops once the
/// session is gone or inactive.
fn spawn_poller<S: Storage, E: Environment, F: RemoteFeed>(
    core: &Arc<SessionCore<S, E, F>>,
    period: Duration,
) -> PollHandle {
    let weak: Weak<SessionCore<S, E, F>> = Arc::downgrade(core);

    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;

            let Some(core) = weak.upgrade() else { break };
            if !core.is_active() {
                break;
            }

            tokio::spawn(async move {
                // Failures are reported as events and retried next tick
                let _ = core.sync_cycle().await;
            });
        }
    });

    PollHandle { abort: handle.abort_handle() }
}

/// One live session: the shared core plus its poll task.
///
/// Every [`ConversationSession`] for a conversation points at the same
/// handle. Dropping the last one closes the session.
pub(crate) struct SessionHandle<S: Storage, E: Environment, F: RemoteFeed> {
    core: Arc<SessionCore<S, E, F>>,
    poller: std::sync::Mutex<Option<PollHandle>>,
}

impl<S: Storage, E: Environment, F: RemoteFeed> SessionHandle<S, E, F> {
    pub(crate) fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// Mark inactive, stop polling, flush and drop the cached log.
    pub(crate) fn close(&self) {
        let was_active = self.core.deactivate();
        let poller = self.poller.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        drop(poller);

        // A later session for the same conversation owns the cache now
        if !was_active {
            return;
        }

        let id = &self.core.id;
        // Retries a write that failed earlier; the cached copy goes away next
        if let Err(err) = self.core.store.persist(id) {
            warn!(conversation_id = %id, error = %err, "log not flushed on close");
        }
        self.core.store.evict(id);
        info!(conversation_id = %id, "conversation closed");
    }

    /// Close, then wait until no operation holds the key lock.
    ///
    /// Once this returns no write from this session reaches storage.
    pub(crate) async fn shut_down(&self) {
        self.close();
        drop(self.core.keys.lock().await);
    }
}

impl<S: Storage, E: Environment, F: RemoteFeed> Drop for SessionHandle<S, E, F> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle to an open conversation.
///
/// Handles for the same conversation share one session. Dropping the last
/// handle closes it.
pub struct ConversationSession<S: Storage, E: Environment, F: RemoteFeed> {
    handle: Arc<SessionHandle<S, E, F>>,
}

impl<S: Storage, E: Environment, F: RemoteFeed> ConversationSession<S, E, F> {
    /// Resolve the key, load the log, decrypt it, run one sync cycle and
    /// start polling.
    pub(crate) async fn open(
        core: SessionCore<S, E, F>,
        poll_interval: Duration,
    ) -> Result<Self, SessionError> {
        // Dropped on failure, which closes it
        let handle = SessionHandle { core: Arc::new(core), poller: std::sync::Mutex::new(None) };
        let core = &handle.core;

        core.resolve_key().await?;
        core.store.load(&core.id)?;
        core.decrypt_all().await?;

        if let Err(err) = core.sync_cycle().await {
            debug!(conversation_id = %core.id, error = %err, "initial sync failed");
        }

        let poller = spawn_poller(core, poll_interval);
        *handle.poller.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(poller);
        info!(conversation_id = %core.id, "conversation opened");

        Ok(Self { handle: Arc::new(handle) })
    }

    /// Another handle to an already open session.
    pub(crate) fn attach(handle: Arc<SessionHandle<S, E, F>>) -> Self {
        Self { handle }
    }

    pub(crate) fn handle(&self) -> &Arc<SessionHandle<S, E, F>> {
        &self.handle
    }

    fn core(&self) -> &SessionCore<S, E, F> {
        &self.handle.core
    }

    /// Conversation this session belongs to.
    pub fn conversation_id(&self) -> &ConversationId {
        &self.core().id
    }

    /// Whether the session is still open.
    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Encrypt, append locally and submit to the feed.
    ///
    /// The local append happens first and is never rolled back. Submit
    /// failures are reported as `SyncFailed` events; the next poll cycle
    /// does not retry them.
    ///
    /// # Errors
    ///
    /// - `Inactive` once the session is closed or its conversation deleted
    /// - `EmptyMessage` if `text` is blank
    /// - `KeyUnavailable` while the key status is `Invalid` or `Loading`
    /// - `Persistence` if the log write fails (message kept in memory and
    ///   still submitted)
    pub async fn send(&self, text: &str) -> Result<Message, SessionError> {
        let core = self.core();
        core.ensure_active()?;
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let (message, appended) = {
            let keys = core.lock_keys().await?;
            let Some(key) = keys.usable_key() else {
                return Err(SessionError::KeyUnavailable { status: keys.status() });
            };

            let blob = core.codec.encrypt(text, key);
            let message = Message::sent(blob, text.to_string(), core.env.wall_clock_millis());
            let appended = core.store.append(&core.id, message.clone());
            (message, appended)
        };
        core.emit_messages_updated();

        if let Err(error) = core.sync.submit(&core.id, &message.blob).await {
            core.emit(SessionEvent::SyncFailed { conversation_id: core.id.clone(), error });
        }

        appended?;
        Ok(message)
    }

    /// Messages in log order with their current decrypt state.
    pub fn messages(&self) -> Result<Vec<Message>, SessionError> {
        Ok(self.core().store.load(&self.core().id)?)
    }

    /// Current key status.
    pub async fn key_status(&self) -> KeyStatus {
        self.core().keys.lock().await.status()
    }

    /// Current key generation.
    pub async fn generation(&self) -> u64 {
        self.core().keys.lock().await.generation()
    }

    /// Replace the key with a fresh random one.
    pub async fn generate_random_key(&self) -> Result<KeyStatus, SessionError> {
        let core = self.core();

        let mut keys = core.lock_keys().await?;
        let before = keys.generation();
        let result = keys.generate_random_key(&core.env);
        core.finish_key_change(keys, before, result).await
    }

    /// Replace the key with one derived from `passphrase`.
    ///
    /// # Errors
    ///
    /// - `Key(WeakPassphrase)` if the passphrase is shorter than 12
    ///   characters. Nothing changes.
    /// - `Inactive` if the session closed, even while the derivation ran
    pub async fn derive_from_passphrase(&self, passphrase: &str) -> Result<KeyStatus, SessionError> {
        self.core().ensure_active()?;

        let passphrase = passphrase.to_string();
        let derived =
            tokio::task::spawn_blocking(move || KeyMaterial::from_passphrase(&passphrase)).await?;
        let material = derived.map_err(KeyError::from)?;

        self.core().install(material).await
    }

    /// Replace the key with a pasted base64 key.
    ///
    /// # Errors
    ///
    /// - `Key(InvalidKeyFormat)` if the text is not 32 bytes of base64.
    ///   Status becomes `Invalid`, decrypted plaintext is dropped and
    ///   sending is refused until the next successful key change.
    pub async fn import_key(&self, encoded: &str) -> Result<KeyStatus, SessionError> {
        let core = self.core();

        let mut keys = core.lock_keys().await?;
        let before = keys.generation();
        let result = keys.import_key(encoded);
        core.finish_key_change(keys, before, result).await
    }

    /// Export the usable key as base64 for handing to the peer.
    pub async fn export_key(&self) -> Option<String> {
        self.core().keys.lock().await.export_key()
    }

    /// Drop the shared key and return to the insecure fallback.
    pub async fn clear_key(&self) -> Result<KeyStatus, SessionError> {
        self.core().ensure_active()?;

        let id = self.core().id.clone();
        let material =
            tokio::task::spawn_blocking(move || KeyMaterial::fallback_for(id.as_str())).await?;

        self.core().install(material).await
    }

    /// Re-derive all plaintext under the current key.
    ///
    /// Returns false if there is no usable key or a key change overtook it.
    pub async fn decrypt_all(&self) -> Result<bool, SessionError> {
        self.core().ensure_active()?;
        self.core().decrypt_all().await
    }

    /// Run one sync cycle now, outside the poll schedule.
    pub async fn sync_now(&self) -> Result<MergeReport, SessionError> {
        self.core().ensure_active()?;
        self.core().sync_cycle().await
    }

    /// Stop polling and mark the session inactive for every handle.
    ///
    /// In-flight fetches complete but their results are discarded. The
    /// cached log is dropped; opening the conversation again reloads it.
    pub fn close(&self) {
        self.handle.close();
    }
}
