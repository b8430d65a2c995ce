//! Messenger facade.
//!
//! One [`Messenger`] per process. It owns the shared storage, environment,
//! remote feed and message store, hands out [`ConversationSession`]s and
//! publishes [`SessionEvent`]s to subscribers.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak, atomic::AtomicBool},
};

use parley_core::{
    Conversation, ConversationId, ConversationIndex, ConversationStore, Environment, KeyManager,
    MessageCodec, RemoteFeed, Storage, SyncEngine,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    config::MessengerConfig,
    error::SessionError,
    event::SessionEvent,
    session::{ConversationSession, SessionCore, SessionHandle},
};

/// Entry point for conversations.
pub struct Messenger<S: Storage, E: Environment, F: RemoteFeed> {
    storage: S,
    env: E,
    sync: Arc<SyncEngine<F>>,
    store: ConversationStore<S>,
    index: ConversationIndex<S>,
    events: broadcast::Sender<SessionEvent>,
    config: MessengerConfig,
    // Serializes read-modify-write of the index
    index_lock: Mutex<()>,
    // Live session per conversation
    sessions: Mutex<HashMap<ConversationId, Weak<SessionHandle<S, E, F>>>>,
    // Serializes open and delete
    lifecycle: tokio::sync::Mutex<()>,
}

impl<S: Storage, E: Environment, F: RemoteFeed> Messenger<S, E, F> {
    /// Messenger over `storage`, syncing against `feed`.
    pub fn new(storage: S, env: E, feed: F, config: MessengerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            store: ConversationStore::new(storage.clone()),
            index: ConversationIndex::new(storage.clone()),
            storage,
            env,
            sync: Arc::new(SyncEngine::new(feed)),
            events,
            config,
            index_lock: Mutex::new(()),
            sessions: Mutex::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Runtime settings.
    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// All known conversations in creation order.
    pub fn conversations(&self) -> Result<Vec<Conversation>, SessionError> {
        Ok(self.index.list()?)
    }

    /// Whether a shared key is persisted for a conversation.
    pub fn has_shared_key(&self, id: &ConversationId) -> Result<bool, SessionError> {
        Ok(self.index.has_shared_key(id)?)
    }

    /// Add a conversation to the index.
    ///
    /// # Errors
    ///
    /// - `Index(EmptyName)` if `name` is blank
    pub fn create_conversation(&self, name: &str) -> Result<Conversation, SessionError> {
        let conversation = {
            let _guard = lock(&self.index_lock);
            self.index.create(name, &self.env)?
        };

        info!(conversation_id = %conversation.id, "conversation created");
        let _ = self
            .events
            .send(SessionEvent::ConversationCreated { conversation: conversation.clone() });

        Ok(conversation)
    }

    /// Open a conversation.
    ///
    /// Resolves the key, loads and decrypts the log, runs one sync cycle and
    /// starts polling. A failed initial sync is not an error. If the
    /// conversation is already open, returns another handle to that session.
    ///
    /// # Errors
    ///
    /// - `Key(Persistence)` or `Persistence` if stored state cannot be read
    pub async fn open(
        &self,
        id: &ConversationId,
    ) -> Result<ConversationSession<S, E, F>, SessionError> {
        let _guard = self.lifecycle.lock().await;

        let live = lock(&self.sessions).get(id).and_then(Weak::upgrade);
        if let Some(handle) = live.filter(|handle| handle.is_active()) {
            debug!(conversation_id = %id, "conversation already open");
            return Ok(ConversationSession::attach(handle));
        }

        let core = SessionCore {
            id: id.clone(),
            keys: tokio::sync::Mutex::new(KeyManager::new(id.clone(), self.storage.clone())),
            store: self.store.clone(),
            codec: MessageCodec::new(self.env.clone()),
            sync: Arc::clone(&self.sync),
            env: self.env.clone(),
            events: self.events.clone(),
            active: AtomicBool::new(true),
        };
        let session = ConversationSession::open(core, self.config.poll_interval).await?;

        let mut sessions = lock(&self.sessions);
        sessions.retain(|_, handle| handle.strong_count() > 0);
        sessions.insert(id.clone(), Arc::downgrade(session.handle()));

        Ok(session)
    }

    /// Delete a conversation with its key and messages.
    ///
    /// An open session becomes inactive: its in-flight fetches are
    /// discarded and further operations fail with `Inactive`. Waits for any
    /// key change, send or merge already under way, so nothing is written
    /// back after the cascade. Returns whether the conversation was indexed.
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, SessionError> {
        let _guard = self.lifecycle.lock().await;

        let live = lock(&self.sessions).remove(id).as_ref().and_then(Weak::upgrade);
        if let Some(handle) = live {
            handle.shut_down().await;
        }

        self.store.evict(id);
        let existed = {
            let _index = lock(&self.index_lock);
            self.index.remove(id)?
        };

        info!(conversation_id = %id, existed, "conversation deleted");
        let _ = self.events.send(SessionEvent::ConversationDeleted { conversation_id: id.clone() });

        Ok(existed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
