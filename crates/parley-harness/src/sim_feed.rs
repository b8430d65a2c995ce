//! In-memory remote feed with fault injection.
//!
//! Behaves like the message server: `fetch` lists everything posted to a
//! conversation, oldest first, and `submit` appends. Failures are injected
//! per call so poll and retry behavior can be driven deterministically.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use parley_core::{ConversationId, Environment, FeedError, MessageCodec, RemoteEntry, RemoteFeed};
use parley_crypto::{CiphertextBlob, SecretKey};
use tracing::trace;

/// Shared feed state.
#[derive(Default)]
struct FeedState {
    conversations: HashMap<ConversationId, Vec<RemoteEntry>>,
    offline: bool,
    status: Option<u16>,
    fail_next_fetches: usize,
    fetch_delay: Option<Duration>,
    fetch_count: usize,
    submit_count: usize,
}

/// Simulated remote feed.
#[derive(Clone, Default)]
pub struct SimFeed {
    state: Arc<Mutex<FeedState>>,
}

impl SimFeed {
    /// Empty, healthy feed.
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().expect("SimFeed mutex poisoned")
    }

    /// Post a raw blob as if a peer had sent it.
    pub fn inject(&self, id: &ConversationId, blob: CiphertextBlob, timestamp: Option<u64>) {
        self.state()
            .conversations
            .entry(id.clone())
            .or_default()
            .push(RemoteEntry { encrypted: blob, timestamp });
    }

    /// Encrypt `text` under `key` and post it as a peer message.
    ///
    /// Returns the posted blob.
    pub fn peer_send<E: Environment>(
        &self,
        id: &ConversationId,
        key: &SecretKey,
        text: &str,
        env: &E,
    ) -> CiphertextBlob {
        let blob = MessageCodec::new(env.clone()).encrypt(text, key);
        self.inject(id, blob.clone(), Some(env.wall_clock_millis()));
        blob
    }

    /// Everything the feed holds for a conversation.
    pub fn entries(&self, id: &ConversationId) -> Vec<RemoteEntry> {
        self.state().conversations.get(id).cloned().unwrap_or_default()
    }

    /// Fail every call with a network error while set.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Answer every call with this HTTP status while set.
    pub fn set_status(&self, status: Option<u16>) {
        self.state().status = status;
    }

    /// Fail the next `count` fetches with a network error.
    pub fn fail_next_fetches(&self, count: usize) {
        self.state().fail_next_fetches = count;
    }

    /// Delay every fetch by `delay` (virtual time under a paused clock).
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.state().fetch_delay = delay;
    }

    /// Fetches attempted, including failed ones.
    pub fn fetch_count(&self) -> usize {
        self.state().fetch_count
    }

    /// Submits attempted, including failed ones.
    pub fn submit_count(&self) -> usize {
        self.state().submit_count
    }

    fn check_faults(state: &FeedState) -> Result<(), FeedError> {
        if state.offline {
            return Err(FeedError::Network("simulated network partition".to_string()));
        }
        if let Some(status) = state.status {
            return Err(FeedError::Status { status });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteFeed for SimFeed {
    async fn fetch(&self, id: &ConversationId) -> Result<Vec<RemoteEntry>, FeedError> {
        let delay = {
            let mut state = self.state();
            state.fetch_count += 1;
            state.fetch_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_next_fetches > 0 {
            state.fail_next_fetches -= 1;
            return Err(FeedError::Network("simulated fetch failure".to_string()));
        }
        Self::check_faults(&state)?;

        let entries = state.conversations.get(id).cloned().unwrap_or_default();
        trace!(conversation_id = %id, count = entries.len(), "sim fetch");
        Ok(entries)
    }

    async fn submit(&self, id: &ConversationId, blob: &CiphertextBlob) -> Result<(), FeedError> {
        let mut state = self.state();
        state.submit_count += 1;
        Self::check_faults(&state)?;

        state
            .conversations
            .entry(id.clone())
            .or_default()
            .push(RemoteEntry { encrypted: blob.clone(), timestamp: None });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ConversationId {
        ConversationId::new("c")
    }

    #[tokio::test]
    async fn submit_then_fetch() {
        let feed = SimFeed::new();
        feed.submit(&id(), &CiphertextBlob::new("A")).await.unwrap();
        feed.inject(&id(), CiphertextBlob::new("B"), Some(5));

        let entries = feed.fetch(&id()).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].timestamp, Some(5));
        assert_eq!(feed.fetch_count(), 1);
        assert_eq!(feed.submit_count(), 1);
    }

    #[tokio::test]
    async fn offline_fails_everything() {
        let feed = SimFeed::new();
        feed.set_offline(true);

        assert!(matches!(feed.fetch(&id()).await, Err(FeedError::Network(_))));
        assert!(matches!(
            feed.submit(&id(), &CiphertextBlob::new("A")).await,
            Err(FeedError::Network(_))
        ));
        assert!(feed.entries(&id()).is_empty(), "failed submit stores nothing");
    }

    #[tokio::test]
    async fn fail_next_fetches_recovers() {
        let feed = SimFeed::new();
        feed.fail_next_fetches(2);

        assert!(feed.fetch(&id()).await.is_err());
        assert!(feed.fetch(&id()).await.is_err());
        assert!(feed.fetch(&id()).await.is_ok());
    }

    #[tokio::test]
    async fn status_override() {
        let feed = SimFeed::new();
        feed.set_status(Some(503));

        assert_eq!(feed.fetch(&id()).await, Err(FeedError::Status { status: 503 }));
    }
}
