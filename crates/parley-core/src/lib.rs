//! Parley Core
//!
//! Sans-IO state machines for a pairwise encrypted chat that shares one
//! symmetric key per conversation. No async runtime and no network I/O live
//! here; the client crate drives these components.
//!
//! # Components
//!
//! ```text
//!              ┌────────────┐ usable key ┌──────────────┐
//!              │ KeyManager │───────────▶│ MessageCodec │
//!              └────────────┘            └──────┬───────┘
//!                                               │ blobs
//!   RemoteFeed ──fetch──▶ SyncEngine ──merge──▶ ConversationStore ──▶ Storage
//! ```
//!
//! - [`KeyManager`]: key provenance, status and generation per conversation
//! - [`MessageCodec`]: AES-256-GCM blobs with environment-supplied nonces
//! - [`ConversationStore`]: append-only logs deduplicated by blob
//! - [`SyncEngine`]: merges a [`RemoteFeed`] into the local log
//! - [`ConversationIndex`]: the persisted conversation list and its cascading
//!   deletion
//!
//! Each conversation's key, log and generation are independent. Nothing is
//! shared across conversations except the storage backend.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod conversation;
pub mod env;
pub mod keys;
pub mod log_store;
pub mod message;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod test_env;

pub use codec::MessageCodec;
pub use conversation::{Conversation, ConversationId, ConversationIndex, IndexError};
pub use env::Environment;
pub use keys::{KeyError, KeyManager, KeyStatus, Resolution};
pub use log_store::{ConversationStore, DecryptBatch, LogError};
pub use message::{ConversationLog, DecryptStatus, Message, Sender, StoredMessage};
pub use storage::{
    ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError, StorageKey,
};
pub use sync::{FeedError, MergeReport, RemoteEntry, RemoteFeed, SyncEngine, SyncError};
