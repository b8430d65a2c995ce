//! Client
//!
//! Async runtime glue for Parley. Wires the sans-IO core to tokio, a remote
//! feed and persistent storage.
//!
//! # Components
//!
//! - [`Messenger`]: Conversation list, session factory and event bus
//! - [`ConversationSession`]: One open conversation with its poll task
//! - [`SessionEvent`]: Change notifications for a UI or CLI
//! - [`HttpFeed`]: `RemoteFeed` over the relay's HTTP API
//! - [`SystemEnv`]: Production environment (OS clock and CSPRNG)
//!
//! # Concurrency
//!
//! ```text
//! ┌──────────────┐ open  ┌─────────────────────┐  tick  ┌────────────┐
//! │  Messenger   │──────►│ ConversationSession │◄───────│ poll task  │
//! └──────┬───────┘       └──────────┬──────────┘        └────────────┘
//!        │ events                   │ keys lock
//!        ▼                          ▼
//!   subscribers          KeyManager + ConversationStore
//! ```
//!
//! KDF and decrypt-all work runs on `spawn_blocking`. Network I/O never holds
//! the key lock.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod error;
mod event;
mod http_feed;
mod messenger;
mod session;
mod system_env;

pub use config::{DEFAULT_EVENT_CAPACITY, DEFAULT_POLL_INTERVAL, MessengerConfig};
pub use error::SessionError;
pub use event::SessionEvent;
pub use http_feed::{DEFAULT_SERVER_URL, HttpFeed};
pub use messenger::Messenger;
pub use session::ConversationSession;
pub use system_env::SystemEnv;
