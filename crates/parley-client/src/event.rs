//! Change notifications published by the messenger.

use parley_core::{Conversation, ConversationId, FeedError, KeyStatus};

/// Something observable changed.
///
/// Delivered over a `tokio::sync::broadcast` channel from
/// [`crate::Messenger::subscribe`]. Events carry identifiers, not message
/// content: subscribers re-read state through the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A conversation was added to the index
    ConversationCreated {
        /// New conversation
        conversation: Conversation,
    },

    /// Key status or generation changed
    KeyStatusChanged {
        /// Affected conversation
        conversation_id: ConversationId,
        /// New status
        status: KeyStatus,
        /// New key generation
        generation: u64,
    },

    /// Messages were appended or re-decrypted
    MessagesUpdated {
        /// Affected conversation
        conversation_id: ConversationId,
    },

    /// A fetch or submit against the remote feed failed; retried next cycle
    SyncFailed {
        /// Affected conversation
        conversation_id: ConversationId,
        /// What went wrong
        error: FeedError,
    },

    /// A conversation and all its data were removed
    ConversationDeleted {
        /// Removed conversation
        conversation_id: ConversationId,
    },
}

impl SessionEvent {
    /// Conversation the event concerns.
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::ConversationCreated { conversation } => &conversation.id,
            Self::KeyStatusChanged { conversation_id, .. }
            | Self::MessagesUpdated { conversation_id }
            | Self::SyncFailed { conversation_id, .. }
            | Self::ConversationDeleted { conversation_id } => conversation_id,
        }
    }
}
