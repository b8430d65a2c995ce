//! Session error types.

use parley_core::{FeedError, IndexError, KeyError, KeyStatus, LogError};
use thiserror::Error;

/// Errors surfaced by [`crate::Messenger`] and [`crate::ConversationSession`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A key change was rejected or could not be persisted
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The message log could not be read or written. In-memory state is
    /// still applied.
    #[error(transparent)]
    Persistence(#[from] LogError),

    /// The conversation index could not be read or written
    #[error(transparent)]
    Index(#[from] IndexError),

    /// A sync cycle requested directly by the caller failed
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// Sending needs a usable key
    #[error("no usable key (status {status:?})")]
    KeyUnavailable {
        /// Key status at the time of the attempt
        status: KeyStatus,
    },

    /// Message text is empty
    #[error("message must not be empty")]
    EmptyMessage,

    /// The session was closed or its conversation deleted
    #[error("conversation session is no longer active")]
    Inactive,

    /// A blocking worker task panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(String),
}

impl SessionError {
    /// Returns true if the error means data may not have reached storage.
    ///
    /// The operation still took effect for the running session.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_)
                | Self::Key(KeyError::Persistence(_))
                | Self::Index(IndexError::Persistence(_))
        )
    }
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use parley_core::StorageError;

    use super::*;

    #[test]
    fn persistence_errors_are_flagged() {
        let io = StorageError::Io("disk full".to_string());

        assert!(SessionError::Persistence(LogError::Persistence(io.clone())).is_persistence());
        assert!(SessionError::Key(KeyError::Persistence(io)).is_persistence());
        assert!(!SessionError::Inactive.is_persistence());
        assert!(
            !SessionError::Key(KeyError::InvalidKeyFormat { reason: "empty key".into() })
                .is_persistence()
        );
    }

    #[test]
    fn error_display() {
        let err = SessionError::KeyUnavailable { status: KeyStatus::Invalid };
        assert_eq!(err.to_string(), "no usable key (status Invalid)");
    }
}
