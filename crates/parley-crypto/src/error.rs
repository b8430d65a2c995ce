//! Error types for key handling and message framing.

use thiserror::Error;

/// Errors from key import, key derivation and message decryption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key text is not base64 or does not decode to exactly 32 bytes.
    #[error("invalid key format: {reason}")]
    InvalidKeyFormat {
        /// What was wrong with the supplied key
        reason: String,
    },

    /// Passphrase is shorter than the minimum accepted length.
    #[error("passphrase too weak: need at least {min_chars} characters, got {actual}")]
    WeakPassphrase {
        /// Minimum number of characters
        min_chars: usize,
        /// Characters supplied
        actual: usize,
    },

    /// Blob could not be decoded or failed authentication.
    ///
    /// Per-message: a failed decryption never affects other messages or the
    /// key status.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },
}

impl CryptoError {
    /// Returns true if the error rejects a key change attempt (as opposed to
    /// a single message).
    pub fn is_key_rejection(&self) -> bool {
        match self {
            Self::InvalidKeyFormat { .. } | Self::WeakPassphrase { .. } => true,
            Self::DecryptionFailed { .. } => false,
        }
    }
}
