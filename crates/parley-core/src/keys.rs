//! Per-conversation key lifecycle.
//!
//! [`KeyManager`] owns the active [`KeyMaterial`] of one conversation, its
//! [`KeyStatus`], and a generation counter that increases on every key change.
//!
//! # State Machine
//!
//! ```text
//!            resolve (persisted ok)      import / generate / passphrase
//! Loading ─────────────────────────▶ Shared ◀─────────────────────────┐
//!    │                                 │  ▲                           │
//!    │ resolve (nothing persisted)     │  │ import / generate /       │
//!    ▼                          clear  ▼  │ passphrase                │
//! Derived ◀───────────────────────── Derived                       Invalid
//!    │                                                                ▲
//!    └──── failed import (from any state), or malformed persisted key ┘
//! ```
//!
//! `Invalid` is never terminal: the next successful resolution supersedes it.
//! While `Invalid`, the previous key is retained but not usable.
//!
//! Key derivation is slow (PBKDF2). Async callers derive the material off
//! their executor and hand it to [`KeyManager::install`] or
//! [`KeyManager::adopt`]; the blocking convenience methods do both steps.

use parley_crypto::{CryptoError, KeyMaterial, KeyProvenance, SecretKey};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    conversation::ConversationId,
    env::Environment,
    storage::{Storage, StorageError},
};

/// Trust level of a conversation's active key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyStatus {
    /// Not resolved yet
    Loading,
    /// Running on the insecure per-conversation fallback key
    Derived,
    /// Running on a real shared secret
    Shared,
    /// Last key change was rejected; no usable key
    Invalid,
}

impl KeyStatus {
    fn for_provenance(provenance: KeyProvenance) -> Self {
        if provenance.is_shared_secret() { Self::Shared } else { Self::Derived }
    }
}

/// Errors from key operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Key text did not decode to exactly 32 bytes
    #[error("invalid key format: {reason}")]
    InvalidKeyFormat {
        /// What was wrong with the key
        reason: String,
    },

    /// Passphrase shorter than the minimum
    #[error("passphrase too weak: need at least {min_chars} characters, got {actual}")]
    WeakPassphrase {
        /// Required minimum length in characters
        min_chars: usize,
        /// Length of the rejected passphrase
        actual: usize,
    },

    /// Key state changed in memory but could not be persisted
    #[error("key persistence failed: {0}")]
    Persistence(#[from] StorageError),
}

impl From<CryptoError> for KeyError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::WeakPassphrase { min_chars, actual } => {
                Self::WeakPassphrase { min_chars, actual }
            },
            CryptoError::InvalidKeyFormat { reason } | CryptoError::DecryptionFailed { reason } => {
                Self::InvalidKeyFormat { reason }
            },
        }
    }
}

/// Outcome of looking up the persisted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A status was reached without deriving anything
    Resolved(KeyStatus),
    /// Nothing persisted: the fallback key must be derived and adopted
    NeedsFallback,
}

/// Key lifecycle for a single conversation.
pub struct KeyManager<S: Storage> {
    conversation_id: ConversationId,
    storage: S,
    active: Option<KeyMaterial>,
    status: KeyStatus,
    generation: u64,
}

impl<S: Storage> KeyManager<S> {
    /// Manager in the `Loading` state with no key.
    pub fn new(conversation_id: ConversationId, storage: S) -> Self {
        Self { conversation_id, storage, active: None, status: KeyStatus::Loading, generation: 0 }
    }

    /// Conversation this manager belongs to.
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Current status.
    pub fn status(&self) -> KeyStatus {
        self.status
    }

    /// Key generation. Increases on every key change, never decreases.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Active key, unless the status forbids using it.
    pub fn usable_key(&self) -> Option<&SecretKey> {
        match self.status {
            KeyStatus::Derived | KeyStatus::Shared => self.active.as_ref().map(KeyMaterial::key),
            KeyStatus::Loading | KeyStatus::Invalid => None,
        }
    }

    /// Provenance of the usable key.
    pub fn provenance(&self) -> Option<KeyProvenance> {
        self.usable_key()?;
        self.active.as_ref().map(KeyMaterial::provenance)
    }

    /// Resolve the key from persistence, deriving the fallback if needed.
    ///
    /// Blocks for the duration of the fallback derivation.
    pub fn resolve(&mut self) -> Result<KeyStatus, KeyError> {
        match self.load_persisted()? {
            Resolution::Resolved(status) => Ok(status),
            Resolution::NeedsFallback => {
                Ok(self.adopt(KeyMaterial::fallback_for(self.conversation_id.as_str())))
            },
        }
    }

    /// Activate the persisted key if there is one.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyFormat` if the persisted key is malformed. Status becomes
    ///   `Invalid`.
    /// - `Persistence` if the key entry cannot be read. Status is unchanged.
    pub fn load_persisted(&mut self) -> Result<Resolution, KeyError> {
        let Some(encoded) = self.storage.load_key(&self.conversation_id)? else {
            return Ok(Resolution::NeedsFallback);
        };

        match KeyMaterial::import(&encoded) {
            Ok(material) => Ok(Resolution::Resolved(self.adopt(material))),
            Err(err) => {
                warn!(
                    conversation_id = %self.conversation_id,
                    error = %err,
                    "persisted key is malformed"
                );
                self.status = KeyStatus::Invalid;
                Err(err.into())
            },
        }
    }

    /// Activate key material without touching persistence.
    ///
    /// Used for keys that came from persistence or for the fallback key
    /// while nothing is persisted.
    pub fn adopt(&mut self, material: KeyMaterial) -> KeyStatus {
        self.activate(material);
        self.status
    }

    /// Activate key material and persist accordingly.
    ///
    /// Shared secrets are persisted in their exported form. Installing the
    /// fallback key removes any persisted key.
    ///
    /// # Errors
    ///
    /// - `Persistence` if the write fails. The key is active regardless.
    pub fn install(&mut self, material: KeyMaterial) -> Result<KeyStatus, KeyError> {
        let exported =
            material.provenance().is_shared_secret().then(|| material.export());

        self.activate(material);

        match exported {
            Some(exported) => self.storage.store_key(&self.conversation_id, &exported)?,
            None => self.storage.delete_key(&self.conversation_id)?,
        }

        Ok(self.status)
    }

    /// Generate and install a fresh random key.
    pub fn generate_random_key<E: Environment>(&mut self, env: &E) -> Result<KeyStatus, KeyError> {
        self.install(KeyMaterial::random(env.random_array()))
    }

    /// Derive and install a passphrase key. Blocks for the derivation.
    ///
    /// # Errors
    ///
    /// - `WeakPassphrase` if the passphrase is too short. Nothing changes.
    /// - `Persistence` if the write fails. The key is active regardless.
    pub fn derive_from_passphrase(&mut self, passphrase: &str) -> Result<KeyStatus, KeyError> {
        let material = KeyMaterial::from_passphrase(passphrase)?;
        self.install(material)
    }

    /// Import and install a base64 key.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyFormat` if the text is not exactly 32 bytes of base64.
    ///   Status becomes `Invalid`; the previous key and generation are kept.
    /// - `Persistence` if the write fails. The key is active regardless.
    pub fn import_key(&mut self, encoded: &str) -> Result<KeyStatus, KeyError> {
        match KeyMaterial::import(encoded) {
            Ok(material) => self.install(material),
            Err(err) => {
                self.reject(&err);
                Err(err.into())
            },
        }
    }

    /// Record a rejected key change. Status becomes `Invalid`.
    pub fn reject(&mut self, err: &CryptoError) {
        if err.is_key_rejection() {
            info!(conversation_id = %self.conversation_id, error = %err, "key rejected");
            self.status = KeyStatus::Invalid;
        }
    }

    /// Export the usable key as base64, for handing to the peer.
    pub fn export_key(&self) -> Option<String> {
        self.usable_key().map(parley_crypto::export_key)
    }

    /// Drop the shared key and return to the fallback. Blocks for the
    /// derivation.
    pub fn clear(&mut self) -> Result<KeyStatus, KeyError> {
        self.install(KeyMaterial::fallback_for(self.conversation_id.as_str()))
    }

    fn activate(&mut self, material: KeyMaterial) {
        self.status = KeyStatus::for_provenance(material.provenance());
        self.active = Some(material);
        self.generation += 1;

        debug!(
            conversation_id = %self.conversation_id,
            status = ?self.status,
            generation = self.generation,
            "key activated"
        );
    }
}
