//! Symmetric key material and its provenance.
//!
//! A conversation has exactly one active [`KeyMaterial`]. The provenance
//! records how the key was obtained, which in turn decides whether callers may
//! treat it as a shared secret or only as the insecure per-conversation
//! fallback.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    kdf::{derive_fallback_key, derive_passphrase_key},
};

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// A 256-bit symmetric key. Zeroized on drop.
///
/// Deliberately has no `PartialEq` and a redacted `Debug`.
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// How a key was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyProvenance {
    /// Deterministic per-conversation fallback from a public salt. Insecure.
    DemoDerived,
    /// Derived from a user passphrase shared out of band.
    PassphraseDerived,
    /// Fresh random key generated locally.
    RandomGenerated,
    /// Pasted by the user or loaded from persistence.
    Imported,
}

impl KeyProvenance {
    /// Whether keys of this provenance count as a real shared secret.
    ///
    /// Only [`KeyProvenance::DemoDerived`] is not: anyone who knows the
    /// conversation id can recompute it.
    pub fn is_shared_secret(self) -> bool {
        !matches!(self, Self::DemoDerived)
    }
}

/// An active key together with its provenance.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    key: SecretKey,
    provenance: KeyProvenance,
}

impl KeyMaterial {
    /// Pair a key with its provenance.
    pub fn new(key: SecretKey, provenance: KeyProvenance) -> Self {
        Self { key, provenance }
    }

    /// Key from caller-provided random bytes.
    ///
    /// Caller MUST provide cryptographically secure random bytes in
    /// production.
    pub fn random(random_bytes: [u8; KEY_SIZE]) -> Self {
        Self::new(SecretKey::from_bytes(random_bytes), KeyProvenance::RandomGenerated)
    }

    /// Deterministic fallback key for a conversation. Slow (PBKDF2).
    pub fn fallback_for(conversation_id: &str) -> Self {
        Self::new(derive_fallback_key(conversation_id), KeyProvenance::DemoDerived)
    }

    /// Key derived from a passphrase. Slow (PBKDF2).
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(derive_passphrase_key(passphrase)?, KeyProvenance::PassphraseDerived))
    }

    /// Key decoded from its base64 export form.
    pub fn import(encoded: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(import_key(encoded)?, KeyProvenance::Imported))
    }

    /// The secret key.
    pub fn key(&self) -> &SecretKey {
        &self.key
    }

    /// How the key was obtained.
    pub fn provenance(&self) -> KeyProvenance {
        self.provenance
    }

    /// Base64 export form, for display and clipboard handoff.
    pub fn export(&self) -> String {
        export_key(&self.key)
    }
}

/// Encode a key as standard (padded) base64.
pub fn export_key(key: &SecretKey) -> String {
    STANDARD.encode(key.as_bytes())
}

/// Decode a base64 key, rejecting anything that is not exactly 32 bytes.
///
/// Leading and trailing whitespace is ignored, since keys usually arrive via
/// copy and paste.
pub fn import_key(encoded: &str) -> Result<SecretKey, CryptoError> {
    let trimmed = encoded.trim();
    if trimmed.is_empty() {
        return Err(CryptoError::InvalidKeyFormat { reason: "empty key".to_string() });
    }

    let mut decoded = STANDARD
        .decode(trimmed)
        .map_err(|e| CryptoError::InvalidKeyFormat { reason: format!("not base64: {e}") })?;

    if decoded.len() != KEY_SIZE {
        let actual = decoded.len();
        decoded.zeroize();
        return Err(CryptoError::InvalidKeyFormat {
            reason: format!("expected {KEY_SIZE} bytes, got {actual}"),
        });
    }

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&decoded);
    decoded.zeroize();

    Ok(SecretKey::from_bytes(bytes))
}
