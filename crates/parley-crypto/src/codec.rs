//! Message framing using AES-256-GCM.
//!
//! All functions are pure - the nonce must be provided by the caller.
//!
//! Blob wire format (base64, standard alphabet with padding):
//!
//! ```text
//! [ nonce (12 bytes) | ciphertext | tag (16 bytes) ]
//! ```

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::{error::CryptoError, key::SecretKey};

/// AES-GCM nonce size (96 bits).
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Base64-encoded `nonce ‖ ciphertext ‖ tag`.
///
/// Opaque to everything except this module. Two blobs are the same message
/// iff their text is equal: a fresh random nonce per encryption makes
/// collisions between distinct messages cryptographically negligible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CiphertextBlob(String);

impl CiphertextBlob {
    /// Wrap an encoded blob as received from storage or the network.
    ///
    /// No validation happens here; malformed blobs fail at decryption.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Encoded text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Nonce bytes, if the blob decodes far enough to have one.
    pub fn nonce(&self) -> Option<[u8; NONCE_SIZE]> {
        let raw = STANDARD.decode(&self.0).ok()?;
        raw.get(..NONCE_SIZE)?.try_into().ok()
    }
}

impl fmt::Display for CiphertextBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CiphertextBlob {
    fn from(encoded: String) -> Self {
        Self(encoded)
    }
}

/// Encrypt a UTF-8 plaintext under `key` with the given nonce.
///
/// # Security
///
/// The nonce MUST be fresh random bytes for every call. Reusing a nonce under
/// the same key breaks both confidentiality and authenticity.
pub fn encrypt_message(plaintext: &str, key: &SecretKey, nonce: [u8; NONCE_SIZE]) -> CiphertextBlob {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes()) else {
        unreachable!("AES-256-GCM encryption cannot fail below the 64 GiB message limit");
    };

    let mut raw = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    raw.extend_from_slice(&nonce);
    raw.extend_from_slice(&ciphertext);

    CiphertextBlob(STANDARD.encode(raw))
}

/// Decrypt a blob produced by [`encrypt_message`].
///
/// # Errors
///
/// - `DecryptionFailed`: malformed base64, blob shorter than the nonce,
///   authentication failure (wrong key, corruption, tampering) or a plaintext
///   that is not UTF-8
pub fn decrypt_message(blob: &CiphertextBlob, key: &SecretKey) -> Result<String, CryptoError> {
    let raw = STANDARD
        .decode(blob.as_str())
        .map_err(|e| CryptoError::DecryptionFailed { reason: format!("malformed base64: {e}") })?;

    if raw.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed {
            reason: format!("blob too short: {} bytes", raw.len()),
        });
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let plaintext = cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed {
        reason: "plaintext is not valid UTF-8".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KEY_SIZE;

    fn test_key(seed: u8) -> SecretKey {
        let mut key = [0u8; KEY_SIZE];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }
        SecretKey::from_bytes(key)
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key(1);
        let blob = encrypt_message("Hello, World!", &key, [0xAB; NONCE_SIZE]);

        assert_eq!(decrypt_message(&blob, &key).unwrap(), "Hello, World!");
    }

    #[test]
    fn encrypt_decrypt_empty_message() {
        let key = test_key(2);
        let blob = encrypt_message("", &key, [0x00; NONCE_SIZE]);

        assert_eq!(decrypt_message(&blob, &key).unwrap(), "");
    }

    #[test]
    fn blob_layout_is_nonce_ciphertext_tag() {
        let key = test_key(3);
        let nonce = [0x11; NONCE_SIZE];
        let blob = encrypt_message("test message", &key, nonce);

        let raw = STANDARD.decode(blob.as_str()).unwrap();
        assert_eq!(raw.len(), NONCE_SIZE + "test message".len() + TAG_SIZE);
        assert_eq!(&raw[..NONCE_SIZE], &nonce);
        assert_eq!(blob.nonce(), Some(nonce));
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let blob = encrypt_message("secret message", &test_key(4), [0x00; NONCE_SIZE]);

        let result = decrypt_message(&blob, &test_key(5));
        assert!(matches!(
            result,
            Err(CryptoError::DecryptionFailed { reason }) if reason.contains("authentication")
        ));
    }

    #[test]
    fn malformed_base64_fails_decryption() {
        let result = decrypt_message(&CiphertextBlob::new("%%%"), &test_key(6));
        assert!(matches!(
            result,
            Err(CryptoError::DecryptionFailed { reason }) if reason.contains("base64")
        ));
    }

    #[test]
    fn short_blob_fails_decryption() {
        let blob = CiphertextBlob::new(STANDARD.encode([0u8; NONCE_SIZE - 1]));
        let result = decrypt_message(&blob, &test_key(7));
        assert!(matches!(
            result,
            Err(CryptoError::DecryptionFailed { reason }) if reason.contains("too short")
        ));
        assert_eq!(blob.nonce(), None);
    }

    #[test]
    fn nonce_only_blob_fails_authentication() {
        let blob = CiphertextBlob::new(STANDARD.encode([0u8; NONCE_SIZE]));
        assert!(decrypt_message(&blob, &test_key(8)).is_err());
    }

    #[test]
    fn non_utf8_plaintext_is_a_decryption_failure() {
        let key = test_key(9);
        let nonce = [0x42; NONCE_SIZE];
        let cipher = Aes256Gcm::new(key.as_bytes().into());
        let ciphertext = cipher.encrypt(Nonce::from_slice(&nonce), [0xFFu8, 0xFE].as_slice()).unwrap();

        let mut raw = nonce.to_vec();
        raw.extend_from_slice(&ciphertext);
        let blob = CiphertextBlob::new(STANDARD.encode(raw));

        assert!(matches!(
            decrypt_message(&blob, &key),
            Err(CryptoError::DecryptionFailed { reason }) if reason.contains("UTF-8")
        ));
    }

    #[test]
    fn different_nonces_produce_different_blobs() {
        let key = test_key(10);
        let a = encrypt_message("same", &key, [0x00; NONCE_SIZE]);
        let b = encrypt_message("same", &key, [0xFF; NONCE_SIZE]);

        assert_ne!(a, b);
    }

    #[test]
    fn blob_serializes_as_plain_string() {
        let blob = CiphertextBlob::new("QUJD");
        assert_eq!(blob.to_string(), "QUJD");
        assert_eq!(CiphertextBlob::from("QUJD".to_string()), blob);
    }
}
