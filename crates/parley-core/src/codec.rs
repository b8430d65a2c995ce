//! Message encryption with environment-supplied nonces.
//!
//! Thin stateful wrapper over the pure functions in `parley_crypto::codec`:
//! every `encrypt` draws a fresh 96-bit nonce from the environment, so callers
//! cannot reuse one by accident.

use parley_crypto::{
    CiphertextBlob, CryptoError, NONCE_SIZE, SecretKey, decrypt_message, encrypt_message,
};

use crate::env::Environment;

/// Encrypts and decrypts message blobs.
#[derive(Clone)]
pub struct MessageCodec<E: Environment> {
    env: E,
}

impl<E: Environment> MessageCodec<E> {
    /// Codec drawing nonces from `env`.
    pub fn new(env: E) -> Self {
        Self { env }
    }

    /// Encrypt `plaintext` under `key` with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str, key: &SecretKey) -> CiphertextBlob {
        let nonce: [u8; NONCE_SIZE] = self.env.random_array();
        encrypt_message(plaintext, key, nonce)
    }

    /// Decrypt a blob under `key`.
    ///
    /// Failures are per message and never fatal to the conversation.
    pub fn decrypt(&self, blob: &CiphertextBlob, key: &SecretKey) -> Result<String, CryptoError> {
        decrypt_message(blob, key)
    }
}
