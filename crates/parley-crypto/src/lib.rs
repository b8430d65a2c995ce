//! Parley Cryptographic Primitives
//!
//! Key material, key derivation and authenticated message framing for a
//! pairwise chat that shares one symmetric key per conversation. Pure
//! functions with deterministic outputs: callers provide random bytes
//! (nonces, fresh keys) so tests can be reproducible.
//!
//! # Key Lifecycle
//!
//! ```text
//! conversation id ──PBKDF2 (public salt)──▶ fallback key   (DemoDerived, insecure)
//! passphrase      ──PBKDF2 (fixed salt) ──▶ shared key     (PassphraseDerived)
//! 32 random bytes ─────────────────────────▶ shared key     (RandomGenerated)
//! base64 text     ──decode, len == 32 ────▶ shared key     (Imported)
//!                                               │
//!                                               ▼
//!                               AES-256-GCM ─▶ CiphertextBlob
//! ```
//!
//! # Security
//!
//! Authenticity:
//! - AES-256-GCM tag covers the whole ciphertext; any flipped byte is rejected
//! - Decryption failures are per message and never change key state
//!
//! Nonces:
//! - 96-bit random nonce per message, carried in the blob
//! - Reuse under one key is fatal to security, so nonces are never derived or
//!   counted, only drawn from the caller's CSPRNG
//!
//! Non-goals:
//! - No forward secrecy and no key exchange. The fallback key is public by
//!   construction and exists only to avoid plaintext before a secret is set.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod error;
pub mod kdf;
pub mod key;

pub use codec::{CiphertextBlob, NONCE_SIZE, TAG_SIZE, decrypt_message, encrypt_message};
pub use error::CryptoError;
pub use kdf::{MIN_PASSPHRASE_CHARS, derive_fallback_key, derive_passphrase_key};
pub use key::{KEY_SIZE, KeyMaterial, KeyProvenance, SecretKey, export_key, import_key};
