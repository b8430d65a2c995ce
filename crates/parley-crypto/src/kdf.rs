//! Slow key derivation (PBKDF2-HMAC-SHA256).
//!
//! Two derivation paths share the same primitive with different salts and
//! work factors:
//!
//! - Fallback: derives a key from the conversation id alone. The salt is
//!   public and fixed, so anyone who knows the id can recompute the key. This
//!   only exists so every conversation can encrypt before a real secret is
//!   exchanged, and must always be surfaced to users as insecure.
//! - Passphrase: derives a key from a passphrase both peers know.

use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha2::Sha256;

use crate::{
    error::CryptoError,
    key::{KEY_SIZE, SecretKey},
};

/// Public salt for the per-conversation fallback key.
pub const FALLBACK_SALT: &[u8] = b"parley-demo-fallback-salt-v1";

/// PBKDF2 rounds for the fallback key.
pub const FALLBACK_ITERATIONS: u32 = 100_000;

/// Salt for passphrase-derived keys.
pub const PASSPHRASE_SALT: &[u8] = b"parley-shared-passphrase-salt-v1";

/// PBKDF2 rounds for passphrase-derived keys.
pub const PASSPHRASE_ITERATIONS: u32 = 150_000;

/// Minimum passphrase length in characters (Unicode scalar values).
pub const MIN_PASSPHRASE_CHARS: usize = 12;

/// Derive the deterministic fallback key for a conversation.
pub fn derive_fallback_key(conversation_id: &str) -> SecretKey {
    pbkdf2_sha256(conversation_id.as_bytes(), FALLBACK_SALT, FALLBACK_ITERATIONS)
}

/// Derive a shared key from a passphrase.
///
/// # Errors
///
/// - `WeakPassphrase` if the passphrase has fewer than
///   [`MIN_PASSPHRASE_CHARS`] characters
pub fn derive_passphrase_key(passphrase: &str) -> Result<SecretKey, CryptoError> {
    let actual = passphrase.chars().count();
    if actual < MIN_PASSPHRASE_CHARS {
        return Err(CryptoError::WeakPassphrase { min_chars: MIN_PASSPHRASE_CHARS, actual });
    }

    Ok(pbkdf2_sha256(passphrase.as_bytes(), PASSPHRASE_SALT, PASSPHRASE_ITERATIONS))
}

fn pbkdf2_sha256(password: &[u8], salt: &[u8], rounds: u32) -> SecretKey {
    let mut out = [0u8; KEY_SIZE];
    let Ok(()) = pbkdf2::<Hmac<Sha256>>(password, salt, rounds, &mut out) else {
        unreachable!("HMAC-SHA256 accepts passwords of any length");
    };
    SecretKey::from_bytes(out)
}
