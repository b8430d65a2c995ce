//! Property-based tests for message framing and key transport
//!
//! These tests verify the blob format holds for ALL inputs, not just specific
//! examples:
//! - Round-trip is identity under the same key
//! - Any single flipped byte is rejected
//! - Wrong keys never yield plaintext
//! - Exported keys import back to identical bytes

use std::collections::HashSet;

use base64::{Engine, engine::general_purpose::STANDARD};
use parley_crypto::{
    CiphertextBlob, CryptoError, KEY_SIZE, NONCE_SIZE, SecretKey, TAG_SIZE, decrypt_message,
    encrypt_message, export_key, import_key,
};
use proptest::prelude::*;

fn arbitrary_key() -> impl Strategy<Value = SecretKey> {
    any::<[u8; KEY_SIZE]>().prop_map(SecretKey::from_bytes)
}

#[test]
fn prop_encrypt_decrypt_roundtrip() {
    proptest!(|(
        plaintext in ".{0,512}",
        key in arbitrary_key(),
        nonce in any::<[u8; NONCE_SIZE]>(),
    )| {
        let blob = encrypt_message(&plaintext, &key, nonce);
        let decrypted = decrypt_message(&blob, &key).expect("decrypt should succeed");

        // PROPERTY: Round-trip must be identity
        prop_assert_eq!(decrypted, plaintext);
    });
}

#[test]
fn prop_blob_length_is_nonce_plus_plaintext_plus_tag() {
    proptest!(|(
        plaintext in ".{0,256}",
        key in arbitrary_key(),
        nonce in any::<[u8; NONCE_SIZE]>(),
    )| {
        let blob = encrypt_message(&plaintext, &key, nonce);
        let raw = STANDARD.decode(blob.as_str()).expect("blob is valid base64");

        prop_assert_eq!(raw.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
        prop_assert_eq!(blob.nonce(), Some(nonce));
    });
}

#[test]
fn prop_tampered_blob_rejected() {
    proptest!(|(
        plaintext in ".{1,128}",
        key in arbitrary_key(),
        nonce in any::<[u8; NONCE_SIZE]>(),
        position in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    )| {
        let blob = encrypt_message(&plaintext, &key, nonce);
        let mut raw = STANDARD.decode(blob.as_str()).expect("blob is valid base64");

        let at = position.index(raw.len());
        raw[at] ^= flip;
        let tampered = CiphertextBlob::new(STANDARD.encode(&raw));

        // PROPERTY: AEAD detects any modification
        let result = decrypt_message(&tampered, &key);
        prop_assert!(
            matches!(result, Err(CryptoError::DecryptionFailed { .. })),
            "tampered byte {} accepted", at
        );
    });
}

#[test]
fn prop_wrong_key_rejected() {
    proptest!(|(
        plaintext in ".{0,128}",
        key in arbitrary_key(),
        other in arbitrary_key(),
        nonce in any::<[u8; NONCE_SIZE]>(),
    )| {
        prop_assume!(key.as_bytes() != other.as_bytes());

        let blob = encrypt_message(&plaintext, &key, nonce);
        prop_assert!(decrypt_message(&blob, &other).is_err());
    });
}

#[test]
fn prop_key_export_import_roundtrip() {
    proptest!(|(bytes in any::<[u8; KEY_SIZE]>())| {
        let exported = export_key(&SecretKey::from_bytes(bytes));
        let imported = import_key(&exported).expect("exported key must import");

        prop_assert_eq!(imported.as_bytes(), &bytes);
    });
}

#[test]
fn prop_wrong_length_key_rejected() {
    proptest!(|(len in 0usize..96)| {
        prop_assume!(len != KEY_SIZE);

        let encoded = STANDARD.encode(vec![0x5Au8; len]);
        let result = import_key(&encoded);
        prop_assert!(
            matches!(result, Err(CryptoError::InvalidKeyFormat { .. })),
            "accepted {}-byte key", len
        );
    });
}

/// Nonces come from the caller, so distinctness of blobs is a property of
/// distinct nonces. This drives the codec the way a sender does: one fresh
/// nonce per message, many messages of identical plaintext.
#[test]
fn distinct_nonces_yield_distinct_blobs() {
    let key = SecretKey::from_bytes([7u8; KEY_SIZE]);
    let mut seen = HashSet::new();

    for counter in 0u64..10_000 {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..8].copy_from_slice(&counter.to_le_bytes());

        let blob = encrypt_message("same plaintext", &key, nonce);
        assert!(seen.insert(blob), "duplicate blob at message {counter}");
    }

    assert_eq!(seen.len(), 10_000);
}
