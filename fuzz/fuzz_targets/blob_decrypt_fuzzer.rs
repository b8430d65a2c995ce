//! Fuzz target for ciphertext blob decryption
//!
//! Blobs come from an untrusted relay. Anything it serves must decrypt or
//! fail cleanly.
//!
//! # Strategy
//!
//! - Random text: arbitrary strings as blobs (base64 malformation)
//! - Random bytes: valid base64 of arbitrary length (short blobs, bad tags)
//! - Bit flips: a genuine blob with one bit flipped
//!
//! # Invariants
//!
//! - NEVER panic on a malformed blob
//! - A flipped bit never authenticates
//! - An untouched blob always decrypts to its plaintext

#![no_main]

use arbitrary::Arbitrary;
use base64::Engine;
use libfuzzer_sys::fuzz_target;
use parley_crypto::{decrypt_message, encrypt_message, CiphertextBlob, SecretKey, KEY_SIZE};

#[derive(Debug, Clone, Arbitrary)]
enum BlobAttack {
    RandomText { text: String },
    RandomBytes { bytes: Vec<u8> },
    BitFlip { plaintext: String, nonce: [u8; 12], position: u16, bit: u8 },
}

fuzz_target!(|attack: BlobAttack| {
    let key = SecretKey::from_bytes([0x42; KEY_SIZE]);

    match attack {
        BlobAttack::RandomText { text } => {
            let _ = decrypt_message(&CiphertextBlob::new(text), &key);
        }

        BlobAttack::RandomBytes { bytes } => {
            let blob = base64::engine::general_purpose::STANDARD.encode(bytes);
            let _ = decrypt_message(&CiphertextBlob::new(blob), &key);
        }

        BlobAttack::BitFlip { plaintext, nonce, position, bit } => {
            let blob = encrypt_message(&plaintext, &key, nonce);
            assert_eq!(decrypt_message(&blob, &key).ok(), Some(plaintext));

            let Ok(mut raw) = base64::engine::general_purpose::STANDARD.decode(blob.as_str())
            else {
                panic!("encrypt_message produced invalid base64");
            };
            let index = position as usize % raw.len();
            raw[index] ^= 1 << (bit % 8);

            let tampered =
                CiphertextBlob::new(base64::engine::general_purpose::STANDARD.encode(raw));
            assert!(decrypt_message(&tampered, &key).is_err(), "tampered blob authenticated");
        }
    }
});
