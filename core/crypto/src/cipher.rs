//! Legacy unauthenticated content encryption using the raw ChaCha20 stream.
//!
//! Used only when a document is written without AEAD. Decrypting with the
//! wrong key yields garbage rather than an error, so callers must already
//! trust the content key.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, Key, Nonce};

use crate::keys::ContentKey;
use sealdoc_common::{Error, Result};

/// Nonce size for raw ChaCha20 (12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Apply the ChaCha20 keystream to `data`.
///
/// Encryption and decryption are the same operation.
///
/// # Errors
/// - Returns error if the nonce has the wrong length
pub fn apply_keystream(cek: &ContentKey, nonce: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(Error::Crypto(format!(
            "Invalid nonce length: expected {}, got {}",
            NONCE_SIZE,
            nonce.len()
        )));
    }

    let mut cipher = ChaCha20::new(Key::from_slice(cek.as_bytes()), Nonce::from_slice(nonce));
    let mut buffer = data.to_vec();
    cipher.apply_keystream(&mut buffer);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keystream_roundtrip() {
        let cek = ContentKey::generate();
        let nonce = [3u8; NONCE_SIZE];

        let ct = apply_keystream(&cek, &nonce, b"legacy content").unwrap();
        assert_ne!(ct.as_slice(), b"legacy content");

        let pt = apply_keystream(&cek, &nonce, &ct).unwrap();
        assert_eq!(pt, b"legacy content");
    }

    #[test]
    fn test_wrong_nonce_length() {
        let cek = ContentKey::generate();
        assert!(apply_keystream(&cek, &[0u8; 8], b"x").is_err());
    }
}
