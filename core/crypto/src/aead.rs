//! Authenticated encryption.
//!
//! Two constructions live here:
//! - Key wrapping with XChaCha20-Poly1305, whose 24-byte nonce is safe for
//!   random generation. The nonce is prepended to the wrapped key.
//! - Content encryption with ChaCha20-Poly1305, where the 12-byte nonce and
//!   the 16-byte tag travel separately in the envelope.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, AeadInPlace, KeyInit, OsRng},
    ChaCha20Poly1305, Tag, XChaCha20Poly1305,
};

use crate::keys::{ContentKey, KeyEncryptionKey};
use sealdoc_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 key wrapping (24 bytes).
pub const WRAP_NONCE_SIZE: usize = 24;

/// Nonce size for ChaCha20-Poly1305 content encryption (12 bytes).
pub const CONTENT_NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Wrap a content key under a key encryption key.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
pub fn wrap_key(kek: &KeyEncryptionKey, cek: &ContentKey) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(kek.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, cek.as_bytes().as_slice())
        .map_err(|e| Error::Crypto(format!("Key wrap failed: {}", e)))?;

    let mut result = Vec::with_capacity(WRAP_NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Unwrap a content key previously wrapped with [`wrap_key`].
///
/// # Errors
/// - `Crypto` if the wrapped key is too short to contain nonce and tag
/// - `KeyNotApplicable` if authentication fails, i.e. the KEK is wrong
/// - `Crypto` if the unwrapped key has the wrong length
pub fn unwrap_key(kek: &KeyEncryptionKey, wrapped: &[u8]) -> Result<ContentKey> {
    if wrapped.len() < WRAP_NONCE_SIZE + TAG_SIZE {
        return Err(Error::Crypto("Wrapped key too short".to_string()));
    }

    let (nonce_bytes, encrypted) = wrapped.split_at(WRAP_NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(kek.as_bytes()));

    let plaintext = cipher
        .decrypt(GenericArray::from_slice(nonce_bytes), encrypted)
        .map_err(|_| Error::KeyNotApplicable)?;

    ContentKey::from_slice(&plaintext)
}

/// Generate a fresh random content nonce.
pub fn generate_content_nonce() -> [u8; CONTENT_NONCE_SIZE] {
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let mut out = [0u8; CONTENT_NONCE_SIZE];
    out.copy_from_slice(&nonce);
    out
}

/// Encrypt content with ChaCha20-Poly1305, binding `aad`.
///
/// # Postconditions
/// - Returns (ciphertext, tag); the ciphertext has the plaintext's length
pub fn seal_content(
    cek: &ContentKey,
    nonce: &[u8; CONTENT_NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(cek.as_bytes()));
    let mut buffer = plaintext.to_vec();

    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, &mut buffer)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    Ok((buffer, tag.to_vec()))
}

/// Decrypt content sealed with [`seal_content`].
///
/// # Errors
/// - Returns error if the nonce or tag has the wrong size
/// - Returns error if authentication fails (tampered data, attributes or tag)
pub fn open_content(
    cek: &ContentKey,
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if nonce.len() != CONTENT_NONCE_SIZE {
        return Err(Error::Crypto(format!(
            "Invalid nonce length: expected {}, got {}",
            CONTENT_NONCE_SIZE,
            nonce.len()
        )));
    }
    if tag.len() != TAG_SIZE {
        return Err(Error::Crypto(format!(
            "Invalid tag length: expected {}, got {}",
            TAG_SIZE,
            tag.len()
        )));
    }

    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(cek.as_bytes()));
    let mut buffer = ciphertext.to_vec();

    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            aad,
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let kek = KeyEncryptionKey::from_bytes([42u8; KEY_LENGTH]);
        let cek = ContentKey::generate();

        let wrapped = wrap_key(&kek, &cek).unwrap();
        assert_eq!(wrapped.len(), WRAP_NONCE_SIZE + KEY_LENGTH + TAG_SIZE);

        let unwrapped = unwrap_key(&kek, &wrapped).unwrap();
        assert_eq!(unwrapped.as_bytes(), cek.as_bytes());
    }

    #[test]
    fn test_unwrap_with_wrong_kek_is_not_applicable() {
        let kek1 = KeyEncryptionKey::from_bytes([1u8; KEY_LENGTH]);
        let kek2 = KeyEncryptionKey::from_bytes([2u8; KEY_LENGTH]);
        let cek = ContentKey::generate();

        let wrapped = wrap_key(&kek1, &cek).unwrap();
        let err = unwrap_key(&kek2, &wrapped).unwrap_err();
        assert!(err.is_key_not_applicable());
    }

    #[test]
    fn test_unwrap_truncated_is_crypto_error() {
        let kek = KeyEncryptionKey::from_bytes([1u8; KEY_LENGTH]);
        let err = unwrap_key(&kek, &[0u8; 10]).unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn test_content_roundtrip_with_aad() {
        let cek = ContentKey::generate();
        let nonce = generate_content_nonce();
        let plaintext = b"Hello, World!";

        let (ct, tag) = seal_content(&cek, &nonce, plaintext, b"attrs").unwrap();
        assert_eq!(ct.len(), plaintext.len());
        assert_eq!(tag.len(), TAG_SIZE);

        let decrypted = open_content(&cek, &nonce, &ct, &tag, b"attrs").unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_content_aad_mismatch_fails() {
        let cek = ContentKey::generate();
        let nonce = generate_content_nonce();

        let (ct, tag) = seal_content(&cek, &nonce, b"data", b"attrs").unwrap();
        assert!(open_content(&cek, &nonce, &ct, &tag, b"other").is_err());
    }

    #[test]
    fn test_tampered_content_fails() {
        let cek = ContentKey::generate();
        let nonce = generate_content_nonce();

        let (mut ct, tag) = seal_content(&cek, &nonce, b"Important data", b"").unwrap();
        ct[3] ^= 0xFF;

        assert!(open_content(&cek, &nonce, &ct, &tag, b"").is_err());
    }

    #[test]
    fn test_bad_tag_length() {
        let cek = ContentKey::generate();
        let nonce = generate_content_nonce();
        assert!(open_content(&cek, &nonce, b"x", &[0u8; 8], b"").is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let cek = ContentKey::generate();
        let nonce = generate_content_nonce();

        let (ct, tag) = seal_content(&cek, &nonce, b"", b"").unwrap();
        let decrypted = open_content(&cek, &nonce, &ct, &tag, b"").unwrap();

        assert!(decrypted.is_empty());
    }
}
