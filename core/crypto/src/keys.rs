//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sealdoc_common::{Error, Result};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of symmetric keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of generated pre-shared key identifiers.
pub const KEY_IDENTIFIER_LENGTH: usize = 12;

/// Length of subject key identifiers derived from public keys.
pub const SUBJECT_KEY_IDENTIFIER_LENGTH: usize = 20;

fn key_from_slice(bytes: &[u8], what: &str) -> Result<[u8; KEY_LENGTH]> {
    if bytes.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid {} length: expected {}, got {}",
            what,
            KEY_LENGTH,
            bytes.len()
        )));
    }
    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(bytes);
    Ok(key)
}

/// Content encryption key.
///
/// Generated fresh for every top-level wrap and recovered once per unwrap;
/// it is never persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    key: [u8; KEY_LENGTH],
}

impl ContentKey {
    /// Generate a random content key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Create a content key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a content key from an unwrapped byte string.
    ///
    /// # Errors
    /// - Returns error if the length is not KEY_LENGTH
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            key: key_from_slice(bytes, "content key")?,
        })
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey([REDACTED])")
    }
}

/// Key encryption key for password and pre-shared-key recipients.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyEncryptionKey {
    key: [u8; KEY_LENGTH],
}

impl KeyEncryptionKey {
    /// Generate a random key encryption key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Create a KEK from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a KEK from a byte string, e.g. an entry in a package index.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            key: key_from_slice(bytes, "key encryption key")?,
        })
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Compare two KEKs in constant time.
    pub fn ct_eq(&self, other: &KeyEncryptionKey) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyEncryptionKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; 32]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create from a decoded byte string.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::Crypto(format!(
                "Invalid salt length: expected 32, got {}",
                bytes.len()
            )));
        }
        let mut salt = [0u8; 32];
        salt.copy_from_slice(bytes);
        Ok(Self(salt))
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Generate a random identifier for a pre-shared key.
pub fn generate_key_identifier() -> Vec<u8> {
    random_bytes(KEY_IDENTIFIER_LENGTH)
}

/// Fill a fresh buffer with `len` random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Derive a subject key identifier from raw public key bytes.
///
/// Uses blake2b truncated to SUBJECT_KEY_IDENTIFIER_LENGTH bytes.
pub fn subject_key_identifier(public_key: &[u8]) -> Vec<u8> {
    use blake2::digest::consts::U20;
    use blake2::{Blake2b, Digest};

    let mut hasher = Blake2b::<U20>::new();
    hasher.update(public_key);
    hasher.update(b"ski");
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_key_generate() {
        let key1 = ContentKey::generate();
        let key2 = ContentKey::generate();

        // Random keys should be different
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_content_key_from_slice_checks_length() {
        assert!(ContentKey::from_slice(&[0u8; 16]).is_err());
        let key = ContentKey::from_slice(&[7u8; KEY_LENGTH]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; KEY_LENGTH]);
    }

    #[test]
    fn test_kek_ct_eq() {
        let a = KeyEncryptionKey::from_bytes([1u8; KEY_LENGTH]);
        let b = KeyEncryptionKey::from_bytes([1u8; KEY_LENGTH]);
        let c = KeyEncryptionKey::from_bytes([2u8; KEY_LENGTH]);

        assert!(a.ct_eq(&b));
        assert!(!a.ct_eq(&c));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = ContentKey::from_bytes([9u8; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "ContentKey([REDACTED])");
    }

    #[test]
    fn test_key_identifier_length() {
        let id = generate_key_identifier();
        assert_eq!(id.len(), KEY_IDENTIFIER_LENGTH);
        assert_ne!(id, generate_key_identifier());
    }

    #[test]
    fn test_subject_key_identifier_is_stable() {
        let a = subject_key_identifier(b"public");
        assert_eq!(a.len(), SUBJECT_KEY_IDENTIFIER_LENGTH);
        assert_eq!(a, subject_key_identifier(b"public"));
        assert_ne!(a, subject_key_identifier(b"other"));
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();

        // Random salts should be different
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }
}
