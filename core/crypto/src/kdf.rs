//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. Password
//! recipients use it to turn a password into a key encryption key.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{KeyEncryptionKey, Salt, KEY_LENGTH};
use sealdoc_common::{Error, Result};

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Whether no cost exceeds the `sensitive()` preset.
    ///
    /// Parameters read from a document must pass this before any derivation.
    pub fn within_limits(&self) -> bool {
        let max = Self::sensitive();
        self.memory_cost <= max.memory_cost
            && self.time_cost <= max.time_cost
            && self.parallelism <= max.parallelism
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a key encryption key from a password and salt using Argon2id.
///
/// # Preconditions
/// - `params` must have valid Argon2id parameters
///
/// # Postconditions
/// - Returns a KEK of KEY_LENGTH bytes
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns error if Argon2id parameters are invalid
///
/// # Security
/// - Password is not stored or logged
pub fn derive_kek(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<KeyEncryptionKey> {
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(KeyEncryptionKey::from_bytes(key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_derive_kek_deterministic() {
        let salt = Salt::from_bytes([42u8; 32]);

        let key1 = derive_kek(b"test-password-123", &salt, &fast()).unwrap();
        let key2 = derive_kek(b"test-password-123", &salt, &fast()).unwrap();

        assert!(key1.ct_eq(&key2));
    }

    #[test]
    fn test_derive_kek_different_salt() {
        let key1 = derive_kek(b"pw", &Salt::from_bytes([1u8; 32]), &fast()).unwrap();
        let key2 = derive_kek(b"pw", &Salt::from_bytes([2u8; 32]), &fast()).unwrap();

        assert!(!key1.ct_eq(&key2));
    }

    #[test]
    fn test_derive_kek_different_password() {
        let salt = Salt::from_bytes([42u8; 32]);

        let key1 = derive_kek(b"password1", &salt, &fast()).unwrap();
        let key2 = derive_kek(b"password2", &salt, &fast()).unwrap();

        assert!(!key1.ct_eq(&key2));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            memory_cost: 1,
            time_cost: 0,
            parallelism: 0,
        };
        assert!(derive_kek(b"pw", &Salt::generate(), &params).is_err());
    }

    #[test]
    fn test_within_limits() {
        assert!(KdfParams::interactive().within_limits());
        assert!(KdfParams::sensitive().within_limits());
        assert!(!KdfParams {
            memory_cost: 4 * 1024 * 1024,
            ..KdfParams::moderate()
        }
        .within_limits());
        assert!(!KdfParams {
            time_cost: 1000,
            ..KdfParams::moderate()
        }
        .within_limits());
    }

    #[test]
    fn test_params_serde() {
        let json = serde_json::to_string(&KdfParams::moderate()).unwrap();
        let back: KdfParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, KdfParams::moderate());
    }
}
