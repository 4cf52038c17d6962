//! Cryptographic primitives for sealdoc.
//!
//! This module provides:
//! - Password KEK derivation using Argon2id
//! - Key wrapping using XChaCha20-Poly1305
//! - Content encryption using ChaCha20-Poly1305 (AEAD) or raw ChaCha20 (legacy)
//! - X25519 sealed-box key transport for public-key recipients
//! - zlib compression
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons

pub mod aead;
pub mod cipher;
pub mod compress;
pub mod kdf;
pub mod keys;
pub mod pubkey;

pub use aead::{open_content, seal_content, unwrap_key, wrap_key};
pub use kdf::{derive_kek, KdfParams};
pub use keys::{ContentKey, KeyEncryptionKey, Salt, KEY_LENGTH};
pub use pubkey::{open_key, seal_key, AgreementKeypair};
