//! Key transport for public-key recipients.
//!
//! Uses X25519 key exchange + XSalsa20-Poly1305 (`crypto_box`). Each content
//! key is sealed to the recipient's public key with an ephemeral keypair, so
//! the sender needs no long-term key of its own.
//!
//! Wire form: ephemeral public key (32) || nonce (24) || ciphertext + tag.

use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use std::fmt;

use crate::keys::ContentKey;
use sealdoc_common::{Error, Result};

/// Size of an X25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

const NONCE_SIZE: usize = 24;

/// X25519 keypair able to open sealed content keys.
///
/// The secret key zeroizes on drop (from crypto_box).
#[derive(Clone)]
pub struct AgreementKeypair {
    secret: SecretKey,
    public: PublicKey,
}

impl AgreementKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut rand::rngs::OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Reconstruct a keypair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = SecretKey::from(bytes);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Returns the public key as raw 32-byte array.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Returns the secret key as raw 32-byte array.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }
}

impl fmt::Debug for AgreementKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgreementKeypair")
            .field("public", &self.public.as_bytes())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Seal a content key to a recipient's public key.
///
/// # Errors
/// - Returns error if `recipient_public` is not PUBLIC_KEY_SIZE bytes
pub fn seal_key(cek: &ContentKey, recipient_public: &[u8]) -> Result<Vec<u8>> {
    let recipient_pk = public_key_from_slice(recipient_public)?;
    let ephemeral = SecretKey::generate(&mut rand::rngs::OsRng);
    let ephemeral_pk = ephemeral.public_key();

    let salsa_box = SalsaBox::new(&recipient_pk, &ephemeral);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = salsa_box
        .encrypt(
            crypto_box::Nonce::from_slice(&nonce_bytes),
            cek.as_bytes().as_slice(),
        )
        .map_err(|e| Error::Crypto(format!("Key transport seal failed: {}", e)))?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(ephemeral_pk.as_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed content key with the recipient's keypair.
///
/// # Errors
/// - `Crypto` if the sealed key is truncated
/// - `KeyNotApplicable` if the keypair does not open the box
pub fn open_key(sealed: &[u8], keypair: &AgreementKeypair) -> Result<ContentKey> {
    if sealed.len() < PUBLIC_KEY_SIZE + NONCE_SIZE {
        return Err(Error::Crypto("Sealed key too short".to_string()));
    }

    let (ephemeral, rest) = sealed.split_at(PUBLIC_KEY_SIZE);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let ephemeral_pk = public_key_from_slice(ephemeral)?;
    let salsa_box = SalsaBox::new(&ephemeral_pk, &keypair.secret);

    let plaintext = salsa_box
        .decrypt(crypto_box::Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::KeyNotApplicable)?;

    ContentKey::from_slice(&plaintext)
}

fn public_key_from_slice(bytes: &[u8]) -> Result<PublicKey> {
    let array: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
        Error::Crypto(format!(
            "Invalid public key length: expected {}, got {}",
            PUBLIC_KEY_SIZE,
            bytes.len()
        ))
    })?;
    Ok(PublicKey::from(array))
}
