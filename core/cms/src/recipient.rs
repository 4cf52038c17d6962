//! Recipients: the three ways a content key is wrapped.
//!
//! A recipient is either fresh (built to encrypt a new document and holding
//! a secret) or parsed from an envelope (holding only identifying data and
//! the wrapped key until unwrap supplies the secret).

use der::asn1::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

use crate::asn1::{
    self, AlgorithmIdentifier, Argon2Parameters, KekIdentifier, KekRecipientInfo,
    KeyTransRecipientInfo, PasswordRecipientInfo, TAG_KEKRI, TAG_KTRI, TAG_PWRI,
};
use crate::identifier::{Certificate, RecipientIdentifier};
use crate::keystore::{KeySource, Keypair};
use crate::oid;
use sealdoc_common::{Error, Result};
use sealdoc_crypto::kdf::{derive_kek, KdfParams};
use sealdoc_crypto::keys::{generate_key_identifier, ContentKey, KeyEncryptionKey, Salt, KEY_LENGTH};
use sealdoc_crypto::{aead, pubkey};

/// Salt and cost parameters of a password recipient's key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordKdf {
    pub salt: Salt,
    pub params: KdfParams,
}

impl PasswordKdf {
    fn generate(params: KdfParams) -> Self {
        Self {
            salt: Salt::generate(),
            params,
        }
    }

    fn derive(&self, password: &str) -> Result<KeyEncryptionKey> {
        derive_kek(password.as_bytes(), &self.salt, &self.params)
    }

    fn to_algorithm(&self) -> Result<AlgorithmIdentifier> {
        let params = Argon2Parameters {
            salt: asn1::octet_string(self.salt.as_bytes().to_vec(), "Argon2Parameters")?,
            memory_cost: self.params.memory_cost,
            time_cost: self.params.time_cost,
            parallelism: self.params.parallelism,
            key_length: KEY_LENGTH as u32,
        };
        Ok(AlgorithmIdentifier {
            oid: oid::ALG_ARGON2ID,
            parameters: Some(asn1::to_any(&params, "Argon2Parameters")?),
        })
    }

    fn from_algorithm(alg: &AlgorithmIdentifier) -> Result<Self> {
        if alg.oid != oid::ALG_ARGON2ID {
            return Err(Error::UnsupportedFeature(format!(
                "key derivation algorithm {}",
                alg.oid
            )));
        }
        let any = alg
            .parameters
            .as_ref()
            .ok_or_else(|| Error::format("Argon2Parameters", "missing parameters"))?;
        let params: Argon2Parameters = asn1::decode_any(any, "Argon2Parameters")?;
        if params.key_length as usize != KEY_LENGTH {
            return Err(Error::UnsupportedFeature(format!(
                "derived key length {}",
                params.key_length
            )));
        }
        let kdf_params = KdfParams {
            memory_cost: params.memory_cost,
            time_cost: params.time_cost,
            parallelism: params.parallelism,
        };
        if !kdf_params.within_limits() {
            return Err(Error::UnsupportedFeature(format!(
                "Argon2 cost m={} t={} p={}",
                kdf_params.memory_cost, kdf_params.time_cost, kdf_params.parallelism
            )));
        }
        Ok(Self {
            salt: Salt::from_slice(params.salt.as_bytes())
                .map_err(|e| Error::format("Argon2Parameters", e))?,
            params: kdf_params,
        })
    }
}

/// A recipient that derives its KEK from a password.
#[derive(Clone)]
pub struct PasswordRecipient {
    password: Option<Zeroizing<String>>,
    kek: Option<KeyEncryptionKey>,
    kdf: Option<PasswordKdf>,
    default_params: KdfParams,
    encrypted_key: Vec<u8>,
}

impl PasswordRecipient {
    /// A fresh recipient for encrypting with `password`.
    pub fn new(password: &str) -> Self {
        Self::with_kdf_params(password, KdfParams::default())
    }

    /// A fresh recipient whose key derivation uses `params`.
    pub fn with_kdf_params(password: &str, params: KdfParams) -> Self {
        Self {
            password: Some(Zeroizing::new(password.to_string())),
            kek: None,
            kdf: None,
            default_params: params,
            encrypted_key: Vec::new(),
        }
    }

    fn from_info(info: PasswordRecipientInfo) -> Result<Option<Self>> {
        if info.key_encryption_algorithm.oid != oid::ALG_XCHACHA20_POLY1305_WRAP {
            debug!(algorithm = %info.key_encryption_algorithm.oid, "Unsupported password key wrap");
            return Ok(None);
        }
        let kdf = info
            .key_derivation_algorithm
            .as_ref()
            .map(PasswordKdf::from_algorithm)
            .transpose()?;
        Ok(Some(Self {
            password: None,
            kek: None,
            kdf,
            default_params: KdfParams::default(),
            encrypted_key: info.encrypted_key.as_bytes().to_vec(),
        }))
    }

    pub fn can_wrap(&self) -> bool {
        self.password.is_some() || (self.kek.is_some() && self.kdf.is_some())
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn kdf(&self) -> Option<&PasswordKdf> {
        self.kdf.as_ref()
    }

    fn wrap(&mut self, cek: &ContentKey) -> Result<Vec<u8>> {
        let kdf = match &self.kdf {
            Some(kdf) => kdf.clone(),
            None => {
                let kdf = PasswordKdf::generate(self.default_params);
                self.kdf = Some(kdf.clone());
                kdf
            }
        };

        let kek = match &self.kek {
            Some(kek) => kek.clone(),
            None => {
                let password = self.password.as_ref().ok_or_else(Error::key_not_available)?;
                let kek = kdf.derive(password)?;
                self.kek = Some(kek.clone());
                kek
            }
        };

        let info = PasswordRecipientInfo {
            version: 0,
            key_derivation_algorithm: Some(kdf.to_algorithm()?),
            key_encryption_algorithm: AlgorithmIdentifier::new(oid::ALG_XCHACHA20_POLY1305_WRAP),
            encrypted_key: asn1::octet_string(aead::wrap_key(&kek, cek)?, "PasswordRecipientInfo")?,
        };
        Ok(asn1::retag(
            asn1::encode(&info, "PasswordRecipientInfo")?,
            TAG_PWRI,
        ))
    }

    /// Try a password against the wrapped key.
    ///
    /// On success the password and KEK are kept so the document can be
    /// re-wrapped to the same recipient.
    ///
    /// # Errors
    /// - `KeyNotApplicable` if the password is wrong
    /// - `UnsupportedFeature` if the recipient carries no key derivation
    pub fn unwrap(&mut self, password: &str) -> Result<ContentKey> {
        let kdf = self.kdf.as_ref().ok_or_else(|| {
            Error::UnsupportedFeature("password recipient without key derivation".to_string())
        })?;
        let kek = kdf.derive(password)?;
        let cek = aead::unwrap_key(&kek, &self.encrypted_key)?;

        self.password = Some(Zeroizing::new(password.to_string()));
        self.kek = Some(kek);
        Ok(cek)
    }

    /// Whether `password` derives the KEK this recipient last unwrapped with.
    ///
    /// Compares derived keys only; the wrapped key is not touched.
    pub fn did_unwrap_with(&self, password: &str) -> Result<bool> {
        match (&self.kdf, &self.kek) {
            (Some(kdf), Some(kek)) => Ok(kdf.derive(password)?.ct_eq(kek)),
            _ => Ok(false),
        }
    }
}

impl fmt::Debug for PasswordRecipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordRecipient")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("kek", &self.kek)
            .field("kdf", &self.kdf)
            .finish_non_exhaustive()
    }
}

/// A recipient holding a pre-shared symmetric key, named by an opaque id.
#[derive(Debug, Clone)]
pub struct PreSharedKeyRecipient {
    key_identifier: Vec<u8>,
    kek: Option<KeyEncryptionKey>,
    encrypted_key: Vec<u8>,
}

impl PreSharedKeyRecipient {
    /// A fresh recipient with a random 12-byte id and random key.
    pub fn generate() -> Self {
        Self::new(generate_key_identifier(), KeyEncryptionKey::generate())
    }

    pub fn new(key_identifier: Vec<u8>, kek: KeyEncryptionKey) -> Self {
        Self {
            key_identifier,
            kek: Some(kek),
            encrypted_key: Vec::new(),
        }
    }

    fn from_info(info: KekRecipientInfo) -> Option<Self> {
        if info.key_encryption_algorithm.oid != oid::ALG_XCHACHA20_POLY1305_WRAP {
            debug!(algorithm = %info.key_encryption_algorithm.oid, "Unsupported KEK key wrap");
            return None;
        }
        Some(Self {
            key_identifier: info.kekid.key_identifier.as_bytes().to_vec(),
            kek: None,
            encrypted_key: info.encrypted_key.as_bytes().to_vec(),
        })
    }

    pub fn key_identifier(&self) -> &[u8] {
        &self.key_identifier
    }

    pub fn kek(&self) -> Option<&KeyEncryptionKey> {
        self.kek.as_ref()
    }

    pub fn can_wrap(&self) -> bool {
        self.kek.is_some()
    }

    fn wrap(&mut self, cek: &ContentKey) -> Result<Vec<u8>> {
        let kek = self.kek.as_ref().ok_or_else(Error::key_not_available)?;
        let info = KekRecipientInfo {
            version: 4,
            kekid: KekIdentifier {
                key_identifier: asn1::octet_string(self.key_identifier.clone(), "KEKIdentifier")?,
            },
            key_encryption_algorithm: AlgorithmIdentifier::new(oid::ALG_XCHACHA20_POLY1305_WRAP),
            encrypted_key: asn1::octet_string(aead::wrap_key(kek, cek)?, "KEKRecipientInfo")?,
        };
        Ok(asn1::retag(asn1::encode(&info, "KEKRecipientInfo")?, TAG_KEKRI))
    }

    /// Unwrap with a candidate key, keeping it on success.
    pub fn unwrap(&mut self, kek: &KeyEncryptionKey) -> Result<ContentKey> {
        let cek = aead::unwrap_key(kek, &self.encrypted_key)?;
        self.kek = Some(kek.clone());
        Ok(cek)
    }
}

/// A recipient named by certificate, unwrapped with a private key.
#[derive(Debug, Clone)]
pub struct PublicKeyRecipient {
    rid: RecipientIdentifier,
    certificate: Option<Certificate>,
    encrypted_key: Vec<u8>,
}

impl PublicKeyRecipient {
    pub fn for_certificate(certificate: Certificate) -> Self {
        Self {
            rid: RecipientIdentifier::for_certificate(&certificate),
            certificate: Some(certificate),
            encrypted_key: Vec::new(),
        }
    }

    fn from_info(info: KeyTransRecipientInfo) -> Result<Option<Self>> {
        if info.key_encryption_algorithm.oid != oid::ALG_X25519_SEALED_BOX {
            debug!(algorithm = %info.key_encryption_algorithm.oid, "Unsupported key transport");
            return Ok(None);
        }
        Ok(Some(Self {
            rid: RecipientIdentifier::from_any(&info.rid)?,
            certificate: None,
            encrypted_key: info.encrypted_key.as_bytes().to_vec(),
        }))
    }

    pub fn identifier(&self) -> &RecipientIdentifier {
        &self.rid
    }

    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    pub fn can_wrap(&self) -> bool {
        self.certificate.is_some()
    }

    /// Fill in the certificate if it is missing.
    ///
    /// Looks in `certificates`, then `keypairs`, then the key source; the
    /// first match wins. Returns whether a certificate is now present.
    ///
    /// # Errors
    /// - `UserCancelled` if the key source lookup was declined
    pub fn resolve(
        &mut self,
        certificates: &[Certificate],
        keypairs: &[Arc<dyn Keypair>],
        key_source: Option<&dyn KeySource>,
        allow_interaction: bool,
    ) -> Result<bool> {
        if self.certificate.is_some() {
            return Ok(true);
        }

        let found = certificates
            .iter()
            .find(|cert| self.rid.matches_certificate(cert))
            .cloned()
            .or_else(|| {
                keypairs
                    .iter()
                    .map(|kp| kp.certificate())
                    .find(|cert| self.rid.matches_certificate(cert))
                    .cloned()
            });

        let found = match (found, key_source) {
            (Some(cert), _) => Some(cert),
            (None, Some(source)) => {
                let mut certs = source.find_certificates(&self.rid)?;
                if certs.is_empty() {
                    certs = source
                        .find_keypairs(&self.rid, allow_interaction)?
                        .iter()
                        .map(|kp| kp.certificate().clone())
                        .collect();
                }
                certs.into_iter().next()
            }
            (None, None) => None,
        };

        debug!(rid = %self.rid, resolved = found.is_some(), "Resolving public key recipient");
        self.certificate = found;
        Ok(self.certificate.is_some())
    }

    fn wrap(&mut self, cek: &ContentKey) -> Result<Vec<u8>> {
        let cert = self.certificate.as_ref().ok_or_else(Error::key_not_available)?;
        let version = match self.rid {
            RecipientIdentifier::IssuerSerial { .. } => 0,
            RecipientIdentifier::KeyIdentifier { .. } => 2,
        };
        let info = KeyTransRecipientInfo {
            version,
            rid: self.rid.to_any()?,
            key_encryption_algorithm: AlgorithmIdentifier::new(oid::ALG_X25519_SEALED_BOX),
            encrypted_key: asn1::octet_string(
                pubkey::seal_key(cek, cert.public_key())?,
                "KeyTransRecipientInfo",
            )?,
        };
        asn1::encode(&info, "KeyTransRecipientInfo")
    }

    /// Unwrap with a private key, adopting its certificate on success.
    pub fn unwrap(&mut self, keypair: &dyn Keypair) -> Result<ContentKey> {
        let cek = keypair.decrypt_key_transport(&self.encrypted_key)?;
        if self.certificate.is_none() {
            self.certificate = Some(keypair.certificate().clone());
        }
        Ok(cek)
    }
}

/// One intended recipient of a message.
#[derive(Debug, Clone)]
pub enum Recipient {
    Password(PasswordRecipient),
    PreSharedKey(PreSharedKeyRecipient),
    PublicKey(PublicKeyRecipient),
}

impl Recipient {
    pub fn password(password: &str) -> Self {
        Recipient::Password(PasswordRecipient::new(password))
    }

    pub fn pre_shared_key(key_identifier: Vec<u8>, kek: KeyEncryptionKey) -> Self {
        Recipient::PreSharedKey(PreSharedKeyRecipient::new(key_identifier, kek))
    }

    pub fn public_key(certificate: Certificate) -> Self {
        Recipient::PublicKey(PublicKeyRecipient::for_certificate(certificate))
    }

    /// Whether the recipient has the key material `wrap` needs.
    pub fn can_wrap(&self) -> bool {
        match self {
            Recipient::Password(r) => r.can_wrap(),
            Recipient::PreSharedKey(r) => r.can_wrap(),
            Recipient::PublicKey(r) => r.can_wrap(),
        }
    }

    /// Wrap the content key into a RecipientInfo.
    ///
    /// # Preconditions
    /// - `can_wrap()` returns true
    ///
    /// # Errors
    /// - `KeyNotAvailable` if the key material is missing
    pub fn wrap(&mut self, cek: &ContentKey) -> Result<Any> {
        if !self.can_wrap() {
            return Err(Error::key_not_available());
        }
        let der = match self {
            Recipient::Password(r) => r.wrap(cek)?,
            Recipient::PreSharedKey(r) => r.wrap(cek)?,
            Recipient::PublicKey(r) => r.wrap(cek)?,
        };
        asn1::decode(&der, "RecipientInfo")
    }

    /// Parse a RecipientInfo.
    ///
    /// Returns `None` for recipient kinds or algorithms this engine does
    /// not understand.
    ///
    /// # Errors
    /// - `Format` if a recognized RecipientInfo is malformed
    pub fn from_any(any: &Any) -> Result<Option<Self>> {
        let tag = asn1::tag_octet(any);
        let der = asn1::encode(any, "RecipientInfo")?;
        match tag {
            TAG_KTRI => {
                let info: KeyTransRecipientInfo = asn1::decode(&der, "KeyTransRecipientInfo")?;
                Ok(PublicKeyRecipient::from_info(info)?.map(Recipient::PublicKey))
            }
            TAG_KEKRI => {
                let info: KekRecipientInfo =
                    asn1::decode(&asn1::retag(der, TAG_KTRI), "KEKRecipientInfo")?;
                Ok(PreSharedKeyRecipient::from_info(info).map(Recipient::PreSharedKey))
            }
            TAG_PWRI => {
                let info: PasswordRecipientInfo =
                    asn1::decode(&asn1::retag(der, TAG_KTRI), "PasswordRecipientInfo")?;
                Ok(PasswordRecipient::from_info(info)?.map(Recipient::Password))
            }
            _ => Ok(None),
        }
    }

    pub fn is_password(&self) -> bool {
        matches!(self, Recipient::Password(_))
    }

    pub fn is_public_key(&self) -> bool {
        matches!(self, Recipient::PublicKey(_))
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Password(_) => write!(f, "password"),
            Recipient::PreSharedKey(r) => {
                write!(f, "pre-shared key ")?;
                r.key_identifier.iter().try_for_each(|b| write!(f, "{:02x}", b))
            }
            Recipient::PublicKey(r) => match &r.certificate {
                Some(cert) => write!(f, "public key of \"{}\"", cert.subject),
                None => write!(f, "public key {}", r.rid),
            },
        }
    }
}

#[cfg(test)]
pub(crate) fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::{LocalKeypair, MemoryKeyStore};

    fn roundtrip(recipient: &mut Recipient, cek: &ContentKey) -> Recipient {
        let any = recipient.wrap(cek).unwrap();
        Recipient::from_any(&any).unwrap().unwrap()
    }

    #[test]
    fn test_password_wrap_unwrap() {
        let cek = ContentKey::generate();
        let mut fresh = Recipient::Password(PasswordRecipient::with_kdf_params("secret", fast_kdf()));

        let Recipient::Password(mut parsed) = roundtrip(&mut fresh, &cek) else {
            panic!("expected password recipient");
        };
        assert!(!parsed.can_wrap());

        assert!(parsed.unwrap("wrong").unwrap_err().is_key_not_applicable());
        let recovered = parsed.unwrap("secret").unwrap();
        assert_eq!(recovered.as_bytes(), cek.as_bytes());
        assert!(parsed.can_wrap());
    }

    #[test]
    fn test_password_kdf_is_generated_once() {
        let cek = ContentKey::generate();
        let mut r = PasswordRecipient::with_kdf_params("pw", fast_kdf());
        assert!(r.kdf().is_none());

        r.wrap(&cek).unwrap();
        let first = r.kdf().cloned();
        r.wrap(&cek).unwrap();
        assert_eq!(r.kdf().cloned(), first);
    }

    #[test]
    fn test_did_unwrap_with() {
        let cek = ContentKey::generate();
        let mut fresh = Recipient::Password(PasswordRecipient::with_kdf_params("right", fast_kdf()));
        let Recipient::Password(mut parsed) = roundtrip(&mut fresh, &cek) else {
            panic!("expected password recipient");
        };

        assert!(!parsed.did_unwrap_with("right").unwrap());
        parsed.unwrap("right").unwrap();
        assert!(parsed.did_unwrap_with("right").unwrap());
        assert!(!parsed.did_unwrap_with("wrong").unwrap());
    }

    #[test]
    fn test_oversized_kdf_cost_is_rejected_before_derivation() {
        let mut crafted = Recipient::Password(PasswordRecipient {
            password: None,
            kek: Some(KeyEncryptionKey::generate()),
            kdf: Some(PasswordKdf {
                salt: Salt::generate(),
                params: KdfParams {
                    memory_cost: 16 * 1024 * 1024,
                    ..KdfParams::sensitive()
                },
            }),
            default_params: KdfParams::default(),
            encrypted_key: Vec::new(),
        });
        let any = crafted.wrap(&ContentKey::generate()).unwrap();

        let err = Recipient::from_any(&any).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature(_)));
    }

    #[test]
    fn test_pre_shared_key_roundtrip() {
        let cek = ContentKey::generate();
        let psk = PreSharedKeyRecipient::generate();
        let kek = psk.kek().unwrap().clone();
        let id = psk.key_identifier().to_vec();
        assert_eq!(id.len(), 12);

        let Recipient::PreSharedKey(mut parsed) = roundtrip(&mut Recipient::PreSharedKey(psk), &cek) else {
            panic!("expected pre-shared key recipient");
        };
        assert_eq!(parsed.key_identifier(), id.as_slice());
        assert!(parsed
            .unwrap(&KeyEncryptionKey::generate())
            .unwrap_err()
            .is_key_not_applicable());
        assert_eq!(parsed.unwrap(&kek).unwrap().as_bytes(), cek.as_bytes());
    }

    #[test]
    fn test_public_key_roundtrip() {
        let cek = ContentKey::generate();
        let alice = LocalKeypair::generate("Alice");
        let mut fresh = Recipient::public_key(alice.certificate().clone());

        let Recipient::PublicKey(mut parsed) = roundtrip(&mut fresh, &cek) else {
            panic!("expected public key recipient");
        };
        assert!(parsed.certificate().is_none());
        assert!(parsed.identifier().matches_certificate(alice.certificate()));

        let recovered = parsed.unwrap(&alice).unwrap();
        assert_eq!(recovered.as_bytes(), cek.as_bytes());
        assert_eq!(parsed.certificate(), Some(alice.certificate()));
    }

    #[test]
    fn test_wrap_without_material_is_key_not_available() {
        let mut r = Recipient::PublicKey(PublicKeyRecipient {
            rid: RecipientIdentifier::KeyIdentifier { ski: vec![1] },
            certificate: None,
            encrypted_key: Vec::new(),
        });
        assert!(!r.can_wrap());
        let err = r.wrap(&ContentKey::generate()).unwrap_err();
        assert!(matches!(err, Error::KeyNotAvailable { .. }));
    }

    #[test]
    fn test_resolve_order() {
        let alice = LocalKeypair::generate("Alice");
        let cert = alice.certificate().clone();
        let rid = RecipientIdentifier::for_certificate(&cert);
        let unresolved = || PublicKeyRecipient {
            rid: rid.clone(),
            certificate: None,
            encrypted_key: Vec::new(),
        };

        let store = MemoryKeyStore::new().with_certificate(cert.clone());

        // Supplied certificates win, so the key source is never asked.
        let mut r = unresolved();
        assert!(r.resolve(&[cert.clone()], &[], Some(&store as &dyn KeySource), false).unwrap());
        assert_eq!(store.certificate_lookups(), 0);

        let keypairs: Vec<Arc<dyn Keypair>> = vec![Arc::new(alice.clone())];
        let mut r = unresolved();
        assert!(r.resolve(&[], &keypairs, Some(&store as &dyn KeySource), false).unwrap());
        assert_eq!(store.certificate_lookups(), 0);

        let mut r = unresolved();
        assert!(r.resolve(&[], &[], Some(&store as &dyn KeySource), false).unwrap());
        assert_eq!(store.certificate_lookups(), 1);

        let mut r = unresolved();
        assert!(!r.resolve(&[], &[], None, false).unwrap());
    }

    #[test]
    fn test_unknown_recipient_kind_is_skipped() {
        // [4] other recipient info
        let any: Any = asn1::decode(&[0xA4, 0x00], "RecipientInfo").unwrap();
        assert!(Recipient::from_any(&any).unwrap().is_none());
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let r = PasswordRecipient::new("hunter2");
        assert!(!format!("{:?}", r).contains("hunter2"));
    }
}
