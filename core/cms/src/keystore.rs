//! The key store boundary.
//!
//! The core never talks to a keychain or a terminal directly. It asks a
//! [`KeySource`] for certificates, private keys and passwords, and treats
//! every call as blocking.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::identifier::{Certificate, RecipientIdentifier};
use sealdoc_common::{Error, Result};
use sealdoc_crypto::keys::ContentKey;
use sealdoc_crypto::pubkey::{self, AgreementKeypair};

/// A private key able to open content keys sealed to its certificate.
pub trait Keypair: Send + Sync {
    /// The certificate holding the matching public key.
    fn certificate(&self) -> &Certificate;

    /// Open a content key sealed to this keypair.
    ///
    /// # Errors
    /// - `KeyNotApplicable` if the wrapped key was sealed to another key
    fn decrypt_key_transport(&self, wrapped: &[u8]) -> Result<ContentKey>;
}

/// Certificate, private key and password lookup.
///
/// Implementations signal a declined prompt or lookup with
/// `Error::UserCancelled`, which recovery treats differently from "no key".
pub trait KeySource: Send + Sync {
    /// Ask for a password.
    ///
    /// `failure_count` is the number of wrong passwords tried so far.
    fn prompt_for_password(&self, failure_count: usize, hint: Option<&str>) -> Result<String>;

    /// Certificates matching an identifier.
    fn find_certificates(&self, _rid: &RecipientIdentifier) -> Result<Vec<Certificate>> {
        Ok(Vec::new())
    }

    /// Private keys matching an identifier.
    fn find_keypairs(
        &self,
        _rid: &RecipientIdentifier,
        _allow_interaction: bool,
    ) -> Result<Vec<Arc<dyn Keypair>>> {
        Ok(Vec::new())
    }
}

/// A keypair held in memory.
#[derive(Clone)]
pub struct LocalKeypair {
    certificate: Certificate,
    agreement: AgreementKeypair,
}

impl LocalKeypair {
    /// Generate a keypair with a self-issued certificate.
    pub fn generate(subject: &str) -> Self {
        let agreement = AgreementKeypair::generate();
        let certificate = Certificate::self_issued(subject, &agreement.public_bytes());
        Self {
            certificate,
            agreement,
        }
    }

    /// Rebuild a keypair from its certificate and secret key.
    ///
    /// # Errors
    /// - `InvalidInput` if the secret does not belong to the certificate
    pub fn from_parts(certificate: Certificate, secret: [u8; 32]) -> Result<Self> {
        let agreement = AgreementKeypair::from_secret_bytes(secret);
        if agreement.public_bytes().as_slice() != certificate.public_key() {
            return Err(Error::InvalidInput(
                "Secret key does not match certificate".to_string(),
            ));
        }
        Ok(Self {
            certificate,
            agreement,
        })
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.agreement.secret_bytes()
    }
}

impl Keypair for LocalKeypair {
    fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    fn decrypt_key_transport(&self, wrapped: &[u8]) -> Result<ContentKey> {
        pubkey::open_key(wrapped, &self.agreement)
    }
}

impl fmt::Debug for LocalKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeypair")
            .field("subject", &self.certificate.subject)
            .finish_non_exhaustive()
    }
}

/// A scripted, in-memory key source.
///
/// Passwords are answered from a queue (`None` answers as a cancel) and
/// every prompt and lookup is recorded.
#[derive(Default)]
pub struct MemoryKeyStore {
    answers: Mutex<VecDeque<Option<String>>>,
    prompts: Mutex<Vec<(usize, Option<String>)>>,
    certificates: Vec<Certificate>,
    keypairs: Vec<Arc<dyn Keypair>>,
    cancel_keypair_lookups: bool,
    certificate_lookups: AtomicUsize,
    keypair_lookups: AtomicUsize,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a password answer.
    pub fn with_password(self, password: &str) -> Self {
        self.lock_answers().push_back(Some(password.to_string()));
        self
    }

    /// Queue a cancelled prompt.
    pub fn with_cancelled_prompt(self) -> Self {
        self.lock_answers().push_back(None);
        self
    }

    pub fn with_certificate(mut self, certificate: Certificate) -> Self {
        self.certificates.push(certificate);
        self
    }

    pub fn with_keypair(mut self, keypair: Arc<dyn Keypair>) -> Self {
        self.keypairs.push(keypair);
        self
    }

    /// Make every keypair lookup fail as if the user declined it.
    pub fn cancelling_keypair_lookups(mut self) -> Self {
        self.cancel_keypair_lookups = true;
        self
    }

    /// The `(failure_count, hint)` of every prompt so far.
    pub fn prompts(&self) -> Vec<(usize, Option<String>)> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn certificate_lookups(&self) -> usize {
        self.certificate_lookups.load(Ordering::SeqCst)
    }

    pub fn keypair_lookups(&self) -> usize {
        self.keypair_lookups.load(Ordering::SeqCst)
    }

    fn lock_answers(&self) -> std::sync::MutexGuard<'_, VecDeque<Option<String>>> {
        self.answers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeySource for MemoryKeyStore {
    fn prompt_for_password(&self, failure_count: usize, hint: Option<&str>) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((failure_count, hint.map(str::to_string)));

        match self.lock_answers().pop_front() {
            Some(Some(password)) => Ok(password),
            Some(None) | None => Err(Error::UserCancelled),
        }
    }

    fn find_certificates(&self, rid: &RecipientIdentifier) -> Result<Vec<Certificate>> {
        self.certificate_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .certificates
            .iter()
            .filter(|cert| rid.matches_certificate(cert))
            .cloned()
            .collect())
    }

    fn find_keypairs(
        &self,
        rid: &RecipientIdentifier,
        _allow_interaction: bool,
    ) -> Result<Vec<Arc<dyn Keypair>>> {
        self.keypair_lookups.fetch_add(1, Ordering::SeqCst);
        if self.cancel_keypair_lookups {
            return Err(Error::UserCancelled);
        }
        Ok(self
            .keypairs
            .iter()
            .filter(|kp| rid.matches_certificate(kp.certificate()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealdoc_crypto::pubkey::seal_key;

    #[test]
    fn test_local_keypair_opens_sealed_key() {
        let keypair = LocalKeypair::generate("Alice");
        let cek = ContentKey::generate();
        let sealed = seal_key(&cek, keypair.certificate().public_key()).unwrap();

        let opened = keypair.decrypt_key_transport(&sealed).unwrap();
        assert_eq!(opened.as_bytes(), cek.as_bytes());
    }

    #[test]
    fn test_from_parts_checks_certificate() {
        let alice = LocalKeypair::generate("Alice");
        let bob = LocalKeypair::generate("Bob");

        assert!(LocalKeypair::from_parts(alice.certificate().clone(), alice.secret_bytes()).is_ok());
        assert!(LocalKeypair::from_parts(alice.certificate().clone(), bob.secret_bytes()).is_err());
    }

    #[test]
    fn test_memory_store_scripted_prompts() {
        let store = MemoryKeyStore::new()
            .with_password("first")
            .with_cancelled_prompt();

        assert_eq!(store.prompt_for_password(0, Some("hint")).unwrap(), "first");
        assert!(store.prompt_for_password(1, None).unwrap_err().is_user_cancelled());
        assert!(store.prompt_for_password(2, None).unwrap_err().is_user_cancelled());

        assert_eq!(
            store.prompts(),
            vec![(0, Some("hint".to_string())), (1, None), (2, None)]
        );
    }

    #[test]
    fn test_memory_store_lookups() {
        let alice = Arc::new(LocalKeypair::generate("Alice"));
        let store = MemoryKeyStore::new()
            .with_certificate(alice.certificate().clone())
            .with_keypair(alice.clone());

        let rid = RecipientIdentifier::for_certificate(alice.certificate());
        assert_eq!(store.find_certificates(&rid).unwrap().len(), 1);
        assert_eq!(store.find_keypairs(&rid, false).unwrap().len(), 1);

        let other = RecipientIdentifier::KeyIdentifier { ski: vec![0; 20] };
        assert!(store.find_keypairs(&other, false).unwrap().is_empty());

        assert_eq!(store.certificate_lookups(), 1);
        assert_eq!(store.keypair_lookups(), 2);
    }
}
