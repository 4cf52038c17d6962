//! Encryption settings of a document.

use std::sync::Arc;

use sealdoc_cms::{
    Certificate, CmsOptions, ExpandedContent, KeySource, Keypair, PasswordRecipient,
    PublicKeyRecipient, Recipient,
};
use sealdoc_common::{Error, Result};
use sealdoc_crypto::KdfParams;

/// Who can open a document and how it is written.
///
/// A document read from disk yields its settings so it can be saved again
/// to the same recipients.
#[derive(Debug, Clone, Default)]
pub struct EncryptionSettings {
    pub options: CmsOptions,
    /// Plaintext hint shown at the password prompt.
    pub password_hint: Option<String>,
    /// Certificates carried alongside the ciphertext.
    pub certificates: Vec<Certificate>,
    /// Also write the hint as a `.iwph` file inside packages.
    pub legacy_hint: bool,
    /// Key derivation cost for newly set passwords.
    pub kdf_params: KdfParams,
    recipients: Vec<Recipient>,
    discarded_recipients: usize,
}

impl EncryptionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings of a document that was just unwrapped.
    ///
    /// # Errors
    /// - `Format` if an embedded certificate is malformed
    pub fn from_expanded(expanded: &ExpandedContent) -> Result<Self> {
        Ok(Self {
            certificates: expanded.certificates()?,
            recipients: expanded.all_recipients.clone(),
            discarded_recipients: expanded.discarded_recipients,
            ..Self::default()
        })
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    pub fn recipients_mut(&mut self) -> &mut [Recipient] {
        &mut self.recipients
    }

    /// Replace any password recipients with one for `password`.
    ///
    /// `None` removes password access altogether.
    pub fn set_password(&mut self, password: Option<&str>) {
        self.recipients.retain(|r| !r.is_password());
        if let Some(password) = password {
            self.recipients.insert(
                0,
                Recipient::Password(PasswordRecipient::with_kdf_params(password, self.kdf_params)),
            );
        }
    }

    pub fn has_password(&self) -> bool {
        self.recipients.iter().any(Recipient::is_password)
    }

    pub fn has_public_key_recipients(&self) -> bool {
        self.recipients.iter().any(Recipient::is_public_key)
    }

    pub fn public_key_recipients(&self) -> Vec<&PublicKeyRecipient> {
        self.recipients
            .iter()
            .filter_map(|r| match r {
                Recipient::PublicKey(pk) => Some(pk),
                _ => None,
            })
            .collect()
    }

    /// Add a recipient for `certificate`, returning its position.
    ///
    /// If a recipient already names this certificate it is kept (and given
    /// the certificate if it lacked one) instead of adding a duplicate.
    pub fn add_certificate_recipient(&mut self, certificate: Certificate) -> usize {
        let existing = self.recipients.iter().position(|r| match r {
            Recipient::PublicKey(pk) => pk.identifier().matches_certificate(&certificate),
            _ => false,
        });

        match existing {
            Some(index) => {
                if let Recipient::PublicKey(pk) = &mut self.recipients[index] {
                    if pk.certificate().is_none() {
                        *pk = PublicKeyRecipient::for_certificate(certificate);
                    }
                }
                index
            }
            None => {
                self.recipients
                    .push(Recipient::PublicKey(PublicKeyRecipient::for_certificate(
                        certificate,
                    )));
                self.recipients.len() - 1
            }
        }
    }

    /// Remove the recipient at `index`.
    ///
    /// # Errors
    /// - `NotFound` if there is no such recipient
    pub fn remove_recipient(&mut self, index: usize) -> Result<Recipient> {
        if index >= self.recipients.len() {
            return Err(Error::NotFound(format!("Recipient {} not found", index)));
        }
        Ok(self.recipients.remove(index))
    }

    /// Fill in missing certificates of public key recipients.
    ///
    /// Returns how many recipients still cannot be written to.
    ///
    /// # Errors
    /// - `UserCancelled` if a key source lookup was declined
    pub fn resolve_recipients(
        &mut self,
        keypairs: &[Arc<dyn Keypair>],
        key_source: Option<&dyn KeySource>,
        allow_interaction: bool,
    ) -> Result<usize> {
        for recipient in &mut self.recipients {
            if let Recipient::PublicKey(pk) = recipient {
                pk.resolve(&self.certificates, keypairs, key_source, allow_interaction)?;
            }
        }
        Ok(self.unusable_recipient_count())
    }

    /// Recipients that could not be rebuilt, including ones that were
    /// dropped because their kind is not understood.
    pub fn unusable_recipient_count(&self) -> usize {
        self.recipients.iter().filter(|r| !r.can_wrap()).count() + self.discarded_recipients
    }

    /// Every recipient the document had, understood or not.
    pub fn recipient_count(&self) -> usize {
        self.recipients.len() + self.discarded_recipients
    }

    /// A short summary for display.
    pub fn describe(&self) -> String {
        match self.recipient_count() {
            0 => "Not Encrypted".to_string(),
            _ if self.has_password() => "Password Set".to_string(),
            1 => "1 Key".to_string(),
            n => format!("{} Keys", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealdoc_cms::LocalKeypair;

    #[test]
    fn test_set_password_replaces_existing() {
        let alice = LocalKeypair::generate("Alice");
        let mut settings = EncryptionSettings::new();
        settings.add_certificate_recipient(alice.certificate().clone());
        settings.set_password(Some("one"));
        settings.set_password(Some("two"));

        assert_eq!(settings.recipients().len(), 2);
        assert!(settings.recipients()[0].is_password());
        assert!(settings.has_password());

        settings.set_password(None);
        assert!(!settings.has_password());
        assert_eq!(settings.recipients().len(), 1);
    }

    #[test]
    fn test_add_certificate_recipient_deduplicates() {
        let alice = LocalKeypair::generate("Alice");
        let bob = LocalKeypair::generate("Bob");
        let mut settings = EncryptionSettings::new();

        let first = settings.add_certificate_recipient(alice.certificate().clone());
        settings.add_certificate_recipient(bob.certificate().clone());
        let again = settings.add_certificate_recipient(alice.certificate().clone());

        assert_eq!(first, again);
        assert_eq!(
            settings.public_key_recipients()[0].certificate(),
            Some(alice.certificate())
        );
        assert_eq!(settings.public_key_recipients().len(), 2);
        assert!(settings.has_public_key_recipients());
    }

    #[test]
    fn test_remove_recipient() {
        let mut settings = EncryptionSettings::new();
        settings.set_password(Some("pw"));

        assert!(settings.remove_recipient(0).unwrap().is_password());
        assert!(matches!(settings.remove_recipient(0), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_describe() {
        let mut settings = EncryptionSettings::new();
        assert_eq!(settings.describe(), "Not Encrypted");

        settings.add_certificate_recipient(LocalKeypair::generate("A").certificate().clone());
        assert_eq!(settings.describe(), "1 Key");

        settings.add_certificate_recipient(LocalKeypair::generate("B").certificate().clone());
        assert_eq!(settings.describe(), "2 Keys");

        settings.set_password(Some("pw"));
        assert_eq!(settings.describe(), "Password Set");
        assert_eq!(settings.recipient_count(), 3);
        assert_eq!(settings.unusable_recipient_count(), 0);
    }
}
