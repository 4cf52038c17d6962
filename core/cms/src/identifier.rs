//! Certificates and the identifiers that name them.
//!
//! A recipient names its key by issuer and serial or by subject key
//! identifier, never by the key itself.

use der::asn1::{Any, OctetString};
use der::Sequence;
use std::fmt;

use crate::asn1::{self, IssuerAndSerialNumber, TAG_KTRI, TAG_SKI};
use sealdoc_common::{Error, Result};
use sealdoc_crypto::keys::{random_bytes, subject_key_identifier};

/// Identifies an asymmetric key without containing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecipientIdentifier {
    IssuerSerial { issuer: String, serial: Vec<u8> },
    KeyIdentifier { ski: Vec<u8> },
}

/// The identifying metadata of a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIdentifiers {
    pub issuer: String,
    pub serial: Vec<u8>,
    pub ski: Option<Vec<u8>>,
}

impl RecipientIdentifier {
    /// The identifier a new recipient uses for this certificate.
    ///
    /// Prefers the subject key identifier when the certificate has one.
    pub fn for_certificate(cert: &Certificate) -> Self {
        match &cert.ski {
            Some(ski) => RecipientIdentifier::KeyIdentifier { ski: ski.clone() },
            None => RecipientIdentifier::IssuerSerial {
                issuer: cert.issuer.clone(),
                serial: cert.serial.clone(),
            },
        }
    }

    pub fn matches(&self, ids: &CertificateIdentifiers) -> bool {
        match self {
            RecipientIdentifier::IssuerSerial { issuer, serial } => {
                *issuer == ids.issuer && *serial == ids.serial
            }
            RecipientIdentifier::KeyIdentifier { ski } => ids.ski.as_deref() == Some(ski.as_slice()),
        }
    }

    pub fn matches_certificate(&self, cert: &Certificate) -> bool {
        self.matches(&cert.identifiers())
    }

    /// Encode as the `rid` CHOICE of a key transport RecipientInfo.
    pub(crate) fn to_any(&self) -> Result<Any> {
        match self {
            RecipientIdentifier::IssuerSerial { issuer, serial } => {
                let value = IssuerAndSerialNumber {
                    issuer: issuer.clone(),
                    serial_number: asn1::octet_string(serial.clone(), "IssuerAndSerialNumber")?,
                };
                asn1::to_any(&value, "IssuerAndSerialNumber")
            }
            RecipientIdentifier::KeyIdentifier { ski } => {
                let octets = asn1::octet_string(ski.clone(), "SubjectKeyIdentifier")?;
                let der = asn1::retag(
                    asn1::encode(&octets, "SubjectKeyIdentifier")?,
                    TAG_SKI,
                );
                asn1::decode(&der, "SubjectKeyIdentifier")
            }
        }
    }

    /// Decode the `rid` CHOICE of a key transport RecipientInfo.
    pub(crate) fn from_any(any: &Any) -> Result<Self> {
        match asn1::tag_octet(any) {
            TAG_KTRI => {
                let value: IssuerAndSerialNumber = asn1::decode_any(any, "IssuerAndSerialNumber")?;
                Ok(RecipientIdentifier::IssuerSerial {
                    issuer: value.issuer,
                    serial: value.serial_number.as_bytes().to_vec(),
                })
            }
            TAG_SKI => Ok(RecipientIdentifier::KeyIdentifier {
                ski: any.value().to_vec(),
            }),
            other => Err(Error::format(
                "RecipientIdentifier",
                format!("unexpected tag 0x{:02x}", other),
            )),
        }
    }
}

impl fmt::Display for RecipientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientIdentifier::IssuerSerial { issuer, serial } => {
                write!(f, "issuer \"{}\" serial ", issuer)?;
                serial.iter().try_for_each(|b| write!(f, "{:02x}", b))
            }
            RecipientIdentifier::KeyIdentifier { ski } => {
                write!(f, "key ")?;
                ski.iter().try_for_each(|b| write!(f, "{:02x}", b))
            }
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct CertificateDer {
    subject: String,
    issuer: String,
    serial: OctetString,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    ski: Option<OctetString>,
    public_key: OctetString,
}

/// A minimal certificate binding a subject to an X25519 public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub subject: String,
    pub issuer: String,
    pub serial: Vec<u8>,
    pub ski: Option<Vec<u8>>,
    pub public_key: Vec<u8>,
}

impl Certificate {
    /// Issue a self-signed certificate for a public key.
    ///
    /// # Postconditions
    /// - Issuer equals subject
    /// - Serial is 8 random bytes
    /// - The subject key identifier is derived from the public key
    pub fn self_issued(subject: &str, public_key: &[u8]) -> Self {
        Self {
            subject: subject.to_string(),
            issuer: subject.to_string(),
            serial: random_bytes(8),
            ski: Some(subject_key_identifier(public_key)),
            public_key: public_key.to_vec(),
        }
    }

    pub fn identifiers(&self) -> CertificateIdentifiers {
        CertificateIdentifiers {
            issuer: self.issuer.clone(),
            serial: self.serial.clone(),
            ski: self.ski.clone(),
        }
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        let ski = self
            .ski
            .as_ref()
            .map(|ski| asn1::octet_string(ski.clone(), "Certificate"))
            .transpose()?;
        let value = CertificateDer {
            subject: self.subject.clone(),
            issuer: self.issuer.clone(),
            serial: asn1::octet_string(self.serial.clone(), "Certificate")?,
            ski,
            public_key: asn1::octet_string(self.public_key.clone(), "Certificate")?,
        };
        asn1::encode(&value, "Certificate")
    }

    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let value: CertificateDer = asn1::decode(bytes, "Certificate")?;
        Ok(Self {
            subject: value.subject,
            issuer: value.issuer,
            serial: value.serial.as_bytes().to_vec(),
            ski: value.ski.map(|ski| ski.as_bytes().to_vec()),
            public_key: value.public_key.as_bytes().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert() -> Certificate {
        Certificate::self_issued("Alice", &[7u8; 32])
    }

    #[test]
    fn test_certificate_der_roundtrip() {
        let cert = cert();
        let der = cert.to_der().unwrap();
        assert_eq!(Certificate::from_der(&der).unwrap(), cert);
    }

    #[test]
    fn test_certificate_without_ski() {
        let mut cert = cert();
        cert.ski = None;
        let back = Certificate::from_der(&cert.to_der().unwrap()).unwrap();
        assert_eq!(back.ski, None);
        assert!(matches!(
            RecipientIdentifier::for_certificate(&back),
            RecipientIdentifier::IssuerSerial { .. }
        ));
    }

    #[test]
    fn test_identifier_matching() {
        let alice = cert();
        let bob = Certificate::self_issued("Bob", &[8u8; 32]);

        let rid = RecipientIdentifier::for_certificate(&alice);
        assert!(rid.matches_certificate(&alice));
        assert!(!rid.matches_certificate(&bob));

        let by_serial = RecipientIdentifier::IssuerSerial {
            issuer: alice.issuer.clone(),
            serial: alice.serial.clone(),
        };
        assert!(by_serial.matches_certificate(&alice));
        assert!(!by_serial.matches_certificate(&bob));
    }

    #[test]
    fn test_rid_any_roundtrip() {
        let alice = cert();
        for rid in [
            RecipientIdentifier::for_certificate(&alice),
            RecipientIdentifier::IssuerSerial {
                issuer: "CA".to_string(),
                serial: vec![1, 2, 3],
            },
        ] {
            let any = rid.to_any().unwrap();
            assert_eq!(RecipientIdentifier::from_any(&any).unwrap(), rid);
        }
    }

    #[test]
    fn test_garbage_certificate_is_format_error() {
        let err = Certificate::from_der(b"nope").unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }
}
