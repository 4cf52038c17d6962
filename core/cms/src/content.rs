//! Content types an envelope layer can declare.

use der::asn1::ObjectIdentifier;
use std::fmt;

use crate::oid;

const KNOWN: [ContentType; 11] = [
    ContentType::Data,
    ContentType::Xml,
    ContentType::SignedData,
    ContentType::EnvelopedData,
    ContentType::DigestedData,
    ContentType::EncryptedData,
    ContentType::AuthData,
    ContentType::AuthEnvelopedData,
    ContentType::CompressedData,
    ContentType::ContentCollection,
    ContentType::ContentWithAttributes,
];

/// The type of a content layer, as named by its object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Data,
    Xml,
    SignedData,
    EnvelopedData,
    DigestedData,
    EncryptedData,
    AuthData,
    AuthEnvelopedData,
    CompressedData,
    ContentCollection,
    ContentWithAttributes,
    Unknown(ObjectIdentifier),
}

impl ContentType {
    /// Map an object identifier to a content type.
    pub fn from_oid(value: ObjectIdentifier) -> Self {
        KNOWN
            .iter()
            .find(|ty| ty.oid() == value)
            .copied()
            .unwrap_or(ContentType::Unknown(value))
    }

    /// The object identifier written for this content type.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            ContentType::Data => oid::DATA,
            ContentType::Xml => oid::XML_DATA,
            ContentType::SignedData => oid::SIGNED_DATA,
            ContentType::EnvelopedData => oid::ENVELOPED_DATA,
            ContentType::DigestedData => oid::DIGESTED_DATA,
            ContentType::EncryptedData => oid::ENCRYPTED_DATA,
            ContentType::AuthData => oid::AUTH_DATA,
            ContentType::AuthEnvelopedData => oid::AUTH_ENVELOPED_DATA,
            ContentType::CompressedData => oid::COMPRESSED_DATA,
            ContentType::ContentCollection => oid::CONTENT_COLLECTION,
            ContentType::ContentWithAttributes => oid::CONTENT_WITH_ATTRIBUTES,
            ContentType::Unknown(other) => *other,
        }
    }

    /// Whether this is leaf plaintext (`data` or XML).
    pub fn is_data(&self) -> bool {
        matches!(self, ContentType::Data | ContentType::Xml)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Unknown(other) => write!(f, "unknown content type {}", other),
            known => write!(f, "{:?}", known),
        }
    }
}
