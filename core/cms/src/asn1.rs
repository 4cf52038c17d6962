//! DER structures for the envelope format.
//!
//! The layout follows CMS. Collections are `SEQUENCE OF` so that recipient
//! and part order survive a round trip. RecipientInfo is a CHOICE told apart
//! by its leading tag octet: `SEQUENCE` for key transport, `[2]` for KEK and
//! `[3]` for password recipients.

use der::asn1::{Any, ObjectIdentifier, OctetString};
use der::{Decode, Encode, Sequence, Tagged};

use crate::content::ContentType;
use crate::oid;
use sealdoc_common::{Error, Result};

/// Leading octet of a key transport RecipientInfo (plain SEQUENCE).
pub const TAG_KTRI: u8 = 0x30;
/// Leading octet of a KEK RecipientInfo (`[2]` constructed).
pub const TAG_KEKRI: u8 = 0xA2;
/// Leading octet of a password RecipientInfo (`[3]` constructed).
pub const TAG_PWRI: u8 = 0xA3;
/// Leading octet of a subject key identifier rid (`[0]` primitive).
pub const TAG_SKI: u8 = 0x80;

/// ```text
/// ContentInfo ::= SEQUENCE {
///   contentType ContentType,
///   content [0] EXPLICIT ANY DEFINED BY contentType }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ContentInfo {
    pub content_type: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    pub content: Any,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct EncapsulatedContentInfo {
    pub econtent_type: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub econtent: Option<OctetString>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct AlgorithmIdentifier {
    pub oid: ObjectIdentifier,
    pub parameters: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Attribute {
    pub oid: ObjectIdentifier,
    pub values: Vec<Any>,
}

/// Signature-less SignedData is only ever used as a certificate carrier.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SignedData {
    pub version: u8,
    pub digest_algorithms: Vec<AlgorithmIdentifier>,
    pub encap_content_info: EncapsulatedContentInfo,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub certificates: Option<Vec<Any>>,
    pub signer_infos: Vec<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct EncryptedContentInfo {
    pub content_type: ObjectIdentifier,
    pub content_encryption_algorithm: AlgorithmIdentifier,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub encrypted_content: Option<OctetString>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct EnvelopedData {
    pub version: u8,
    pub recipient_infos: Vec<Any>,
    pub encrypted_content_info: EncryptedContentInfo,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub unprotected_attrs: Option<Vec<Attribute>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct AuthEnvelopedData {
    pub version: u8,
    pub recipient_infos: Vec<Any>,
    pub auth_encrypted_content_info: EncryptedContentInfo,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub auth_attrs: Option<Vec<Attribute>>,
    pub mac: OctetString,
    #[asn1(context_specific = "2", tag_mode = "IMPLICIT", optional = "true")]
    pub unauth_attrs: Option<Vec<Attribute>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CompressedData {
    pub version: u8,
    pub compression_algorithm: AlgorithmIdentifier,
    pub encap_content_info: EncapsulatedContentInfo,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ContentWithAttributes {
    pub content: ContentInfo,
    pub attrs: Vec<Attribute>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct IssuerAndSerialNumber {
    pub issuer: String,
    pub serial_number: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct KeyTransRecipientInfo {
    pub version: u8,
    pub rid: Any,
    pub key_encryption_algorithm: AlgorithmIdentifier,
    pub encrypted_key: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct KekIdentifier {
    pub key_identifier: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct KekRecipientInfo {
    pub version: u8,
    pub kekid: KekIdentifier,
    pub key_encryption_algorithm: AlgorithmIdentifier,
    pub encrypted_key: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PasswordRecipientInfo {
    pub version: u8,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub key_derivation_algorithm: Option<AlgorithmIdentifier>,
    pub key_encryption_algorithm: AlgorithmIdentifier,
    pub encrypted_key: OctetString,
}

/// Parameters of the Argon2id key derivation algorithm identifier.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Argon2Parameters {
    pub salt: OctetString,
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
    pub key_length: u32,
}

/// Decode a DER structure, naming it in any format error.
pub fn decode<T>(bytes: &[u8], structure: &str) -> Result<T>
where
    T: for<'a> Decode<'a>,
{
    T::from_der(bytes).map_err(|e| Error::format(structure, e))
}

/// Re-decode an `Any` as a concrete structure.
pub fn decode_any<T>(any: &Any, structure: &str) -> Result<T>
where
    T: for<'a> Decode<'a>,
{
    let der = encode(any, structure)?;
    decode(&der, structure)
}

/// Encode a DER structure, naming it in any error.
pub fn encode<T: Encode>(value: &T, structure: &str) -> Result<Vec<u8>> {
    value.to_der().map_err(|e| Error::format(structure, e))
}

/// Encode a structure and hold it as an `Any`.
pub fn to_any<T: Encode>(value: &T, structure: &str) -> Result<Any> {
    let der = encode(value, structure)?;
    decode(&der, structure)
}

/// Replace the leading tag octet of a DER encoding.
///
/// Implicit tagging of a SEQUENCE keeps the length and body, so only the
/// identifier octet changes.
pub fn retag(mut der: Vec<u8>, tag: u8) -> Vec<u8> {
    if let Some(first) = der.first_mut() {
        *first = tag;
    }
    der
}

/// The leading tag octet of an `Any`.
pub fn tag_octet(any: &Any) -> u8 {
    u8::from(any.tag())
}

pub fn octet_string(bytes: impl Into<Vec<u8>>, structure: &str) -> Result<OctetString> {
    OctetString::new(bytes.into()).map_err(|e| Error::format(structure, e))
}

/// Wrap content of the given type into a ContentInfo.
///
/// Leaf data travels as an OCTET STRING; every other type is already DER.
pub fn content_info(content_type: ContentType, bytes: &[u8]) -> Result<ContentInfo> {
    let content = if content_type.is_data() {
        to_any(&octet_string(bytes, "ContentInfo")?, "ContentInfo")?
    } else {
        decode(bytes, "ContentInfo")?
    };
    Ok(ContentInfo {
        content_type: content_type.oid(),
        content,
    })
}

/// Split a ContentInfo into its type and the bytes of the next layer.
pub fn open_content_info(info: &ContentInfo) -> Result<(ContentType, Vec<u8>)> {
    let content_type = ContentType::from_oid(info.content_type);
    let bytes = if content_type.is_data() {
        let octets: OctetString = decode_any(&info.content, "ContentInfo")?;
        octets.as_bytes().to_vec()
    } else {
        encode(&info.content, "ContentInfo")?
    };
    Ok((content_type, bytes))
}

impl AlgorithmIdentifier {
    pub fn new(oid: ObjectIdentifier) -> Self {
        Self {
            oid,
            parameters: None,
        }
    }

    /// An algorithm whose only parameter is an OCTET STRING, such as a nonce.
    pub fn with_octets(oid: ObjectIdentifier, octets: &[u8]) -> Result<Self> {
        let params = octet_string(octets, "AlgorithmIdentifier")?;
        Ok(Self {
            oid,
            parameters: Some(to_any(&params, "AlgorithmIdentifier")?),
        })
    }

    /// Read back the OCTET STRING parameter.
    pub fn octets(&self) -> Result<Vec<u8>> {
        let params = self
            .parameters
            .as_ref()
            .ok_or_else(|| Error::format("AlgorithmIdentifier", "missing parameters"))?;
        let octets: OctetString = decode_any(params, "AlgorithmIdentifier")?;
        Ok(octets.as_bytes().to_vec())
    }
}

impl Attribute {
    pub fn content_type(content_type: ContentType) -> Result<Self> {
        Ok(Self {
            oid: oid::ATTR_CONTENT_TYPE,
            values: vec![to_any(&content_type.oid(), "Attribute")?],
        })
    }

    pub fn content_identifier(identifier: &[u8]) -> Result<Self> {
        let value = octet_string(identifier, "Attribute")?;
        Ok(Self {
            oid: oid::ATTR_CONTENT_IDENTIFIER,
            values: vec![to_any(&value, "Attribute")?],
        })
    }

    pub fn password_hint(hint: &str) -> Result<Self> {
        Ok(Self {
            oid: oid::ATTR_PASSWORD_HINT,
            values: vec![to_any(&hint.to_string(), "Attribute")?],
        })
    }
}

/// First value of the attribute with the given type, if any.
fn find_attribute<'a>(attrs: &'a [Attribute], oid: ObjectIdentifier) -> Option<&'a Any> {
    attrs
        .iter()
        .find(|attr| attr.oid == oid)
        .and_then(|attr| attr.values.first())
}

pub fn find_content_type(attrs: &[Attribute]) -> Result<Option<ContentType>> {
    find_attribute(attrs, oid::ATTR_CONTENT_TYPE)
        .map(|any| decode_any::<ObjectIdentifier>(any, "content-type attribute"))
        .transpose()
        .map(|found| found.map(ContentType::from_oid))
}

pub fn find_content_identifier(attrs: &[Attribute]) -> Result<Option<Vec<u8>>> {
    find_attribute(attrs, oid::ATTR_CONTENT_IDENTIFIER)
        .map(|any| decode_any::<OctetString>(any, "content-identifier attribute"))
        .transpose()
        .map(|found| found.map(|octets| octets.as_bytes().to_vec()))
}

pub fn find_password_hint(attrs: &[Attribute]) -> Result<Option<String>> {
    find_attribute(attrs, oid::ATTR_PASSWORD_HINT)
        .map(|any| decode_any::<String>(any, "password-hint attribute"))
        .transpose()
}
