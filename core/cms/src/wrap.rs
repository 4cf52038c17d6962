//! The wrapper: builds nested content layers around plaintext.

use tracing::debug;

use crate::asn1::{
    self, AlgorithmIdentifier, Attribute, AuthEnvelopedData, CompressedData, ContentInfo,
    ContentWithAttributes, EncapsulatedContentInfo, EncryptedContentInfo, EnvelopedData,
    SignedData,
};
use crate::content::ContentType;
use crate::identifier::Certificate;
use crate::oid;
use crate::options::CmsOptions;
use crate::recipient::Recipient;
use sealdoc_common::{Error, Result};
use sealdoc_crypto::keys::ContentKey;
use sealdoc_crypto::{aead, cipher, compress};

/// One logical part of a multi-part message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub data: Vec<u8>,
    pub identifier: Option<Vec<u8>>,
    pub options: CmsOptions,
}

impl Part {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            identifier: None,
            options: CmsOptions::empty(),
        }
    }

    pub fn with_identifier(mut self, identifier: Vec<u8>) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn with_options(mut self, options: CmsOptions) -> Self {
        self.options = options;
        self
    }
}

/// Builds envelopes.
///
/// The certificates, hint and identifier apply to every envelope the
/// wrapper produces; recipients and options are given per call.
#[derive(Debug, Clone, Default)]
pub struct Wrapper {
    certificates: Vec<Certificate>,
    password_hint: Option<String>,
    content_identifier: Option<Vec<u8>>,
}

impl Wrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Embed certificates in a signature-less SignedData inside the envelope.
    pub fn with_certificates(mut self, certificates: Vec<Certificate>) -> Self {
        self.certificates = certificates;
        self
    }

    /// Store a plaintext hint for password recipients.
    pub fn with_password_hint(mut self, hint: &str) -> Self {
        self.password_hint = Some(hint.to_string());
        self
    }

    /// Bind an identifier to the envelope as an authenticated attribute.
    ///
    /// Ignored in legacy (non-AEAD) mode.
    pub fn with_content_identifier(mut self, identifier: Vec<u8>) -> Self {
        self.content_identifier = Some(identifier);
        self
    }

    /// Wrap a single piece of content.
    ///
    /// # Preconditions
    /// - `recipients` is non-empty and every recipient can wrap
    ///
    /// # Postconditions
    /// - Returns a DER ContentInfo
    /// - A fresh content key is used and discarded
    ///
    /// # Errors
    /// - `InvalidInput` if there are no recipients
    /// - `KeyNotAvailable` if a recipient lacks key material
    pub fn wrap(
        &self,
        data: &[u8],
        options: CmsOptions,
        recipients: &mut [Recipient],
    ) -> Result<Vec<u8>> {
        self.wrap_content(data.to_vec(), data_type(options), options, recipients, None)
    }

    /// Wrap several parts into one envelope.
    ///
    /// A single part skips the collection layer. With several parts, the
    /// outer envelope is compressed when every part asks for compression;
    /// otherwise each part asking for it is compressed on its own.
    pub fn wrap_parts(
        &self,
        parts: Vec<Part>,
        options: CmsOptions,
        recipients: &mut [Recipient],
    ) -> Result<Vec<u8>> {
        if parts.len() <= 1 {
            let part = parts
                .into_iter()
                .next()
                .ok_or_else(|| Error::InvalidInput("No parts to wrap".to_string()))?;
            let merged = part.options | options;
            let (bytes, content_type) =
                tag_part(part.data, data_type(merged), part.identifier)?;
            return self.wrap_content(bytes, content_type, merged, recipients, None);
        }

        let all_compress = parts
            .iter()
            .all(|part| part.options.contains(CmsOptions::COMPRESS));
        let count = parts.len();

        let mut items = Vec::with_capacity(count);
        for part in parts {
            let mut bytes = part.data;
            let mut content_type = data_type(part.options);
            if !all_compress && part.options.contains(CmsOptions::COMPRESS) {
                if let Some(compressed) = compress_layer(&bytes, content_type)? {
                    bytes = compressed;
                    content_type = ContentType::CompressedData;
                }
            }
            let (bytes, content_type) = tag_part(bytes, content_type, part.identifier)?;
            items.push(asn1::content_info(content_type, &bytes)?);
        }
        let collection = asn1::encode(&items, "ContentCollection")?;

        let mut outer = options - CmsOptions::CONTENT_IS_XML;
        outer.set(
            CmsOptions::COMPRESS,
            all_compress || options.contains(CmsOptions::COMPRESS),
        );
        debug!(parts = count, all_compress, "Wrapping content collection");
        self.wrap_content(
            collection,
            ContentType::ContentCollection,
            outer,
            recipients,
            None,
        )
    }

    /// Wrap with explicit authenticated attributes in place of the usual ones.
    #[cfg(test)]
    pub(crate) fn wrap_with_auth_attrs(
        &self,
        data: &[u8],
        options: CmsOptions,
        recipients: &mut [Recipient],
        auth_attrs: Vec<Attribute>,
    ) -> Result<Vec<u8>> {
        self.wrap_content(
            data.to_vec(),
            data_type(options),
            options,
            recipients,
            Some(auth_attrs),
        )
    }

    fn wrap_content(
        &self,
        mut bytes: Vec<u8>,
        mut content_type: ContentType,
        options: CmsOptions,
        recipients: &mut [Recipient],
        auth_attrs: Option<Vec<Attribute>>,
    ) -> Result<Vec<u8>> {
        if options.contains(CmsOptions::COMPRESS) {
            if let Some(compressed) = compress_layer(&bytes, content_type)? {
                bytes = compressed;
                content_type = ContentType::CompressedData;
            }
        }

        if !self.certificates.is_empty() {
            bytes = self.certificate_carrier(&bytes, content_type)?;
            content_type = ContentType::SignedData;
        }

        if recipients.is_empty() {
            return Err(Error::InvalidInput(
                "At least one recipient is required".to_string(),
            ));
        }

        let cek = ContentKey::generate();
        let recipient_infos = recipients
            .iter_mut()
            .map(|recipient| recipient.wrap(&cek))
            .collect::<Result<Vec<_>>>()?;

        let info = if options.contains(CmsOptions::WITHOUT_AEAD) {
            self.enveloped(&cek, &bytes, content_type, recipients, recipient_infos)?
        } else {
            self.auth_enveloped(&cek, &bytes, content_type, recipient_infos, auth_attrs)?
        };

        debug!(
            content_type = %content_type,
            recipients = recipients.len(),
            aead = !options.contains(CmsOptions::WITHOUT_AEAD),
            "Wrapped content"
        );
        asn1::encode(&info, "ContentInfo")
    }

    fn certificate_carrier(&self, bytes: &[u8], content_type: ContentType) -> Result<Vec<u8>> {
        let certificates = self
            .certificates
            .iter()
            .map(|cert| asn1::decode::<der::asn1::Any>(&cert.to_der()?, "Certificate"))
            .collect::<Result<Vec<_>>>()?;
        let data = SignedData {
            version: 1,
            digest_algorithms: Vec::new(),
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: content_type.oid(),
                econtent: Some(asn1::octet_string(bytes, "SignedData")?),
            },
            certificates: Some(certificates),
            signer_infos: Vec::new(),
        };
        asn1::encode(&data, "SignedData")
    }

    fn hint_attrs(&self) -> Result<Option<Vec<Attribute>>> {
        self.password_hint
            .as_deref()
            .map(|hint| Attribute::password_hint(hint).map(|attr| vec![attr]))
            .transpose()
    }

    fn enveloped(
        &self,
        cek: &ContentKey,
        bytes: &[u8],
        content_type: ContentType,
        recipients: &[Recipient],
        recipient_infos: Vec<der::asn1::Any>,
    ) -> Result<ContentInfo> {
        if self.content_identifier.is_some() {
            debug!("Content identifier is not carried without AEAD");
        }
        let nonce = aead::generate_content_nonce();
        let ciphertext = cipher::apply_keystream(cek, &nonce, bytes)?;

        let version = if recipients.iter().any(Recipient::is_password) {
            3
        } else {
            2
        };
        let data = EnvelopedData {
            version,
            recipient_infos,
            encrypted_content_info: EncryptedContentInfo {
                content_type: content_type.oid(),
                content_encryption_algorithm: AlgorithmIdentifier::with_octets(
                    oid::ALG_CHACHA20,
                    &nonce,
                )?,
                encrypted_content: Some(asn1::octet_string(ciphertext, "EncryptedContentInfo")?),
            },
            unprotected_attrs: self.hint_attrs()?,
        };
        Ok(ContentInfo {
            content_type: oid::ENVELOPED_DATA,
            content: asn1::to_any(&data, "EnvelopedData")?,
        })
    }

    fn auth_enveloped(
        &self,
        cek: &ContentKey,
        bytes: &[u8],
        content_type: ContentType,
        recipient_infos: Vec<der::asn1::Any>,
        auth_attrs: Option<Vec<Attribute>>,
    ) -> Result<ContentInfo> {
        let attrs = match auth_attrs {
            Some(attrs) => attrs,
            None => {
                let mut attrs = Vec::new();
                if !matches!(content_type, ContentType::Data) {
                    attrs.push(Attribute::content_type(content_type)?);
                }
                if let Some(identifier) = &self.content_identifier {
                    attrs.push(Attribute::content_identifier(identifier)?);
                }
                attrs
            }
        };
        let (auth_attrs, aad) = if attrs.is_empty() {
            (None, Vec::new())
        } else {
            let aad = asn1::encode(&attrs, "AuthAttributes")?;
            (Some(attrs), aad)
        };

        let nonce = aead::generate_content_nonce();
        let (ciphertext, mac) = aead::seal_content(cek, &nonce, bytes, &aad)?;

        let data = AuthEnvelopedData {
            version: 0,
            recipient_infos,
            auth_encrypted_content_info: EncryptedContentInfo {
                content_type: content_type.oid(),
                content_encryption_algorithm: AlgorithmIdentifier::with_octets(
                    oid::ALG_CHACHA20_POLY1305,
                    &nonce,
                )?,
                encrypted_content: Some(asn1::octet_string(ciphertext, "EncryptedContentInfo")?),
            },
            auth_attrs,
            mac: asn1::octet_string(mac, "AuthEnvelopedData")?,
            unauth_attrs: self.hint_attrs()?,
        };
        Ok(ContentInfo {
            content_type: oid::AUTH_ENVELOPED_DATA,
            content: asn1::to_any(&data, "AuthEnvelopedData")?,
        })
    }
}

fn data_type(options: CmsOptions) -> ContentType {
    if options.contains(CmsOptions::CONTENT_IS_XML) {
        ContentType::Xml
    } else {
        ContentType::Data
    }
}

/// A CompressedData layer, or `None` when compression does not pay off.
fn compress_layer(bytes: &[u8], content_type: ContentType) -> Result<Option<Vec<u8>>> {
    let Some(compressed) = compress::compress_if_worthwhile(bytes)? else {
        return Ok(None);
    };
    let data = CompressedData {
        version: 0,
        compression_algorithm: AlgorithmIdentifier::new(oid::ALG_ZLIB),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: content_type.oid(),
            econtent: Some(asn1::octet_string(compressed, "CompressedData")?),
        },
    };
    asn1::encode(&data, "CompressedData").map(Some)
}

/// Tag content with an identifier via ContentWithAttributes.
fn tag_part(
    bytes: Vec<u8>,
    content_type: ContentType,
    identifier: Option<Vec<u8>>,
) -> Result<(Vec<u8>, ContentType)> {
    let Some(identifier) = identifier else {
        return Ok((bytes, content_type));
    };
    let data = ContentWithAttributes {
        content: asn1::content_info(content_type, &bytes)?,
        attrs: vec![Attribute::content_identifier(&identifier)?],
    };
    Ok((
        asn1::encode(&data, "ContentWithAttributes")?,
        ContentType::ContentWithAttributes,
    ))
}
