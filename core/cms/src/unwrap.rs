//! The unwrapper: peels nested content layers down to plaintext.
//!
//! Each step takes a [`ContentEnvelope`] and returns the next one, so a
//! single layer can be peeled and inspected on its own. Content collections
//! fork into independent branches that are flattened breadth-first.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::asn1::{
    self, AuthEnvelopedData, CompressedData, ContentInfo, ContentWithAttributes, EnvelopedData,
    SignedData,
};
use crate::content::ContentType;
use crate::identifier::Certificate;
use crate::keystore::{KeySource, Keypair};
use crate::oid;
use crate::recipient::Recipient;
use crate::recovery::{recover_content_key, RecoveredKey, RecoveryContext};
use sealdoc_common::{Error, Result};
use sealdoc_crypto::keys::KeyEncryptionKey;
use sealdoc_crypto::{aead, cipher, compress};

/// Layers deeper than this are rejected.
pub const MAX_DEPTH: usize = 32;

/// The working state of one branch of an unwrap.
#[derive(Debug, Clone)]
pub struct ContentEnvelope {
    /// The bytes of the current layer.
    pub bytes: Vec<u8>,
    pub content_type: ContentType,
    /// Whether this layer was taken out of a ContentInfo.
    pub from_content_info: bool,
    pub used_recipient: Option<usize>,
    pub all_recipients: Vec<Recipient>,
    pub discarded_recipients: usize,
    /// Identifier from a ContentWithAttributes layer.
    pub content_identifier: Option<Vec<u8>>,
    /// Identifier from the authenticated attributes of an AEAD layer.
    pub outer_identifier: Option<Vec<u8>>,
    /// Plaintext hint from the first encrypted layer that carries one.
    pub password_hint: Option<String>,
    pub authenticated: bool,
    pub embedded_certificates: Vec<Vec<u8>>,
    pub depth: usize,
}

impl ContentEnvelope {
    fn new(bytes: Vec<u8>, content_type: ContentType, from_content_info: bool) -> Self {
        Self {
            bytes,
            content_type,
            from_content_info,
            used_recipient: None,
            all_recipients: Vec::new(),
            discarded_recipients: 0,
            content_identifier: None,
            outer_identifier: None,
            password_hint: None,
            authenticated: false,
            embedded_certificates: Vec::new(),
            depth: 0,
        }
    }

    /// Open the outermost ContentInfo of a physical file.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let info: ContentInfo = asn1::decode(bytes, "ContentInfo")?;
        let (content_type, inner) = asn1::open_content_info(&info)?;
        Ok(Self::new(inner, content_type, true))
    }

    /// Move on to the next layer, keeping accumulated metadata.
    fn descend(mut self, bytes: Vec<u8>, content_type: ContentType) -> Result<Self> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::format(
                "ContentInfo",
                format!("nested deeper than {} layers", MAX_DEPTH),
            ));
        }
        self.bytes = bytes;
        self.content_type = content_type;
        self.from_content_info = false;
        self.depth += 1;
        Ok(self)
    }

    /// A fresh branch for one member of a collection.
    fn branch(&self, bytes: Vec<u8>, content_type: ContentType) -> Result<Self> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::format(
                "ContentCollection",
                format!("nested deeper than {} layers", MAX_DEPTH),
            ));
        }
        let mut child = Self::new(bytes, content_type, true);
        child.authenticated = self.authenticated;
        child.depth = self.depth + 1;
        Ok(child)
    }

    fn adopt_recipients(&mut self, recovered: RecoveredKey) {
        if self.all_recipients.is_empty() {
            self.used_recipient = Some(recovered.used_recipient);
            self.all_recipients = recovered.recipients;
            self.discarded_recipients = recovered.discarded;
        }
    }
}

/// The outcome of peeling one layer.
#[derive(Debug)]
pub enum Peeled {
    /// A single next layer.
    Layer(ContentEnvelope),
    /// A collection; `parent` carries the metadata gathered so far.
    Collection {
        parent: ContentEnvelope,
        children: Vec<ContentEnvelope>,
    },
    /// A layer that cannot be peeled further.
    Terminal(ContentEnvelope),
    /// A certificate-only SignedData with no content.
    Exhausted(ContentEnvelope),
}

/// The result of fully unwrapping one physical file.
#[derive(Debug, Default)]
pub struct ExpandedContent {
    pub outer_identifier: Option<Vec<u8>>,
    pub password_hint: Option<String>,
    pub primary_content: Option<Vec<u8>>,
    pub identified_content: HashMap<Vec<u8>, Vec<u8>>,
    pub embedded_certificates: Vec<Vec<u8>>,
    pub all_recipients: Vec<Recipient>,
    /// Index into `all_recipients` of the recipient used to recover the key.
    pub used_recipient_index: Option<usize>,
    pub discarded_recipients: usize,
    pub authenticated: bool,
}

impl ExpandedContent {
    pub fn used_recipient(&self) -> Option<&Recipient> {
        self.used_recipient_index
            .and_then(|index| self.all_recipients.get(index))
    }

    /// Parse the embedded certificates.
    pub fn certificates(&self) -> Result<Vec<Certificate>> {
        self.embedded_certificates
            .iter()
            .map(|der| Certificate::from_der(der))
            .collect()
    }

    fn absorb(&mut self, env: &mut ContentEnvelope) {
        self.embedded_certificates
            .append(&mut env.embedded_certificates);
        if self.all_recipients.is_empty() && !env.all_recipients.is_empty() {
            self.all_recipients = std::mem::take(&mut env.all_recipients);
            self.used_recipient_index = env.used_recipient;
            self.discarded_recipients = env.discarded_recipients;
        }
        if self.outer_identifier.is_none() {
            self.outer_identifier = env.outer_identifier.take();
        }
        if self.password_hint.is_none() {
            self.password_hint = env.password_hint.take();
        }
        self.authenticated |= env.authenticated;
    }
}

/// Peels envelopes using the keys and key source it was given.
#[derive(Default)]
pub struct Unwrapper {
    key_source: Option<Arc<dyn KeySource>>,
    symmetric_keys: HashMap<Vec<u8>, KeyEncryptionKey>,
    asymmetric_keys: Vec<Arc<dyn Keypair>>,
    allow_interaction: bool,
}

impl Unwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_source(mut self, key_source: Arc<dyn KeySource>) -> Self {
        self.key_source = Some(key_source);
        self
    }

    /// Offer a pre-shared key under its identifier.
    pub fn with_symmetric_key(mut self, key_identifier: Vec<u8>, kek: KeyEncryptionKey) -> Self {
        self.symmetric_keys.insert(key_identifier, kek);
        self
    }

    /// Offer a private key, tried before the key source.
    pub fn with_asymmetric_key(mut self, keypair: Arc<dyn Keypair>) -> Self {
        self.asymmetric_keys.push(keypair);
        self
    }

    /// Allow password prompts and interactive key lookups.
    pub fn allow_interaction(mut self, allow: bool) -> Self {
        self.allow_interaction = allow;
        self
    }

    /// Fully unwrap one physical file.
    ///
    /// # Errors
    /// - `Format` naming the structure that failed to parse
    /// - `UnsupportedFeature` for unsupported versions, algorithms or a
    ///   terminal content type when no primary content exists yet
    /// - Key recovery errors (`KeyNotAvailable`, `UserCancelled`)
    pub fn expand(&self, bytes: &[u8]) -> Result<ExpandedContent> {
        let mut result = ExpandedContent::default();
        let mut queue = VecDeque::from([ContentEnvelope::parse(bytes)?]);

        while let Some(env) = queue.pop_front() {
            match self.peel(env)? {
                Peeled::Layer(next) => queue.push_front(next),
                Peeled::Collection { mut parent, children } => {
                    result.absorb(&mut parent);
                    queue.extend(children);
                }
                Peeled::Exhausted(mut env) => result.absorb(&mut env),
                Peeled::Terminal(mut env) => {
                    result.absorb(&mut env);
                    classify(&mut result, env)?;
                }
            }
        }

        debug!(
            primary = result.primary_content.is_some(),
            identified = result.identified_content.len(),
            certificates = result.embedded_certificates.len(),
            "Expanded content"
        );
        Ok(result)
    }

    /// Peel exactly one layer.
    pub fn peel(&self, env: ContentEnvelope) -> Result<Peeled> {
        debug!(
            content_type = %env.content_type,
            from_content_info = env.from_content_info,
            depth = env.depth,
            "Peeling layer"
        );
        match env.content_type {
            ContentType::EnvelopedData => self.peel_enveloped(env),
            ContentType::AuthEnvelopedData => self.peel_auth_enveloped(env),
            ContentType::SignedData => peel_signed(env),
            ContentType::CompressedData => peel_compressed(env),
            ContentType::ContentWithAttributes => peel_attributed(env),
            ContentType::ContentCollection => peel_collection(env),
            _ => Ok(Peeled::Terminal(env)),
        }
    }

    fn recover(&self, infos: &[der::asn1::Any], hint: Option<&str>) -> Result<RecoveredKey> {
        let ctx = RecoveryContext {
            symmetric_keys: &self.symmetric_keys,
            asymmetric_keys: &self.asymmetric_keys,
            key_source: self.key_source.as_deref(),
            allow_interaction: self.allow_interaction,
            password_hint: hint,
        };
        recover_content_key(infos, &ctx)
    }

    fn peel_enveloped(&self, mut env: ContentEnvelope) -> Result<Peeled> {
        let data: EnvelopedData = asn1::decode(&env.bytes, "EnvelopedData")?;
        if data.version > 4 {
            return Err(Error::UnsupportedFeature(format!(
                "EnvelopedData version {}",
                data.version
            )));
        }

        let eci = &data.encrypted_content_info;
        if eci.content_encryption_algorithm.oid != oid::ALG_CHACHA20 {
            return Err(Error::UnsupportedFeature(format!(
                "content encryption algorithm {}",
                eci.content_encryption_algorithm.oid
            )));
        }
        let nonce = eci.content_encryption_algorithm.octets()?;
        let ciphertext = eci
            .encrypted_content
            .as_ref()
            .ok_or_else(|| Error::format("EncryptedContentInfo", "missing encrypted content"))?;
        let inner = ContentType::from_oid(eci.content_type);

        let hint = match &data.unprotected_attrs {
            Some(attrs) => asn1::find_password_hint(attrs)?,
            None => None,
        };
        let recovered = self.recover(&data.recipient_infos, hint.as_deref())?;
        let plaintext = cipher::apply_keystream(&recovered.cek, &nonce, ciphertext.as_bytes())?;

        if env.password_hint.is_none() {
            env.password_hint = hint;
        }
        env.adopt_recipients(recovered);
        Ok(Peeled::Layer(env.descend(plaintext, inner)?))
    }

    fn peel_auth_enveloped(&self, mut env: ContentEnvelope) -> Result<Peeled> {
        let data: AuthEnvelopedData = asn1::decode(&env.bytes, "AuthEnvelopedData")?;
        if data.version != 0 {
            return Err(Error::UnsupportedFeature(format!(
                "AuthEnvelopedData version {}",
                data.version
            )));
        }

        let eci = &data.auth_encrypted_content_info;
        if eci.content_encryption_algorithm.oid != oid::ALG_CHACHA20_POLY1305 {
            return Err(Error::UnsupportedFeature(format!(
                "content encryption algorithm {}",
                eci.content_encryption_algorithm.oid
            )));
        }
        let nonce = eci.content_encryption_algorithm.octets()?;
        let ciphertext = eci
            .encrypted_content
            .as_ref()
            .ok_or_else(|| Error::format("EncryptedContentInfo", "missing encrypted content"))?;
        let inner = ContentType::from_oid(eci.content_type);

        let auth_attrs = data.auth_attrs.as_deref().unwrap_or_default();
        match asn1::find_content_type(auth_attrs)? {
            Some(declared) if declared != inner => {
                return Err(Error::format(
                    "AuthEnvelopedData",
                    format!("content-type attribute {} does not match {}", declared, inner),
                ));
            }
            None if inner != ContentType::Data => {
                return Err(Error::format(
                    "AuthEnvelopedData",
                    "missing content-type attribute",
                ));
            }
            _ => {}
        }
        let aad = match &data.auth_attrs {
            Some(attrs) => asn1::encode(attrs, "AuthAttributes")?,
            None => Vec::new(),
        };

        let hint = match &data.unauth_attrs {
            Some(attrs) => asn1::find_password_hint(attrs)?,
            None => None,
        };
        let hint = match hint {
            Some(hint) => Some(hint),
            None => asn1::find_password_hint(auth_attrs)?,
        };

        let recovered = self.recover(&data.recipient_infos, hint.as_deref())?;
        let plaintext = aead::open_content(
            &recovered.cek,
            &nonce,
            ciphertext.as_bytes(),
            data.mac.as_bytes(),
            &aad,
        )?;

        if env.outer_identifier.is_none() {
            env.outer_identifier = asn1::find_content_identifier(auth_attrs)?;
        }
        if env.password_hint.is_none() {
            env.password_hint = hint;
        }
        env.authenticated = true;
        env.adopt_recipients(recovered);
        Ok(Peeled::Layer(env.descend(plaintext, inner)?))
    }
}

fn peel_signed(mut env: ContentEnvelope) -> Result<Peeled> {
    let data: SignedData = asn1::decode(&env.bytes, "SignedData")?;
    for cert in data.certificates.iter().flatten() {
        env.embedded_certificates
            .push(asn1::encode(cert, "SignedData certificates")?);
    }

    let encap = data.encap_content_info;
    match encap.econtent {
        Some(octets) => {
            let inner = ContentType::from_oid(encap.econtent_type);
            Ok(Peeled::Layer(env.descend(octets.as_bytes().to_vec(), inner)?))
        }
        None => {
            env.bytes.clear();
            Ok(Peeled::Exhausted(env))
        }
    }
}

fn peel_compressed(env: ContentEnvelope) -> Result<Peeled> {
    let data: CompressedData = asn1::decode(&env.bytes, "CompressedData")?;
    if data.version != 0 {
        return Err(Error::UnsupportedFeature(format!(
            "CompressedData version {}",
            data.version
        )));
    }
    if data.compression_algorithm.oid != oid::ALG_ZLIB {
        return Err(Error::UnsupportedFeature(format!(
            "compression algorithm {}",
            data.compression_algorithm.oid
        )));
    }

    let encap = data.encap_content_info;
    let octets = encap
        .econtent
        .ok_or_else(|| Error::format("CompressedData", "missing content"))?;
    let inner = ContentType::from_oid(encap.econtent_type);
    let decompressed = compress::decompress(octets.as_bytes())?;
    Ok(Peeled::Layer(env.descend(decompressed, inner)?))
}

fn peel_attributed(mut env: ContentEnvelope) -> Result<Peeled> {
    let data: ContentWithAttributes = asn1::decode(&env.bytes, "ContentWithAttributes")?;
    let (inner, bytes) = asn1::open_content_info(&data.content)?;
    env.content_identifier = asn1::find_content_identifier(&data.attrs)?;

    let mut next = env.descend(bytes, inner)?;
    next.from_content_info = true;
    Ok(Peeled::Layer(next))
}

fn peel_collection(mut env: ContentEnvelope) -> Result<Peeled> {
    let items: Vec<ContentInfo> = asn1::decode(&env.bytes, "ContentCollection")?;
    let children = items
        .iter()
        .map(|item| {
            let (content_type, bytes) = asn1::open_content_info(item)?;
            env.branch(bytes, content_type)
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(parts = children.len(), "Forking content collection");
    env.bytes.clear();
    Ok(Peeled::Collection {
        parent: env,
        children,
    })
}

/// File a terminal layer as primary, identified or ignored content.
fn classify(result: &mut ExpandedContent, env: ContentEnvelope) -> Result<()> {
    if env.content_type.is_data() {
        match env.content_identifier {
            Some(identifier) => {
                result.identified_content.insert(identifier, env.bytes);
            }
            None if result.primary_content.is_none() => {
                result.primary_content = Some(env.bytes);
            }
            None => warn!("Ignoring additional unidentified content"),
        }
        return Ok(());
    }

    if result.primary_content.is_none() {
        return Err(Error::UnsupportedFeature(format!(
            "content type {}",
            env.content_type
        )));
    }
    warn!(content_type = %env.content_type, "Ignoring unsupported content");
    Ok(())
}
