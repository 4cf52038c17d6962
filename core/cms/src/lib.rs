//! CMS-style envelopes for sealdoc.
//!
//! This module provides:
//! - DER envelope structures modelled on CMS (RFC 5652, 5083, 3274, 4073)
//! - Recipients: password, pre-shared key and public key
//! - Content-key recovery across heterogeneous recipients
//! - The unwrapper, which peels nested layers down to plaintext
//! - The wrapper, which builds those layers
//!
//! # Security Guarantees
//! - Content keys live only for the duration of one wrap or unwrap call
//! - No plaintext or key material is ever logged
//! - Authenticated attributes are bound to the ciphertext in AEAD mode

pub mod asn1;
pub mod content;
pub mod identifier;
pub mod keystore;
pub mod oid;
pub mod options;
pub mod recipient;
pub mod recovery;
pub mod unwrap;
pub mod wrap;

pub use content::ContentType;
pub use identifier::{Certificate, CertificateIdentifiers, RecipientIdentifier};
pub use keystore::{KeySource, Keypair, LocalKeypair, MemoryKeyStore};
pub use options::CmsOptions;
pub use recipient::{PasswordRecipient, PreSharedKeyRecipient, PublicKeyRecipient, Recipient};
pub use unwrap::{ContentEnvelope, ExpandedContent, Unwrapper};
pub use wrap::{Part, Wrapper};
