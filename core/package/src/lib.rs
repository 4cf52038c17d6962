//! Encrypted document packages.
//!
//! A plaintext document is an abstract [`Node`] tree: a single file, or a
//! directory of files. [`PackageCodec`] turns it into an encrypted package
//! made of one main object (`contents.cms`) holding the [`PackageIndex`],
//! plus side files stored under cryptic names.

pub mod disk;
pub mod index;
pub mod names;
pub mod package;
pub mod schema;
pub mod settings;
pub mod tree;

pub use index::{DirectoryEntry, FileEntry, PackageIndex};
pub use package::{decrypt_if_encrypted, might_be_encrypted, PackageCodec};
pub use schema::{FileSettings, Schema};
pub use settings::EncryptionSettings;
pub use tree::Node;
