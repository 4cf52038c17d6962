//! Encrypting whole documents.
//!
//! A flat file becomes a single envelope. A directory becomes a package:
//!
//! - `contents.cms`, the main object, encrypted to the document recipients.
//!   It holds the [`PackageIndex`] as its primary XML content, followed by
//!   any files stored inline under the identifiers `part1`, `part2`, ...
//! - One side file per remaining file, each encrypted to a single
//!   pre-shared key that is recorded in the index.
//! - Optionally `.iwph`, the plaintext password hint.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use crate::index::{DirectoryEntry, FileEntry, PackageIndex};
use crate::names::NameAllocator;
use crate::schema::Schema;
use crate::settings::EncryptionSettings;
use crate::tree::{Node, NodeKind};
use sealdoc_cms::{
    CmsOptions, ContentEnvelope, ContentType, ExpandedContent, KeySource, Keypair, Part,
    PreSharedKeyRecipient, Recipient, Unwrapper, Wrapper,
};
use sealdoc_common::{Error, Result};

/// Name of the main object inside a package.
pub const MAIN_FILE_NAME: &str = "contents.cms";
/// Name of the plaintext hint file inside a package.
pub const LEGACY_HINT_FILE_NAME: &str = ".iwph";
/// Attribute carrying the plaintext password hint.
pub const PASSWORD_HINT_ATTRIBUTE: &str = "org.sealdoc.password-hint";

/// Options that only steer packaging and never reach a side file envelope.
const PACKAGING_OPTIONS: CmsOptions = CmsOptions::STORE_IN_MAIN.union(CmsOptions::FILE_IS_OPTIONAL);

/// Whether `node` looks like something [`PackageCodec`] produced.
///
/// Other CMS objects may give false positives.
pub fn might_be_encrypted(node: &Node) -> bool {
    match &node.kind {
        NodeKind::File(contents) => might_be_envelope(contents),
        NodeKind::Directory(children) => match children.get(MAIN_FILE_NAME) {
            Some(main) => main.contents().is_some_and(might_be_envelope),
            None => false,
        },
    }
}

fn might_be_envelope(bytes: &[u8]) -> bool {
    ContentEnvelope::parse(bytes)
        .map(|env| !matches!(env.content_type, ContentType::Unknown(_)))
        .unwrap_or(false)
}

/// Decrypt `node` if it is encrypted.
///
/// Returns the input unchanged, with no settings, when it is not.
pub fn decrypt_if_encrypted(
    node: Node,
    codec: &PackageCodec,
) -> Result<(Node, Option<EncryptionSettings>)> {
    if !might_be_encrypted(&node) {
        return Ok((node, None));
    }
    let (plain, settings) = codec.unwrap(&node)?;
    Ok((plain, Some(settings)))
}

/// Wraps and unwraps document trees.
#[derive(Default)]
pub struct PackageCodec {
    key_source: Option<Arc<dyn KeySource>>,
    keypairs: Vec<Arc<dyn Keypair>>,
    allow_interaction: bool,
}

/// Plaintext collected while walking a directory.
struct Collected<'a> {
    names: NameAllocator,
    side_files: Vec<(String, &'a [u8], CmsOptions)>,
    inline_parts: Vec<Part>,
}

impl PackageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_source(mut self, key_source: Arc<dyn KeySource>) -> Self {
        self.key_source = Some(key_source);
        self
    }

    /// Offer a private key before asking the key source.
    pub fn with_keypair(mut self, keypair: Arc<dyn Keypair>) -> Self {
        self.keypairs.push(keypair);
        self
    }

    /// Allow password prompts and interactive key lookups.
    pub fn allow_interaction(mut self, allow: bool) -> Self {
        self.allow_interaction = allow;
        self
    }

    /// Encrypt a document tree.
    ///
    /// # Preconditions
    /// - `settings` has at least one recipient able to wrap
    ///
    /// # Postconditions
    /// - A file yields a file holding one envelope
    /// - A directory yields a package directory
    /// - Password recipients in `settings` keep their derived keys
    ///
    /// # Errors
    /// - `InvalidInput` if there are no recipients
    /// - `KeyNotAvailable` if a recipient lacks key material
    pub fn wrap(
        &self,
        input: &Node,
        schema: Option<&Schema>,
        settings: &mut EncryptionSettings,
    ) -> Result<Node> {
        if settings.recipients().is_empty() {
            return Err(Error::InvalidInput("No recipients".to_string()));
        }

        let mut wrapper = Wrapper::new().with_certificates(settings.certificates.clone());
        if let Some(hint) = &settings.password_hint {
            wrapper = wrapper.with_password_hint(hint);
        }

        let mut output = match &input.kind {
            NodeKind::File(contents) => {
                let options = settings.options;
                let wrapped = wrapper.wrap(contents, options, settings.recipients_mut())?;
                info!(size = contents.len(), "Encrypted flat file");
                Node::file(wrapped)
            }
            NodeKind::Directory(_) => self.wrap_package(input, schema, &wrapper, settings)?,
        };

        output.attributes = input.attributes.clone();
        if let Some(hint) = &settings.password_hint {
            output.set_attribute(PASSWORD_HINT_ATTRIBUTE, hint.as_bytes().to_vec());
        }
        Ok(output)
    }

    fn wrap_package(
        &self,
        input: &Node,
        schema: Option<&Schema>,
        wrapper: &Wrapper,
        settings: &mut EncryptionSettings,
    ) -> Result<Node> {
        let mut collected = Collected {
            names: NameAllocator::new(
                input.count_files(),
                [MAIN_FILE_NAME, LEGACY_HINT_FILE_NAME],
            ),
            side_files: Vec::new(),
            inline_parts: Vec::new(),
        };

        let sides = PreSharedKeyRecipient::generate();
        let mut index = PackageIndex::new();
        if let Some(kek) = sides.kek() {
            index.keys.insert(sides.key_identifier().to_vec(), kek.clone());
        }

        let root = collect(input, schema, &mut collected)?;
        index.files = root.files;
        index.directories = root.directories;

        let mut parts = vec![Part::new(index.to_xml()?).with_options(CmsOptions::CONTENT_IS_XML)];
        let inline_count = collected.inline_parts.len();
        parts.append(&mut collected.inline_parts);
        let main = wrapper.wrap_parts(parts, settings.options, settings.recipients_mut())?;

        let mut package = Node::directory();
        package.add_child(MAIN_FILE_NAME, Node::file(main))?;

        let side_wrapper = Wrapper::new();
        let mut side_recipients = [Recipient::PreSharedKey(sides)];
        let side_count = collected.side_files.len();
        for (stored_name, contents, options) in collected.side_files {
            let options = (settings.options | options) - PACKAGING_OPTIONS;
            let wrapped = side_wrapper.wrap(contents, options, &mut side_recipients)?;
            debug!(stored_name = %stored_name, size = contents.len(), "Encrypted side file");
            package.add_child(stored_name, Node::file(wrapped))?;
        }

        if settings.legacy_hint {
            if let Some(hint) = &settings.password_hint {
                package.add_child(LEGACY_HINT_FILE_NAME, Node::file(hint.as_bytes().to_vec()))?;
            }
        }

        info!(
            side_files = side_count,
            inline_files = inline_count,
            "Encrypted package"
        );
        Ok(package)
    }

    /// Decrypt a document tree.
    ///
    /// Returns the plaintext tree and the settings needed to save it again
    /// to the same recipients.
    ///
    /// # Errors
    /// - `MissingFile` if the main object or a required side file is absent
    ///   or unreadable
    /// - `Format` if an envelope or the index is malformed
    /// - `UnsupportedFeature` if the content is not data
    /// - Key recovery errors (`KeyNotAvailable`, `UserCancelled`)
    pub fn unwrap(&self, input: &Node) -> Result<(Node, EncryptionSettings)> {
        let (mut output, expanded) = match &input.kind {
            NodeKind::File(contents) => {
                let expanded = self.unwrapper().expand(contents)?;
                let plain = primary(&expanded)?.to_vec();
                info!(size = plain.len(), "Decrypted flat file");
                (Node::file(plain), expanded)
            }
            NodeKind::Directory(children) => self.unwrap_package(children)?,
        };

        let mut settings = EncryptionSettings::from_expanded(&expanded)?;
        let legacy_hint = input
            .get_child(LEGACY_HINT_FILE_NAME)
            .and_then(Node::contents);
        settings.legacy_hint = legacy_hint.is_some();
        settings.password_hint = input
            .attribute(PASSWORD_HINT_ATTRIBUTE)
            .or(legacy_hint)
            .map(|hint| String::from_utf8_lossy(hint).into_owned())
            .or_else(|| expanded.password_hint.clone());

        output.attributes = input.attributes.clone();
        output.attributes.remove(PASSWORD_HINT_ATTRIBUTE);
        Ok((output, settings))
    }

    fn unwrap_package(&self, children: &BTreeMap<String, Node>) -> Result<(Node, ExpandedContent)> {
        let main = children
            .get(MAIN_FILE_NAME)
            .and_then(Node::contents)
            .ok_or_else(|| Error::MissingFile(MAIN_FILE_NAME.to_string()))?;
        let main = self.unwrapper().expand(main)?;
        let index = PackageIndex::from_xml(primary(&main)?)?;

        let mut side_unwrapper = Unwrapper::new();
        for (id, kek) in &index.keys {
            side_unwrapper = side_unwrapper.with_symmetric_key(id.clone(), kek.clone());
        }

        // Decrypt every referenced side file once, however many entries use it.
        let mut sources: HashMap<&str, ExpandedContent> = HashMap::new();
        for entry in index.all_files() {
            let (file, _) = entry.location();
            if file.is_empty() || sources.contains_key(file) {
                continue;
            }
            let Some(contents) = children.get(file).and_then(Node::contents) else {
                continue;
            };
            debug!(stored_name = %file, "Decrypting side file");
            sources.insert(file, side_unwrapper.expand(contents)?);
        }

        let root = DirectoryEntry {
            real_name: String::new(),
            files: index.files.clone(),
            directories: index.directories.clone(),
        };
        let tree = rebuild(&root, children, &main, &sources)?;

        info!(
            files = tree.count_files(),
            side_files = sources.len(),
            "Decrypted package"
        );
        Ok((tree, main))
    }

    fn unwrapper(&self) -> Unwrapper {
        let mut unwrapper = Unwrapper::new().allow_interaction(self.allow_interaction);
        if let Some(source) = &self.key_source {
            unwrapper = unwrapper.with_key_source(source.clone());
        }
        for keypair in &self.keypairs {
            unwrapper = unwrapper.with_asymmetric_key(keypair.clone());
        }
        unwrapper
    }
}

fn primary(expanded: &ExpandedContent) -> Result<&[u8]> {
    expanded
        .primary_content
        .as_deref()
        .ok_or_else(|| Error::UnsupportedFeature("Unexpected content type".to_string()))
}

/// Walk a directory, assigning stored names and gathering plaintext.
fn collect<'a>(
    directory: &'a Node,
    schema: Option<&Schema>,
    collected: &mut Collected<'a>,
) -> Result<DirectoryEntry> {
    let mut entry = DirectoryEntry::default();
    let Some(children) = directory.children() else {
        return Ok(entry);
    };

    for (real_name, child) in children {
        let settings = schema.and_then(|schema| schema.get(real_name));
        match &child.kind {
            NodeKind::File(contents) => {
                let options = settings.map(|s| s.options).unwrap_or_default();
                let stored_name = if options.contains(CmsOptions::STORE_IN_MAIN) {
                    // Part 0 is the index itself.
                    let identifier = format!("part{}", collected.inline_parts.len() + 1);
                    collected.inline_parts.push(
                        Part::new(contents.clone())
                            .with_identifier(identifier.clone().into_bytes())
                            .with_options(options - PACKAGING_OPTIONS),
                    );
                    format!("#{}", identifier)
                } else {
                    let exposed = settings.and_then(|s| s.expose_name.as_deref());
                    let stored_name = collected.names.allocate(exposed);
                    collected
                        .side_files
                        .push((stored_name.clone(), contents.as_slice(), options));
                    stored_name
                };
                entry
                    .files
                    .push(FileEntry::new(real_name.clone(), stored_name).with_options(options));
            }
            NodeKind::Directory(_) => {
                let nested = settings.map(|s| &s.children);
                let mut sub = collect(child, nested, collected)?;
                sub.real_name = real_name.clone();
                entry.directories.push(sub);
            }
        }
    }
    Ok(entry)
}

/// Rebuild the plaintext tree described by `directory`.
fn rebuild(
    directory: &DirectoryEntry,
    children: &BTreeMap<String, Node>,
    main: &ExpandedContent,
    sources: &HashMap<&str, ExpandedContent>,
) -> Result<Node> {
    let mut node = Node::directory();
    for sub in &directory.directories {
        node.add_child(sub.real_name.clone(), rebuild(sub, children, main, sources)?)?;
    }

    for file in &directory.files {
        let (stored, part) = file.location();
        let source = if stored.is_empty() {
            Some(main)
        } else {
            match children.get(stored) {
                None if file.is_optional() => {
                    debug!(stored_name = %stored, "Skipping missing optional file");
                    continue;
                }
                None => return Err(Error::MissingFile(file.stored_name.clone())),
                Some(_) => sources.get(stored),
            }
        };
        let source = source.ok_or_else(|| Error::MissingFile(file.stored_name.clone()))?;

        let contents = match part {
            None => source.primary_content.as_ref(),
            Some(part) => source.identified_content.get(part.as_bytes()),
        };
        match contents {
            Some(contents) => node.add_child(file.real_name.clone(), Node::file(contents.clone()))?,
            None if file.is_optional() => continue,
            None => return Err(Error::MissingFile(file.stored_name.clone())),
        }
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FileSettings;
    use sealdoc_cms::{LocalKeypair, MemoryKeyStore};
    use sealdoc_crypto::KdfParams;
    use std::collections::HashSet;

    fn fast_settings(password: &str) -> EncryptionSettings {
        let mut settings = EncryptionSettings::new();
        settings.kdf_params = KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        };
        settings.set_password(Some(password));
        settings
    }

    fn password_codec(password: &str) -> PackageCodec {
        PackageCodec::new()
            .with_key_source(Arc::new(MemoryKeyStore::new().with_password(password)))
            .allow_interaction(true)
    }

    fn sample_tree(files: usize) -> Node {
        let mut root = Node::directory();
        let mut docs = Node::directory();
        for i in 0..files {
            let contents = format!("file number {} ", i).repeat(i + 1).into_bytes();
            if i % 2 == 0 {
                root.add_child(format!("file-{}.txt", i), Node::file(contents))
                    .unwrap();
            } else {
                docs.add_child(format!("doc-{}.txt", i), Node::file(contents))
                    .unwrap();
            }
        }
        root.add_child("docs", docs).unwrap();
        root.add_child("empty", Node::directory()).unwrap();
        root
    }

    fn side_file_names(package: &Node) -> Vec<String> {
        package
            .children()
            .unwrap()
            .keys()
            .filter(|name| name.as_str() != MAIN_FILE_NAME && name.as_str() != LEGACY_HINT_FILE_NAME)
            .cloned()
            .collect()
    }

    #[test]
    fn test_package_round_trip() {
        let tree = sample_tree(20);
        let mut settings = fast_settings("secret");

        let package = PackageCodec::new().wrap(&tree, None, &mut settings).unwrap();
        let names = side_file_names(&package);
        assert_eq!(names.len(), 20);
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), 20);
        assert!(names.iter().all(|name| name.len() == 6));

        let (plain, restored) = password_codec("secret").unwrap(&package).unwrap();
        assert_eq!(plain, tree);
        assert!(restored.has_password());
    }

    #[test]
    fn test_larger_package_uses_longer_names() {
        let tree = sample_tree(130);
        let mut settings = EncryptionSettings::new();
        let keypair = Arc::new(LocalKeypair::generate("Alice"));
        settings.add_certificate_recipient(keypair.certificate().clone());

        let package = PackageCodec::new().wrap(&tree, None, &mut settings).unwrap();
        let names = side_file_names(&package);
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), 130);
        assert!(names.iter().all(|name| name.len() == 8));

        let (plain, restored) = PackageCodec::new()
            .with_keypair(keypair)
            .unwrap(&package)
            .unwrap();
        assert_eq!(plain, tree);
        assert_eq!(restored.describe(), "1 Key");
    }

    #[test]
    fn test_schema_inline_and_exposed_files() {
        let tree = Node::directory()
            .with_child("contents.xml", Node::file(b"<doc/>".to_vec()))
            .unwrap()
            .with_child("preview.png", Node::file(vec![0x89, b'P', b'N', b'G']))
            .unwrap()
            .with_child(
                "Images",
                Node::directory()
                    .with_child("big.tiff", Node::file(vec![0u8; 4096]))
                    .unwrap(),
            )
            .unwrap();

        let mut schema = Schema::new();
        schema.insert(
            "contents.xml".to_string(),
            FileSettings::with_options(CmsOptions::STORE_IN_MAIN | CmsOptions::CONTENT_IS_XML),
        );
        schema.insert(
            "preview.png".to_string(),
            FileSettings {
                expose_name: Some("preview.png".to_string()),
                ..FileSettings::default()
            },
        );
        let mut images = Schema::new();
        images.insert(
            "big.tiff".to_string(),
            FileSettings::with_options(CmsOptions::COMPRESS),
        );
        schema.insert(
            "Images".to_string(),
            FileSettings {
                children: images,
                ..FileSettings::default()
            },
        );

        let mut settings = fast_settings("pw");
        let package = PackageCodec::new()
            .wrap(&tree, Some(&schema), &mut settings)
            .unwrap();

        let names = side_file_names(&package);
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"preview.png".to_string()));
        // Compressed zeros are far smaller than the plaintext.
        let big = names.iter().find(|name| name.as_str() != "preview.png").unwrap();
        assert!(package.get_child(big).unwrap().contents().unwrap().len() < 1024);

        let (plain, _) = password_codec("pw").unwrap(&package).unwrap();
        assert_eq!(plain, tree);
    }

    /// Build a package by hand so the index can name any side file.
    fn package_with_index(
        index_files: Vec<FileEntry>,
        side_files: Vec<(&str, Vec<Part>)>,
        settings: &mut EncryptionSettings,
    ) -> Node {
        let sides = PreSharedKeyRecipient::generate();
        let mut index = PackageIndex::new();
        index
            .keys
            .insert(sides.key_identifier().to_vec(), sides.kek().unwrap().clone());
        index.files = index_files;

        let main = Wrapper::new()
            .wrap(
                &index.to_xml().unwrap(),
                CmsOptions::CONTENT_IS_XML,
                settings.recipients_mut(),
            )
            .unwrap();
        let mut package = Node::directory()
            .with_child(MAIN_FILE_NAME, Node::file(main))
            .unwrap();

        let mut recipients = [Recipient::PreSharedKey(sides)];
        for (name, parts) in side_files {
            let wrapped = Wrapper::new()
                .wrap_parts(parts, CmsOptions::empty(), &mut recipients)
                .unwrap();
            package.add_child(name, Node::file(wrapped)).unwrap();
        }
        package
    }

    #[test]
    fn test_optional_side_file_may_be_missing() {
        let mut settings = fast_settings("pw");
        let package = package_with_index(
            vec![
                FileEntry::new("present.txt", "IlIlIl"),
                FileEntry::new("gone.txt", "lOOOOl").with_options(CmsOptions::FILE_IS_OPTIONAL),
            ],
            vec![("IlIlIl", vec![Part::new(b"here".to_vec())])],
            &mut settings,
        );

        let (plain, _) = password_codec("pw").unwrap(&package).unwrap();
        assert_eq!(plain.count_files(), 1);
        assert_eq!(plain.get_child("present.txt").unwrap().contents(), Some(&b"here"[..]));
        assert!(plain.get_child("gone.txt").is_none());
    }

    #[test]
    fn test_required_side_file_missing_fails() {
        let mut settings = fast_settings("pw");
        let package = package_with_index(
            vec![
                FileEntry::new("present.txt", "IlIlIl"),
                FileEntry::new("gone.txt", "lOOOOl"),
            ],
            vec![("IlIlIl", vec![Part::new(b"here".to_vec())])],
            &mut settings,
        );

        let err = password_codec("pw").unwrap(&package).unwrap_err();
        assert!(matches!(err, Error::MissingFile(ref name) if name == "lOOOOl"));
    }

    #[test]
    fn test_side_file_with_several_parts() {
        let mut settings = fast_settings("pw");
        let package = package_with_index(
            vec![
                FileEntry::new("a.txt", "Il0Il"),
                FileEntry::new("b.txt", "Il0Il#b"),
                FileEntry::new("c.txt", "Il0Il#c"),
            ],
            vec![(
                "Il0Il",
                vec![
                    Part::new(b"alpha".to_vec()),
                    Part::new(b"beta".to_vec()).with_identifier(b"b".to_vec()),
                    Part::new(b"gamma".to_vec()).with_identifier(b"c".to_vec()),
                ],
            )],
            &mut settings,
        );

        let (plain, _) = password_codec("pw").unwrap(&package).unwrap();
        assert_eq!(plain.get_child("a.txt").unwrap().contents(), Some(&b"alpha"[..]));
        assert_eq!(plain.get_child("b.txt").unwrap().contents(), Some(&b"beta"[..]));
        assert_eq!(plain.get_child("c.txt").unwrap().contents(), Some(&b"gamma"[..]));
    }

    #[test]
    fn test_missing_main_object() {
        let package = Node::directory()
            .with_child("IlIlIl", Node::file(b"x".to_vec()))
            .unwrap();
        let err = PackageCodec::new().unwrap(&package).unwrap_err();
        assert!(matches!(err, Error::MissingFile(ref name) if name == MAIN_FILE_NAME));
    }

    #[test]
    fn test_flat_file_round_trip_keeps_attributes() {
        let mut input = Node::file(b"flat file body".to_vec());
        input.set_attribute("com.example.tag", b"blue".to_vec());

        let mut settings = fast_settings("pw");
        settings.password_hint = Some("colour of the sky".to_string());
        let wrapped = PackageCodec::new().wrap(&input, None, &mut settings).unwrap();

        assert!(wrapped.is_file());
        assert_eq!(
            wrapped.attribute(PASSWORD_HINT_ATTRIBUTE),
            Some(&b"colour of the sky"[..])
        );
        assert!(might_be_encrypted(&wrapped));

        let store = Arc::new(MemoryKeyStore::new().with_password("pw"));
        let codec = PackageCodec::new()
            .with_key_source(store.clone())
            .allow_interaction(true);
        let (plain, restored) = codec.unwrap(&wrapped).unwrap();

        assert_eq!(plain, input);
        assert_eq!(restored.password_hint.as_deref(), Some("colour of the sky"));
        assert_eq!(
            store.prompts(),
            vec![(0, Some("colour of the sky".to_string()))]
        );
    }

    #[test]
    fn test_dot_exposed_name_gets_cryptic_name() {
        let tree = Node::directory()
            .with_child("a.txt", Node::file(b"alpha".to_vec()))
            .unwrap();
        let mut schema = Schema::new();
        schema.insert(
            "a.txt".to_string(),
            FileSettings {
                expose_name: Some("..".to_string()),
                ..FileSettings::default()
            },
        );

        let mut settings = fast_settings("pw");
        let package = PackageCodec::new()
            .wrap(&tree, Some(&schema), &mut settings)
            .unwrap();
        let names = side_file_names(&package);
        assert_eq!(names.len(), 1);
        assert_ne!(names[0], "..");

        let (plain, _) = password_codec("pw").unwrap(&package).unwrap();
        assert_eq!(plain, tree);
    }

    #[test]
    fn test_hint_recovered_from_envelope_without_attribute() {
        let mut settings = fast_settings("pw");
        settings.password_hint = Some("first pet".to_string());
        let mut wrapped = PackageCodec::new()
            .wrap(&Node::file(b"body".to_vec()), None, &mut settings)
            .unwrap();
        wrapped.attributes.clear();

        let (plain, restored) = password_codec("pw").unwrap(&wrapped).unwrap();

        assert_eq!(plain.contents(), Some(&b"body"[..]));
        assert_eq!(restored.password_hint.as_deref(), Some("first pet"));
        assert!(!restored.legacy_hint);
        assert!(plain.attribute(PASSWORD_HINT_ATTRIBUTE).is_none());
    }

    #[test]
    fn test_legacy_hint_file() {
        let tree = sample_tree(2);
        let mut settings = fast_settings("pw");
        settings.password_hint = Some("hint".to_string());
        settings.legacy_hint = true;

        let package = PackageCodec::new().wrap(&tree, None, &mut settings).unwrap();
        assert_eq!(
            package.get_child(LEGACY_HINT_FILE_NAME).unwrap().contents(),
            Some(&b"hint"[..])
        );

        let mut without_attribute = package.clone();
        without_attribute.attributes.clear();
        let (plain, restored) = password_codec("pw").unwrap(&without_attribute).unwrap();
        assert_eq!(plain, tree);
        assert!(restored.legacy_hint);
        assert_eq!(restored.password_hint.as_deref(), Some("hint"));
    }

    #[test]
    fn test_sniffing() {
        assert!(!might_be_encrypted(&Node::file(b"plain text".to_vec())));
        assert!(!might_be_encrypted(&sample_tree(3)));

        let mut settings = fast_settings("pw");
        let package = PackageCodec::new()
            .wrap(&sample_tree(3), None, &mut settings)
            .unwrap();
        assert!(might_be_encrypted(&package));
    }

    #[test]
    fn test_decrypt_if_encrypted_passes_plaintext_through() {
        let tree = sample_tree(3);
        let (same, settings) = decrypt_if_encrypted(tree.clone(), &PackageCodec::new()).unwrap();
        assert_eq!(same, tree);
        assert!(settings.is_none());

        let mut settings = fast_settings("pw");
        let package = PackageCodec::new().wrap(&tree, None, &mut settings).unwrap();
        let (plain, settings) = decrypt_if_encrypted(package, &password_codec("pw")).unwrap();
        assert_eq!(plain, tree);
        assert!(settings.unwrap().has_password());
    }

    #[test]
    fn test_resave_to_same_recipients() {
        let tree = sample_tree(4);
        let mut settings = fast_settings("pw");
        let package = PackageCodec::new().wrap(&tree, None, &mut settings).unwrap();

        let (plain, mut restored) = password_codec("pw").unwrap(&package).unwrap();
        let resaved = PackageCodec::new().wrap(&plain, None, &mut restored).unwrap();

        let (again, _) = password_codec("pw").unwrap(&resaved).unwrap();
        assert_eq!(again, tree);
    }

    #[test]
    fn test_no_recipients() {
        let err = PackageCodec::new()
            .wrap(&sample_tree(1), None, &mut EncryptionSettings::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
