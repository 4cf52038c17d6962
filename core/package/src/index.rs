//! The package index document.
//!
//! The index maps real names to stored names and carries the key shared by
//! all side files. It is stored as a small XML document:
//!
//! ```xml
//! <index xmlns="urn:x-sealdoc:package-index" xmlns:xl="http://www.w3.org/1999/xlink">
//!   <key id="0a1b...">4f5e...</key>
//!   <directory name="Images">
//!     <file name="photo.png" xl:href="IO01lI"/>
//!   </directory>
//!   <file name="contents.xml" xl:href="#part1" optional="1"/>
//! </index>
//! ```

use std::collections::BTreeMap;

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use quick_xml::Writer;

use sealdoc_cms::CmsOptions;
use sealdoc_common::{Error, Result};
use sealdoc_crypto::keys::KeyEncryptionKey;

/// Namespace of the index vocabulary.
pub const INDEX_NAMESPACE: &str = "urn:x-sealdoc:package-index";
/// Namespace of the `href` attribute.
pub const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";

const STRUCTURE: &str = "package index";

/// A file in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub real_name: String,
    /// `<side file>` or `<side file>#<part>`; an empty side file means the
    /// main object.
    pub stored_name: String,
    pub options: CmsOptions,
}

impl FileEntry {
    pub fn new(real_name: impl Into<String>, stored_name: impl Into<String>) -> Self {
        Self {
            real_name: real_name.into(),
            stored_name: stored_name.into(),
            options: CmsOptions::empty(),
        }
    }

    pub fn with_options(mut self, options: CmsOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_optional(&self) -> bool {
        self.options.contains(CmsOptions::FILE_IS_OPTIONAL)
    }

    /// Split the stored name into the physical file and the part within it.
    pub fn location(&self) -> (&str, Option<&str>) {
        match self.stored_name.split_once('#') {
            Some((file, part)) => (file, Some(part)),
            None => (self.stored_name.as_str(), None),
        }
    }
}

/// A directory in the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub real_name: String,
    pub files: Vec<FileEntry>,
    pub directories: Vec<DirectoryEntry>,
}

impl DirectoryEntry {
    pub fn new(real_name: impl Into<String>) -> Self {
        Self {
            real_name: real_name.into(),
            ..Self::default()
        }
    }

    /// All file entries at any depth.
    pub fn all_files(&self) -> Vec<&FileEntry> {
        let mut files: Vec<&FileEntry> = self.files.iter().collect();
        for directory in &self.directories {
            files.extend(directory.all_files());
        }
        files
    }
}

/// Real-name to stored-name mapping plus the keys needed to read side files.
#[derive(Debug, Clone, Default)]
pub struct PackageIndex {
    pub files: Vec<FileEntry>,
    pub directories: Vec<DirectoryEntry>,
    /// Pre-shared keys by key identifier.
    pub keys: BTreeMap<Vec<u8>, KeyEncryptionKey>,
}

impl PackageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// All file entries at any depth.
    pub fn all_files(&self) -> Vec<&FileEntry> {
        let mut files: Vec<&FileEntry> = self.files.iter().collect();
        for directory in &self.directories {
            files.extend(directory.all_files());
        }
        files
    }

    /// Serialize to XML.
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_error)?;

        let mut root = BytesStart::new("index");
        root.push_attribute(("xmlns", INDEX_NAMESPACE));
        root.push_attribute(("xmlns:xl", XLINK_NAMESPACE));
        writer.write_event(Event::Start(root)).map_err(xml_error)?;

        for (id, kek) in &self.keys {
            let id = hex::encode(id);
            let mut key = BytesStart::new("key");
            key.push_attribute(("id", id.as_str()));
            writer.write_event(Event::Start(key)).map_err(xml_error)?;
            writer
                .write_event(Event::Text(BytesText::new(&hex::encode(kek.as_bytes()))))
                .map_err(xml_error)?;
            writer
                .write_event(Event::End(BytesEnd::new("key")))
                .map_err(xml_error)?;
        }

        for directory in &self.directories {
            write_directory(&mut writer, directory)?;
        }
        for file in &self.files {
            write_file(&mut writer, file)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("index")))
            .map_err(xml_error)?;
        Ok(writer.into_inner())
    }

    /// Parse from XML.
    ///
    /// Elements outside the index vocabulary are skipped.
    ///
    /// # Errors
    /// - `Format` if the XML is malformed, the root element is not an index,
    ///   or a required attribute is missing
    pub fn from_xml(bytes: &[u8]) -> Result<Self> {
        let mut reader = NsReader::from_reader(bytes);
        reader.trim_text(true);

        // Each frame holds the entries of one open directory.
        let mut stack: Vec<DirectoryEntry> = Vec::new();
        let mut keys = BTreeMap::new();
        let mut seen_root = false;

        loop {
            let (ns, event) = reader.read_resolved_event().map_err(xml_error)?;
            let known = in_index_namespace(&ns);
            let is_empty = matches!(event, Event::Empty(_));
            match event {
                Event::Start(e) | Event::Empty(e) if !seen_root => {
                    if !known || e.local_name().as_ref() != b"index" {
                        return Err(Error::format(
                            STRUCTURE,
                            format!(
                                "Incorrect root element: {}",
                                String::from_utf8_lossy(e.name().as_ref())
                            ),
                        ));
                    }
                    seen_root = true;
                    stack.push(DirectoryEntry::default());
                    if is_empty {
                        break;
                    }
                }
                Event::Start(e) => match e.local_name().as_ref() {
                    b"directory" if known => {
                        stack.push(DirectoryEntry::new(required(&reader, &e, "name", false)?));
                    }
                    b"file" if known => {
                        push_file(&mut stack, read_file(&reader, &e)?)?;
                        reader.read_to_end(e.name()).map_err(xml_error)?;
                    }
                    b"key" if known => {
                        let id = required(&reader, &e, "id", false)?;
                        let material = read_text(&mut reader)?;
                        let id =
                            hex::decode(id.trim()).map_err(|e| Error::format(STRUCTURE, e))?;
                        let material = hex::decode(material.trim())
                            .map_err(|e| Error::format(STRUCTURE, e))?;
                        keys.insert(id, KeyEncryptionKey::from_slice(&material)?);
                    }
                    _ => {
                        reader.read_to_end(e.name()).map_err(xml_error)?;
                    }
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"directory" if known => {
                        let directory = DirectoryEntry::new(required(&reader, &e, "name", false)?);
                        push_directory(&mut stack, directory)?;
                    }
                    b"file" if known => push_file(&mut stack, read_file(&reader, &e)?)?,
                    b"key" if known => {
                        return Err(Error::format(STRUCTURE, "Key without material"));
                    }
                    _ => {}
                },
                Event::End(_) => {
                    let finished = stack
                        .pop()
                        .ok_or_else(|| Error::format(STRUCTURE, "Unbalanced end tag"))?;
                    if stack.is_empty() {
                        stack.push(finished);
                        break;
                    }
                    push_directory(&mut stack, finished)?;
                }
                Event::Eof => {
                    return Err(Error::format(
                        STRUCTURE,
                        if seen_root {
                            "Unexpected end of document"
                        } else {
                            "No root element"
                        },
                    ));
                }
                _ => {}
            }
        }

        let root = stack
            .pop()
            .ok_or_else(|| Error::format(STRUCTURE, "No root element"))?;
        Ok(Self {
            files: root.files,
            directories: root.directories,
            keys,
        })
    }
}

fn xml_error(e: impl ToString) -> Error {
    Error::format(STRUCTURE, e)
}

/// Collect the text of the element just opened, consuming its end tag.
fn read_text(reader: &mut NsReader<&[u8]>) -> Result<String> {
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Text(t) => text.push_str(&t.unescape().map_err(xml_error)?),
            Event::End(_) => return Ok(text),
            Event::Eof => return Err(Error::format(STRUCTURE, "Unterminated element")),
            Event::Start(e) => {
                reader.read_to_end(e.name()).map_err(xml_error)?;
            }
            _ => {}
        }
    }
}

fn in_index_namespace(ns: &ResolveResult) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(uri)) if *uri == INDEX_NAMESPACE.as_bytes())
}

fn write_file(writer: &mut Writer<Vec<u8>>, file: &FileEntry) -> Result<()> {
    let mut element = BytesStart::new("file");
    element.push_attribute(("name", file.real_name.as_str()));
    element.push_attribute(("xl:href", file.stored_name.as_str()));
    if file.is_optional() {
        element.push_attribute(("optional", "1"));
    }
    writer.write_event(Event::Empty(element)).map_err(xml_error)
}

fn write_directory(writer: &mut Writer<Vec<u8>>, directory: &DirectoryEntry) -> Result<()> {
    let mut element = BytesStart::new("directory");
    element.push_attribute(("name", directory.real_name.as_str()));
    writer.write_event(Event::Start(element)).map_err(xml_error)?;
    for file in &directory.files {
        write_file(writer, file)?;
    }
    for subdirectory in &directory.directories {
        write_directory(writer, subdirectory)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("directory")))
        .map_err(xml_error)
}

/// Look up an attribute by local name. `xlink` selects the xlink namespace,
/// otherwise the attribute must be unqualified.
fn attribute(
    reader: &NsReader<&[u8]>,
    element: &BytesStart,
    name: &str,
    xlink: bool,
) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr: Attribute = attr.map_err(xml_error)?;
        let (ns, local) = reader.resolve_attribute(attr.key);
        if local.as_ref() != name.as_bytes() {
            continue;
        }
        let matches = match ns {
            ResolveResult::Bound(Namespace(uri)) => xlink && uri == XLINK_NAMESPACE.as_bytes(),
            ResolveResult::Unbound => !xlink,
            ResolveResult::Unknown(_) => false,
        };
        if matches {
            return Ok(Some(attr.unescape_value().map_err(xml_error)?.into_owned()));
        }
    }
    Ok(None)
}

fn required(
    reader: &NsReader<&[u8]>,
    element: &BytesStart,
    name: &str,
    xlink: bool,
) -> Result<String> {
    attribute(reader, element, name, xlink)?.ok_or_else(|| {
        Error::format(
            STRUCTURE,
            format!(
                "Missing <{}> attribute '{}'",
                String::from_utf8_lossy(element.local_name().as_ref()),
                name
            ),
        )
    })
}

fn read_file(reader: &NsReader<&[u8]>, element: &BytesStart) -> Result<FileEntry> {
    let real_name = required(reader, element, "name", false)?;
    let stored_name = required(reader, element, "href", true)?;
    let optional = attribute(reader, element, "optional", false)?
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let mut entry = FileEntry::new(real_name, stored_name);
    if optional {
        entry.options |= CmsOptions::FILE_IS_OPTIONAL;
    }
    Ok(entry)
}

fn push_file(stack: &mut [DirectoryEntry], file: FileEntry) -> Result<()> {
    stack
        .last_mut()
        .ok_or_else(|| Error::format(STRUCTURE, "File outside index"))?
        .files
        .push(file);
    Ok(())
}

fn push_directory(stack: &mut [DirectoryEntry], directory: DirectoryEntry) -> Result<()> {
    stack
        .last_mut()
        .ok_or_else(|| Error::format(STRUCTURE, "Directory outside index"))?
        .directories
        .push(directory);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> PackageIndex {
        let mut index = PackageIndex::new();
        index
            .keys
            .insert(vec![0x0a, 0x1b], KeyEncryptionKey::from_bytes([7u8; 32]));
        index.files.push(FileEntry::new("contents.xml", "#part1"));
        index.files.push(
            FileEntry::new("notes & <draft>.txt", "lI0O1l")
                .with_options(CmsOptions::FILE_IS_OPTIONAL),
        );

        let mut images = DirectoryEntry::new("Images");
        images.files.push(FileEntry::new("photo.png", "IlOOl1"));
        images.directories.push(DirectoryEntry::new("Empty"));
        index.directories.push(images);
        index
    }

    #[test]
    fn test_xml_round_trip() {
        let original = sample();
        let xml = original.to_xml().unwrap();
        let restored = PackageIndex::from_xml(&xml).unwrap();

        assert_eq!(restored.files, original.files);
        assert_eq!(restored.directories, original.directories);
        assert_eq!(restored.keys.len(), 1);
        assert!(restored.keys[&vec![0x0a, 0x1b]].ct_eq(&KeyEncryptionKey::from_bytes([7u8; 32])));
    }

    #[test]
    fn test_xml_shape() {
        let xml = String::from_utf8(sample().to_xml().unwrap()).unwrap();
        assert!(xml.contains(r#"xmlns:xl="http://www.w3.org/1999/xlink""#));
        assert!(xml.contains(r#"<key id="0a1b">"#));
        assert!(xml.contains(r##"xl:href="#part1""##));
        assert!(xml.contains(r#"optional="1""#));
    }

    #[test]
    fn test_unknown_elements_are_ignored() {
        let xml = format!(
            r##"<?xml version="1.0"?>
            <index xmlns="{INDEX_NAMESPACE}" xmlns:link="{XLINK_NAMESPACE}">
              <comment>ignored <b>entirely</b></comment>
              <extra/>
              <directory name="d">
                <file name="a" link:href="IlI0Il" optional="true"></file>
              </directory>
              <file name="b" link:href="#part2"/>
            </index>"##
        );
        let index = PackageIndex::from_xml(xml.as_bytes()).unwrap();

        assert_eq!(index.files, vec![FileEntry::new("b", "#part2")]);
        assert_eq!(index.directories.len(), 1);
        assert_eq!(index.directories[0].files[0].stored_name, "IlI0Il");
        assert!(index.directories[0].files[0].is_optional());
        assert_eq!(index.all_files().len(), 2);
    }

    #[test]
    fn test_wrong_root_is_rejected() {
        let err = PackageIndex::from_xml(br#"<index xmlns="urn:other"/>"#).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));

        let err = PackageIndex::from_xml(b"<other/>").unwrap_err();
        assert!(err.to_string().contains("Incorrect root element"));
    }

    #[test]
    fn test_missing_href_is_rejected() {
        let xml = format!(r#"<index xmlns="{INDEX_NAMESPACE}"><file name="a"/></index>"#);
        let err = PackageIndex::from_xml(xml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("href"));
    }

    #[test]
    fn test_empty_index() {
        let xml = format!(r#"<index xmlns="{INDEX_NAMESPACE}"/>"#);
        let index = PackageIndex::from_xml(xml.as_bytes()).unwrap();
        assert!(index.files.is_empty());
        assert!(index.keys.is_empty());
    }

    #[test]
    fn test_location() {
        assert_eq!(FileEntry::new("a", "#part1").location(), ("", Some("part1")));
        assert_eq!(FileEntry::new("a", "IlI0Il").location(), ("IlI0Il", None));
        assert_eq!(
            FileEntry::new("a", "IlI0Il#x").location(),
            ("IlI0Il", Some("x"))
        );
    }

    proptest! {
        #[test]
        fn test_names_survive_escaping(
            real in "[a-zA-Z0-9 &<>\"'._#-]{1,24}",
            dir in "[a-zA-Z0-9 &<>\"'._-]{1,24}",
        ) {
            let mut index = PackageIndex::new();
            let mut directory = DirectoryEntry::new(dir);
            directory.files.push(FileEntry::new(real.clone(), "IlOl"));
            index.directories.push(directory);
            index.files.push(FileEntry::new(real, "#part1"));

            let restored = PackageIndex::from_xml(&index.to_xml().unwrap()).unwrap();
            prop_assert_eq!(restored.files, index.files);
            prop_assert_eq!(restored.directories, index.directories);
        }
    }
}
