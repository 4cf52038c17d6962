//! Abstract document tree.
//!
//! Packages are built from and unpacked into a [`Node`] value rather than a
//! live filesystem; [`crate::disk`] converts between the two.

use std::collections::BTreeMap;

use sealdoc_common::{Error, Result};

/// Extended attributes of a node, keyed by attribute name.
pub type Attributes = BTreeMap<String, Vec<u8>>;

/// Contents of a tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File(Vec<u8>),
    Directory(BTreeMap<String, Node>),
}

/// A file or directory in a document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub attributes: Attributes,
}

impl Node {
    /// Create a new file node.
    pub fn file(contents: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: NodeKind::File(contents.into()),
            attributes: Attributes::new(),
        }
    }

    /// Create a new, empty directory node.
    pub fn directory() -> Self {
        Self {
            kind: NodeKind::Directory(BTreeMap::new()),
            attributes: Attributes::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File(_))
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    /// File contents, if this is a file.
    pub fn contents(&self) -> Option<&[u8]> {
        match &self.kind {
            NodeKind::File(contents) => Some(contents),
            NodeKind::Directory(_) => None,
        }
    }

    /// Children, if this is a directory.
    pub fn children(&self) -> Option<&BTreeMap<String, Node>> {
        match &self.kind {
            NodeKind::Directory(children) => Some(children),
            NodeKind::File(_) => None,
        }
    }

    /// Get child by name.
    pub fn get_child(&self, name: &str) -> Option<&Node> {
        self.children().and_then(|children| children.get(name))
    }

    /// Add a child node.
    ///
    /// # Errors
    /// - `InvalidInput` if this node is a file or the name is not a single
    ///   path component
    /// - `AlreadyExists` if a child with that name exists
    pub fn add_child(&mut self, name: impl Into<String>, node: Node) -> Result<()> {
        let name = name.into();
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(Error::InvalidInput(format!("Invalid child name '{}'", name)));
        }

        let NodeKind::Directory(children) = &mut self.kind else {
            return Err(Error::InvalidInput("Cannot add child to file".to_string()));
        };

        if children.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Child '{}' already exists",
                name
            )));
        }

        children.insert(name, node);
        Ok(())
    }

    /// Builder form of [`Node::add_child`].
    pub fn with_child(mut self, name: impl Into<String>, node: Node) -> Result<Self> {
        self.add_child(name, node)?;
        Ok(self)
    }

    /// Remove a child by name.
    pub fn remove_child(&mut self, name: &str) -> Result<Node> {
        match &mut self.kind {
            NodeKind::Directory(children) => children
                .remove(name)
                .ok_or_else(|| Error::NotFound(format!("Child '{}' not found", name))),
            NodeKind::File(_) => Err(Error::InvalidInput("Not a directory".to_string())),
        }
    }

    /// Navigate to a descendant by a `/`-separated relative path.
    pub fn get_path(&self, path: &str) -> Result<&Node> {
        let mut current = self;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = current
                .get_child(component)
                .ok_or_else(|| Error::NotFound(format!("Path not found: {}", path)))?;
        }
        Ok(current)
    }

    pub fn attribute(&self, name: &str) -> Option<&[u8]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Count the regular files at any depth.
    pub fn count_files(&self) -> usize {
        match &self.kind {
            NodeKind::File(_) => 1,
            NodeKind::Directory(children) => children.values().map(Node::count_files).sum(),
        }
    }

    /// Total size of all file contents.
    pub fn total_size(&self) -> u64 {
        match &self.kind {
            NodeKind::File(contents) => contents.len() as u64,
            NodeKind::Directory(children) => children.values().map(Node::total_size).sum(),
        }
    }
}
