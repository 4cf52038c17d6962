//! Loading and saving document trees on the local filesystem.
//!
//! Extended attributes are not read or written; a password hint survives
//! on disk only through the `.iwph` file.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::tree::{Node, NodeKind};
use sealdoc_common::{Error, Result};

/// Read a file or directory into a tree.
///
/// Entries that are neither regular files nor directories are skipped.
///
/// # Errors
/// - `NotFound` if `path` does not exist
/// - `Io` on read failures
pub fn load(path: impl AsRef<Path>) -> Result<Node> {
    let path = path.as_ref();
    let metadata = fs::metadata(path)
        .map_err(|_| Error::NotFound(format!("Path not found: {}", path.display())))?;

    if metadata.is_file() {
        return Ok(Node::file(fs::read(path)?));
    }

    let mut node = Node::directory();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = fs::metadata(entry.path())?.file_type();
        if file_type.is_file() || file_type.is_dir() {
            node.add_child(name, load(entry.path())?)?;
        } else {
            debug!(path = %entry.path().display(), "Skipping special file");
        }
    }
    Ok(node)
}

/// Write a tree to `path`.
///
/// # Preconditions
/// - Nothing exists at `path`
///
/// # Errors
/// - `AlreadyExists` if `path` exists
/// - `Io` on write failures
pub fn save(node: &Node, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Err(Error::AlreadyExists(format!(
            "Path already exists: {}",
            path.display()
        )));
    }
    write_node(node, path)
}

fn write_node(node: &Node, path: &Path) -> Result<()> {
    match &node.kind {
        NodeKind::File(contents) => fs::write(path, contents)?,
        NodeKind::Directory(children) => {
            fs::create_dir_all(path)?;
            for (name, child) in children {
                write_node(child, &path.join(name))?;
            }
        }
    }
    Ok(())
}
