//! Cryptic side-file names.
//!
//! Names are drawn from a five-glyph alphabet of look-alike characters. The
//! first and last glyph are letters so a name never starts or ends with a
//! digit.

use std::collections::HashSet;

use rand::rngs::OsRng;
use rand::Rng;

const ALPHABET: [char; 5] = ['I', 'l', 'O', '0', '1'];
const EDGE_ALPHABET: [char; 2] = ['I', 'l'];

/// Name length for a package holding `file_count` files.
pub fn name_length(file_count: usize) -> usize {
    if file_count < 125 {
        6
    } else if file_count < 600 {
        8
    } else {
        15
    }
}

/// Generate one random name of the given length.
pub fn generate_cryptic_name(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|i| {
            if i == 0 || i + 1 == length {
                EDGE_ALPHABET[rng.gen_range(0..EDGE_ALPHABET.len())]
            } else {
                ALPHABET[rng.gen_range(0..ALPHABET.len())]
            }
        })
        .collect()
}

/// Whether `name` can be a side-file name inside a package directory.
fn is_storable(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(|c: char| c == '/' || c == '#')
}

/// Hands out stored names that are unique within one package.
#[derive(Debug)]
pub struct NameAllocator {
    length: usize,
    taken: HashSet<String>,
}

impl NameAllocator {
    /// Create an allocator sized for `file_count` files.
    ///
    /// `reserved` names are never handed out.
    pub fn new<'a>(file_count: usize, reserved: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            length: name_length(file_count),
            taken: reserved.into_iter().map(str::to_string).collect(),
        }
    }

    /// Allocate a name, preferring `exposed` when it is still free.
    pub fn allocate(&mut self, exposed: Option<&str>) -> String {
        let mut name = match exposed {
            Some(name) if is_storable(name) => name.to_string(),
            _ => generate_cryptic_name(self.length),
        };
        while self.taken.contains(&name) {
            name = generate_cryptic_name(self.length);
        }
        self.taken.insert(name.clone());
        name
    }

    pub fn len(&self) -> usize {
        self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}
