//! Per-file encryption settings.
//!
//! A schema maps the real names in one directory to [`FileSettings`]; the
//! `children` of an entry apply to the subdirectory of that name.
//!
//! ```json
//! {
//!   "contents.xml": { "options": "STORE_IN_MAIN | CONTENT_IS_XML" },
//!   "preview.png": { "expose_name": "preview.png", "options": "FILE_IS_OPTIONAL" },
//!   "Images": { "children": { "big.tiff": { "options": "COMPRESS" } } }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sealdoc_cms::CmsOptions;
use sealdoc_common::{Error, Result};

/// Settings for one directory level, keyed by real name.
pub type Schema = BTreeMap<String, FileSettings>;

/// Settings for one file or directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    pub options: CmsOptions,
    /// Store the side file under this name instead of a cryptic one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expose_name: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: Schema,
}

impl FileSettings {
    pub fn with_options(options: CmsOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }
}

/// Parse a schema from JSON.
pub fn from_json(json: &str) -> Result<Schema> {
    serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
}

/// Serialize a schema to JSON.
pub fn to_json(schema: &Schema) -> Result<String> {
    serde_json::to_string_pretty(schema).map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_schema() {
        let schema = from_json(
            r#"{
                "contents.xml": { "options": "STORE_IN_MAIN | CONTENT_IS_XML" },
                "preview.png": { "expose_name": "preview.png", "options": "FILE_IS_OPTIONAL" },
                "Images": { "children": { "big.tiff": { "options": "COMPRESS" } } }
            }"#,
        )
        .unwrap();

        assert_eq!(
            schema["contents.xml"].options,
            CmsOptions::STORE_IN_MAIN | CmsOptions::CONTENT_IS_XML
        );
        assert_eq!(schema["preview.png"].expose_name.as_deref(), Some("preview.png"));
        assert_eq!(
            schema["Images"].children["big.tiff"].options,
            CmsOptions::COMPRESS
        );
    }

    #[test]
    fn test_schema_serialization() {
        let mut schema = Schema::new();
        schema.insert(
            "a".to_string(),
            FileSettings::with_options(CmsOptions::FILE_IS_OPTIONAL),
        );

        let json = to_json(&schema).unwrap();
        assert!(!json.contains("expose_name"));
        assert_eq!(from_json(&json).unwrap(), schema);
    }

    #[test]
    fn test_invalid_schema() {
        assert!(matches!(
            from_json("{\"a\": 3}"),
            Err(Error::Serialization(_))
        ));
    }
}
