//! Common error types for sealdoc.

use thiserror::Error;

/// Top-level error type for sealdoc operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A structure (DER, XML, package layout) could not be parsed.
    #[error("Malformed {structure}: {reason}")]
    Format { structure: String, reason: String },

    /// The input uses a recognized feature this engine does not implement.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// No recipient could supply the content encryption key.
    #[error("No key is available to decrypt this content")]
    KeyNotAvailable {
        #[source]
        source: Option<Box<Error>>,
    },

    /// A specific key or password was tried and is simply wrong.
    #[error("The supplied key or password does not apply")]
    KeyNotApplicable,

    /// The user declined to provide a credential.
    #[error("Cancelled by user")]
    UserCancelled,

    /// A member of an encrypted package is missing or unreadable.
    #[error("The encrypted item \"{0}\" is missing or unreadable")]
    MissingFile(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Build a format error naming the structure that failed to parse.
    pub fn format(structure: impl Into<String>, reason: impl ToString) -> Self {
        Error::Format {
            structure: structure.into(),
            reason: reason.to_string(),
        }
    }

    /// A bare `KeyNotAvailable` with no underlying cause.
    pub fn key_not_available() -> Self {
        Error::KeyNotAvailable { source: None }
    }

    /// `KeyNotAvailable` carrying the last error seen while trying keys.
    pub fn key_not_available_because(cause: Error) -> Self {
        Error::KeyNotAvailable {
            source: Some(Box::new(cause)),
        }
    }

    /// Whether the user declined to supply a credential.
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, Error::UserCancelled)
    }

    /// Whether a tried key or password was wrong (as opposed to unusable).
    pub fn is_key_not_applicable(&self) -> bool {
        matches!(self, Error::KeyNotApplicable)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_format_error_names_structure() {
        let err = Error::format("EnvelopedData", "truncated");
        assert_eq!(err.to_string(), "Malformed EnvelopedData: truncated");
    }

    #[test]
    fn test_key_not_available_keeps_cause() {
        let err = Error::key_not_available_because(Error::KeyNotApplicable);
        let cause = err.source().unwrap();
        assert_eq!(cause.to_string(), Error::KeyNotApplicable.to_string());

        assert!(Error::key_not_available().source().is_none());
    }

    #[test]
    fn test_classification_helpers() {
        assert!(Error::UserCancelled.is_user_cancelled());
        assert!(!Error::KeyNotApplicable.is_user_cancelled());
        assert!(Error::KeyNotApplicable.is_key_not_applicable());
    }
}
