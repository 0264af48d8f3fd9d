//! Error types for event-codec.

use thiserror::Error;

/// Errors raised while decoding a wire record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The payload did not split into the expected number of fields
    #[error("Malformed record: expected {expected} '|'-delimited fields, found {found}")]
    MalformedRecord { expected: usize, found: usize },

    /// The payload is not valid UTF-8
    #[error("Invalid UTF-8 in record: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

impl CodecError {
    /// Whether this is a field-count violation.
    pub fn is_malformed(&self) -> bool {
        matches!(self, CodecError::MalformedRecord { .. })
    }
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
