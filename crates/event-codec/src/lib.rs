//! Wire codec for event records.
//!
//! Events travel as UTF-8 text with four `|`-delimited fields in a fixed order:
//!
//! ```text
//! id|correlation_id|causation_id|payload
//! ```
//!
//! There is no escaping. A payload that itself contains `|` yields more than four
//! fields and is rejected as malformed; a field value containing `|` cannot be
//! represented at all.
//!
//! # Example
//!
//! ```rust
//! use event_codec::{decode, EventRecord};
//!
//! let record = decode(b"e1|c1|p1|hello").unwrap();
//! assert_eq!(record.id, "e1");
//! assert_eq!(record.payload, "hello");
//! assert_eq!(record.encode(), "e1|c1|p1|hello");
//! ```

mod error;

pub use error::{CodecError, Result};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Field separator of the wire format.
pub const DELIMITER: char = '|';

/// Number of fields in every well-formed record.
pub const FIELD_COUNT: usize = 4;

/// A decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventRecord {
    /// Source-assigned event identifier
    pub id: String,
    /// Identifier shared by every event of one logical operation
    pub correlation_id: String,
    /// Identifier of the event that caused this one
    pub causation_id: String,
    /// Opaque application message
    pub payload: String,
}

impl EventRecord {
    pub fn new(
        id: impl Into<String>,
        correlation_id: impl Into<String>,
        causation_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            correlation_id: correlation_id.into(),
            causation_id: causation_id.into(),
            payload: payload.into(),
        }
    }

    /// Encode into the wire format.
    ///
    /// Fields are joined verbatim, so a field containing [`DELIMITER`] produces
    /// text that does not decode back into the same record.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            self.id, self.correlation_id, self.causation_id, self.payload
        )
    }
}

/// Decode a raw payload into an [`EventRecord`].
///
/// Fails with [`CodecError::MalformedRecord`] unless the text splits into exactly
/// [`FIELD_COUNT`] fields, and with [`CodecError::InvalidUtf8`] if the bytes are
/// not UTF-8.
pub fn decode(bytes: &[u8]) -> Result<EventRecord> {
    let text = std::str::from_utf8(bytes)?;
    let fields: Vec<&str> = text.split(DELIMITER).collect();

    let [id, correlation_id, causation_id, payload] = fields.as_slice() else {
        return Err(CodecError::MalformedRecord {
            expected: FIELD_COUNT,
            found: fields.len(),
        });
    };

    Ok(EventRecord::new(*id, *correlation_id, *causation_id, *payload))
}

impl std::str::FromStr for EventRecord {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        decode(s.as_bytes())
    }
}
