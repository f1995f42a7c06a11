//! Link event payloads.
//!
//! A link event's data is the UTF-8 text `{eventNumber}@{streamId}` with no
//! byte-order mark. Every reader and writer must agree on this grammar.

use crate::error::{CoreError, CoreResult};
use std::fmt;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// The event a link points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkTarget {
    /// Target event number.
    pub event_number: i64,
    /// Target stream.
    pub stream_id: String,
}

impl LinkTarget {
    /// Creates a new link target.
    pub fn new(event_number: i64, stream_id: impl Into<String>) -> Self {
        Self {
            event_number,
            stream_id: stream_id.into(),
        }
    }

    /// Parses a link payload.
    ///
    /// The split happens at the first `@`, so stream ids may themselves
    /// contain `@`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedLink` for a byte-order mark, invalid UTF-8, a
    /// missing `@`, a non-numeric or negative event number, or an empty
    /// stream id.
    pub fn parse(data: &[u8]) -> CoreResult<Self> {
        if data.starts_with(UTF8_BOM) {
            return Err(CoreError::malformed_link("payload starts with a byte-order mark"));
        }
        let text = std::str::from_utf8(data)
            .map_err(|_| CoreError::malformed_link("payload is not valid UTF-8"))?;
        let (number, stream) = text
            .split_once('@')
            .ok_or_else(|| CoreError::malformed_link(format!("missing '@' in '{text}'")))?;

        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::malformed_link(format!(
                "invalid event number '{number}'"
            )));
        }
        let event_number: i64 = number
            .parse()
            .map_err(|_| CoreError::malformed_link(format!("event number '{number}' out of range")))?;
        if stream.is_empty() {
            return Err(CoreError::malformed_link("empty stream id"));
        }

        Ok(Self::new(event_number, stream))
    }

    /// Encodes the target as a link payload.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.event_number, self.stream_id)
    }
}
