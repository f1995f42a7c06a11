//! Error types for EvStore core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in EvStore core operations.
///
/// Logical read misses are not errors: they are reported as
/// [`crate::ReadEventResult::NotFound`] or as empty slices.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] evstore_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored record failed to decode or verify.
    #[error("corrupt record: {message}")]
    CorruptRecord {
        /// Description of the corruption.
        message: String,
    },

    /// A chunk header or footer is invalid.
    #[error("chunk corruption: {message}")]
    ChunkCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// No record starts at the requested position, or the position is not
    /// yet covered by the writer checkpoint.
    #[error("no record at position {position}")]
    RecordNotFound {
        /// The requested log position.
        position: u64,
    },

    /// Optimistic concurrency check failed on append.
    #[error("wrong expected version for stream '{stream}': expected {expected}, actual {actual}")]
    WrongExpectedVersion {
        /// The stream being appended to.
        stream: String,
        /// The caller's expectation.
        expected: String,
        /// The stream's last event number (-1 when the stream does not exist).
        actual: i64,
    },

    /// A single record does not fit into an empty chunk.
    #[error("record of {record_size} bytes exceeds chunk size {chunk_size}")]
    OutOfSpace {
        /// Encoded size of the record.
        record_size: usize,
        /// Configured chunk data size.
        chunk_size: u64,
    },

    /// The append path failed earlier and refuses further writes.
    #[error("writer halted: {reason}")]
    WriterHalted {
        /// The failure that halted the writer.
        reason: String,
    },

    /// A scavenge pass was cancelled. The original chunk is untouched.
    #[error("scavenge aborted at chunk {chunk_number}")]
    ScavengeAborted {
        /// The chunk being processed when the abort was observed.
        chunk_number: u32,
    },

    /// A link event's target does not exist.
    #[error("link target {target} not found")]
    LinkUnresolved {
        /// The link payload, `{number}@{stream}`.
        target: String,
    },

    /// A link event's payload does not follow `{number}@{stream}`.
    #[error("malformed link payload: {message}")]
    MalformedLink {
        /// Description of the problem.
        message: String,
    },

    /// Store is already open or locked.
    #[error("store locked: another process has exclusive access")]
    DatabaseLocked,

    /// Invalid store format or version.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Invalid argument passed to an operation.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Store is closed.
    #[error("store is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates a corrupt record error.
    pub fn corrupt_record(message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            message: message.into(),
        }
    }

    /// Creates a chunk corruption error.
    pub fn chunk_corruption(message: impl Into<String>) -> Self {
        Self::ChunkCorruption {
            message: message.into(),
        }
    }

    /// Creates a malformed link error.
    pub fn malformed_link(message: impl Into<String>) -> Self {
        Self::MalformedLink {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors that indicate damaged stored data.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptRecord { .. } | Self::ChunkCorruption { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_classification() {
        assert!(CoreError::corrupt_record("bad crc").is_corruption());
        assert!(CoreError::chunk_corruption("bad footer").is_corruption());
        assert!(!CoreError::RecordNotFound { position: 3 }.is_corruption());
    }

    #[test]
    fn wrong_expected_version_message() {
        let err = CoreError::WrongExpectedVersion {
            stream: "orders".into(),
            expected: "3".into(),
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "wrong expected version for stream 'orders': expected 3, actual 5"
        );
    }
}
