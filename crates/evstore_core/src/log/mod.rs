//! Log record model.
//!
//! The transaction log holds three kinds of records:
//!
//! - **Prepare** - one event of a stream, invisible until committed
//! - **Commit** - finalizes the prepares of one transaction
//! - **System** - administrative markers (scavenge bookkeeping)
//!
//! ## Record Format
//!
//! ```text
//! | length (4) | type (1) | version (1) | position (8) | payload (N) | crc32 (4) | length (4) |
//! ```
//!
//! The length is written at both ends so the log can be walked backwards.
//! A record whose lengths, checksum, type or version do not check out is
//! reported as `CorruptRecord`; it is never skipped.

mod link;
mod record;

pub use link::LinkTarget;
pub(crate) use record::read_length;
pub use record::{
    compute_crc32, CommitRecord, LogRecord, LogRecordType, PrepareFlags, PrepareRecord,
    SystemRecord, SystemRecordKind, LENGTH_SIZE, RECORD_OVERHEAD, RECORD_VERSION,
};
