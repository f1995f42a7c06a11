//! Chunked transaction log.
//!
//! The log is a sequence of chunks covering consecutive ranges of global
//! positions. Chunk `n + 1` starts where chunk `n` ends. Every chunk but
//! the last is sealed and never written again, except that scavenge may
//! replace it wholesale with a smaller chunk covering the same range.
//!
//! - [`LogWriter`] - the single append path, owner of the writer checkpoint
//! - [`ChunkManager`] - the arena of chunk handles
//! - [`LogScan`] - lazy forward and backward scans

mod file;
mod format;
mod manager;
mod scan;
mod writer;

pub use file::Chunk;
pub use format::{
    ChunkFooter, ChunkHeader, FooterTail, PosMapEntry, FOOTER_MAGIC, FOOTER_TAIL_SIZE,
    HEADER_MAGIC, HEADER_SIZE, POSMAP_ENTRY_SIZE,
};
pub use manager::{ChunkInfo, ChunkManager, ChunkStore};
pub use scan::LogScan;
pub use writer::LogWriter;
