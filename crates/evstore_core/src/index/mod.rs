//! Read index over the transaction log.
//!
//! The read index turns physical records into logical streams. It is:
//! - Derived only from committed records below the writer checkpoint
//! - Fully rebuildable by replaying the log
//! - Shared copy-on-write, so scavenge can snapshot it cheaply
//!
//! # Queries
//!
//! - [`ReadIndex::read_event`]: one event by number, `-1` for the last
//! - [`ReadIndex::read_stream_forward`] / [`ReadIndex::read_stream_backward`]:
//!   pages of one stream
//! - [`ReadIndex::read_all_forward`] / [`ReadIndex::read_all_backward`]:
//!   pages of the whole log in commit order
//!
//! Link events are returned as they are. [`LinkResolver`] follows them.

mod event;
mod link;
mod reader;
mod stream;

pub use event::{
    AllSlice, EventRecord, ReadEventResult, SliceStatus, StreamInfo, StreamSlice,
};
pub use link::{LinkResolver, ResolvedEvent};
pub use reader::ReadIndex;
pub use stream::{IndexEntry, IndexSnapshot, StreamHistory};
