//! # EvStore Core
//!
//! Core engine for EvStore, an append-only event store.
//!
//! This crate provides:
//! - A chunked transaction log of prepare, commit and system records
//! - A durable writer checkpoint that bounds what readers may see
//! - A read index projecting the log into numbered streams
//! - Link events and their resolution
//! - Scavenge, which rewrites sealed chunks under a retention policy while
//!   keeping every stream's last event
//!
//! ## Example
//!
//! ```rust
//! use evstore_core::{Database, ExpectedVersion, NewEvent, TFPos};
//!
//! let db = Database::open_in_memory().unwrap();
//! db.append("orders", ExpectedVersion::NoStream, vec![NewEvent::json("Placed", b"{}".to_vec())])
//!     .unwrap();
//! db.append("audit", ExpectedVersion::Any, vec![NewEvent::link_to("orders", 0)])
//!     .unwrap();
//!
//! let link = db.read_event("audit", 0).unwrap().into_event().unwrap();
//! let resolved = db.resolve_link(link).unwrap();
//! assert_eq!(resolved.event.stream_id, "orders");
//!
//! let all = db.read_all_forward(TFPos::START, 10).unwrap();
//! assert_eq!(all.events.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod checkpoint;
pub mod chunk;
mod config;
mod database;
pub mod dir;
mod error;
pub mod index;
pub mod log;
pub mod scavenge;
mod stats;
mod types;

pub use checkpoint::{CheckpointReader, WriterCheckpoint};
pub use chunk::{ChunkInfo, LogScan};
pub use config::{Config, MIN_CHUNK_SIZE};
pub use database::{AppendResult, Database, NewEvent};
pub use error::{CoreError, CoreResult};
pub use index::{
    AllSlice, EventRecord, LinkResolver, ReadEventResult, ResolvedEvent, SliceStatus, StreamInfo,
    StreamSlice,
};
pub use log::{
    CommitRecord, LinkTarget, LogRecord, LogRecordType, PrepareFlags, PrepareRecord, SystemRecord,
    SystemRecordKind,
};
pub use scavenge::{
    CancelToken, DiscardUnresolvedLinks, ProgressSnapshot, RetentionPolicy, ScavengeHandle,
    ScavengeResult,
};
pub use stats::{StatsSnapshot, StoreStats};
pub use types::{now_millis, ExpectedVersion, TFPos, LINK_EVENT_TYPE, NO_EVENT_NUMBER};
