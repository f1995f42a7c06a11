//! # EvStore Storage
//!
//! Byte-store backends underneath the EvStore chunked log.
//!
//! Every chunk of the transaction log sits on top of one [`StorageBackend`].
//! Backends are **opaque byte stores**: they know nothing about chunk
//! headers, log records or position maps. `evstore_core` owns all format
//! interpretation.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral stores and tests
//! - [`FileBackend`] - one OS file per chunk
//!
//! ## Example
//!
//! ```rust
//! use evstore_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"chunk bytes").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"chunk bytes");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
