//! Store directory management.
//!
//! This module handles the file system layout for EvStore:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                    # Advisory lock for single-writer
//! ├─ writer.chk              # Writer checkpoint
//! ├─ chunk-000000.000000     # Chunk 0, version 0
//! ├─ chunk-000001.000002     # Chunk 1, rewritten twice by scavenge
//! └─ chunk-000002.000000     # Open chunk
//! ```
//!
//! A chunk file name carries the chunk number and its scavenge version.
//! Scavenge writes `*.tmp` files and renames them into place, so on open
//! the highest version of each chunk is authoritative and anything else is
//! left over from an interrupted pass.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCK_FILE: &str = "LOCK";
const CHECKPOINT_FILE: &str = "writer.chk";
const CHUNK_PREFIX: &str = "chunk-";
const TEMP_SUFFIX: &str = ".tmp";

/// A chunk file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    /// Chunk number.
    pub number: u32,
    /// Scavenge version.
    pub version: u32,
    /// Full path.
    pub path: PathBuf,
}

/// Manages the store directory structure and file locking.
///
/// The `StoreDir` holds an exclusive lock on the directory for its whole
/// lifetime. Only one `StoreDir` instance can exist per directory at a time.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the writer checkpoint file.
    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.path.join(CHECKPOINT_FILE)
    }

    /// Checks if this is a new (empty) store directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be listed.
    pub fn is_new_store(&self) -> CoreResult<bool> {
        if self.checkpoint_path().exists() {
            return Ok(false);
        }
        for entry in fs::read_dir(&self.path)? {
            let name = entry?.file_name();
            if name.to_string_lossy().starts_with(CHUNK_PREFIX) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Lists the authoritative chunk files in chunk-number order.
    ///
    /// Stale versions and temporary files are deleted.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be listed or a leftover
    /// file cannot be removed.
    pub fn chunk_files(&self) -> CoreResult<Vec<ChunkFile>> {
        scan_chunk_files(&self.path)
    }
}

/// Returns the file name for a chunk.
#[must_use]
pub fn chunk_file_name(number: u32, version: u32) -> String {
    format!("{CHUNK_PREFIX}{number:06}.{version:06}")
}

/// Returns the temporary file name used while scavenge builds a chunk.
#[must_use]
pub fn temp_chunk_file_name(number: u32, version: u32) -> String {
    format!("{}{TEMP_SUFFIX}", chunk_file_name(number, version))
}

/// Parses `chunk-NNNNNN.VVVVVV` into (number, version).
#[must_use]
pub fn parse_chunk_file_name(name: &str) -> Option<(u32, u32)> {
    let rest = name.strip_prefix(CHUNK_PREFIX)?;
    let (number, version) = rest.split_once('.')?;
    if number.is_empty() || version.is_empty() {
        return None;
    }
    if !number.bytes().chain(version.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((number.parse().ok()?, version.parse().ok()?))
}

pub(crate) fn scan_chunk_files(dir: &Path) -> CoreResult<Vec<ChunkFile>> {
    let mut found: Vec<ChunkFile> = Vec::new();
    let mut leftovers = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(CHUNK_PREFIX) {
            continue;
        }
        if name.ends_with(TEMP_SUFFIX) {
            leftovers.push(entry.path());
            continue;
        }
        match parse_chunk_file_name(&name) {
            Some((number, version)) => found.push(ChunkFile {
                number,
                version,
                path: entry.path(),
            }),
            None => warn!(file = %name, "ignoring unrecognized chunk file"),
        }
    }

    // highest version first within each number
    found.sort_by(|a, b| a.number.cmp(&b.number).then(b.version.cmp(&a.version)));

    let mut chunks: Vec<ChunkFile> = Vec::with_capacity(found.len());
    for file in found {
        if chunks.last().is_some_and(|kept| kept.number == file.number) {
            leftovers.push(file.path);
        } else {
            chunks.push(file);
        }
    }

    for path in &leftovers {
        warn!(path = %path.display(), "removing leftover chunk file");
        fs::remove_file(path)?;
    }
    if !leftovers.is_empty() {
        sync_directory(dir)?;
    }

    Ok(chunks)
}

/// Syncs a directory so that renames and deletions in it are durable.
#[cfg(unix)]
pub(crate) fn sync_directory(dir: &Path) -> CoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_dir: &Path) -> CoreResult<()> {
    Ok(())
}
