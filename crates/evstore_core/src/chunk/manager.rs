//! The chunk arena.

use crate::chunk::file::Chunk;
use crate::chunk::format::ChunkHeader;
use crate::chunk::scan::LogScan;
use crate::dir::{self, chunk_file_name, temp_chunk_file_name};
use crate::error::{CoreError, CoreResult};
use crate::log::LogRecord;
use evstore_storage::{FileBackend, InMemoryBackend};
use parking_lot::RwLock;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Where chunk bytes live.
#[derive(Debug, Clone)]
pub enum ChunkStore {
    /// Chunks exist only in memory.
    Memory,
    /// One file per chunk in this directory.
    Directory(PathBuf),
}

impl ChunkStore {
    /// Creates the storage for a new chunk.
    ///
    /// With `temp` set the chunk is built under a temporary name and must be
    /// passed to [`Self::promote`] once sealed.
    fn create(&self, header: ChunkHeader, temp: bool) -> CoreResult<Chunk> {
        match self {
            Self::Memory => Chunk::create(header, Box::new(InMemoryBackend::new()), None),
            Self::Directory(dir) => {
                let name = if temp {
                    temp_chunk_file_name(header.chunk_number, header.chunk_version)
                } else {
                    chunk_file_name(header.chunk_number, header.chunk_version)
                };
                let path = dir.join(name);
                let backend = FileBackend::create_new(&path)?;
                let chunk = Chunk::create(header, Box::new(backend), Some(path))?;
                if temp {
                    chunk.mark_for_deletion();
                } else {
                    dir::sync_directory(dir)?;
                }
                Ok(chunk)
            }
        }
    }

    /// Moves a sealed temporary chunk to its final name and reopens it.
    fn promote(&self, chunk: Chunk) -> CoreResult<Chunk> {
        match self {
            Self::Memory => {
                chunk.keep_file();
                Ok(chunk)
            }
            Self::Directory(dir) => {
                let header = chunk.header();
                let temp_path = chunk
                    .path()
                    .map(PathBuf::from)
                    .ok_or_else(|| CoreError::invalid_operation("temporary chunk has no file"))?;
                chunk.keep_file();
                drop(chunk);

                let final_path = dir.join(chunk_file_name(header.chunk_number, header.chunk_version));
                fs::rename(&temp_path, &final_path)?;
                dir::sync_directory(dir)?;

                let backend = FileBackend::open(&final_path)?;
                let promoted = Chunk::open(Box::new(backend), Some(final_path), 0)?;
                if !promoted.is_sealed() {
                    return Err(CoreError::chunk_corruption(format!(
                        "promoted chunk {} has no footer",
                        header.chunk_number
                    )));
                }
                Ok(promoted)
            }
        }
    }
}

/// Summary of one chunk, for tooling and stats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Chunk number.
    pub number: u32,
    /// Scavenge version.
    pub version: u32,
    /// First position of the chunk's range.
    pub start_position: u64,
    /// End of the chunk's range.
    pub end_position: u64,
    /// Whether the chunk is sealed.
    pub sealed: bool,
    /// Number of records.
    pub record_count: usize,
    /// Bytes of record data.
    pub data_size: u64,
    /// Size of the backing store.
    pub file_size: u64,
}

/// Holds every chunk of the log, sealed chunks first and the open chunk
/// last.
///
/// Readers take a snapshot of the `Arc` handles and never block writers.
/// Scavenge replaces one handle at a time; a replaced chunk lives on until
/// the last snapshot holding it is dropped.
pub struct ChunkManager {
    chunks: RwLock<Vec<Arc<Chunk>>>,
    store: ChunkStore,
    format_version: u16,
}

impl ChunkManager {
    /// Opens the chunks of `store`, or creates chunk 0 for a fresh log.
    ///
    /// The open chunk is truncated to `writer_checkpoint`. If the last chunk
    /// on disk is sealed, a new open chunk is created after it.
    ///
    /// # Errors
    ///
    /// Returns `ChunkCorruption` if chunks are missing, out of order, or
    /// do not cover the writer checkpoint.
    pub fn open(store: ChunkStore, writer_checkpoint: u64, format_version: u16) -> CoreResult<Self> {
        let mut chunks: Vec<Arc<Chunk>> = Vec::new();

        if let ChunkStore::Directory(path) = &store {
            let files = dir::scan_chunk_files(path)?;
            let count = files.len();
            for (i, file) in files.into_iter().enumerate() {
                if file.number as usize != i {
                    return Err(CoreError::chunk_corruption(format!(
                        "chunk {i} is missing, found chunk {} instead",
                        file.number
                    )));
                }
                let backend = FileBackend::open(&file.path)?;
                let chunk = Chunk::open(Box::new(backend), Some(file.path), writer_checkpoint)?;
                if chunk.number() != file.number || chunk.version() != file.version {
                    return Err(CoreError::chunk_corruption(format!(
                        "chunk file {} holds chunk {}.{}",
                        chunk_file_name(file.number, file.version),
                        chunk.number(),
                        chunk.version()
                    )));
                }
                if !chunk.is_sealed() && i + 1 != count {
                    return Err(CoreError::chunk_corruption(format!(
                        "chunk {i} is not sealed but is not the last chunk"
                    )));
                }
                if let Some(previous) = chunks.last() {
                    if previous.end_position() != chunk.start_position() {
                        return Err(CoreError::chunk_corruption(format!(
                            "chunk {i} starts at {}, previous chunk ends at {}",
                            chunk.start_position(),
                            previous.end_position()
                        )));
                    }
                }
                chunks.push(Arc::new(chunk));
            }
        }

        let end = chunks.last().map_or(0, |c| c.end_position());
        if writer_checkpoint > end {
            return Err(CoreError::chunk_corruption(format!(
                "writer checkpoint {writer_checkpoint} is past the end of the log at {end}"
            )));
        }

        let manager = Self {
            chunks: RwLock::new(chunks),
            store,
            format_version,
        };
        let needs_open_chunk = manager.chunks.read().last().map_or(true, |c| c.is_sealed());
        if needs_open_chunk {
            let number = u32::try_from(manager.chunks.read().len())
                .map_err(|_| CoreError::invalid_operation("chunk number overflow"))?;
            manager.add_chunk(number, end)?;
        }

        info!(chunks = manager.chunk_count(), checkpoint = writer_checkpoint, "opened chunked log");
        Ok(manager)
    }

    /// Returns the chunk store.
    #[must_use]
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Returns a snapshot of every chunk handle.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Chunk>> {
        self.chunks.read().clone()
    }

    /// Returns the number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }

    /// Returns the open chunk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the arena is empty, which only happens
    /// if opening failed half way.
    pub fn open_chunk(&self) -> CoreResult<Arc<Chunk>> {
        self.chunks
            .read()
            .last()
            .cloned()
            .ok_or_else(|| CoreError::invalid_operation("log has no chunks"))
    }

    /// Returns the start of the chunk before the one holding `position`.
    #[must_use]
    pub fn preceding_chunk_start(&self, position: u64) -> Option<u64> {
        let chunks = self.chunks.read();
        let holding = chunks.partition_point(|c| c.start_position() <= position);
        holding
            .checked_sub(2)
            .and_then(|i| chunks.get(i))
            .map(|c| c.start_position())
    }

    /// Returns the sealed chunks in order.
    #[must_use]
    pub fn sealed_chunks(&self) -> Vec<Arc<Chunk>> {
        self.chunks
            .read()
            .iter()
            .filter(|c| c.is_sealed())
            .cloned()
            .collect()
    }

    /// Creates a new open chunk and appends it to the arena.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the current last chunk is still open, or
    /// a storage error.
    pub fn add_chunk(&self, number: u32, start_position: u64) -> CoreResult<Arc<Chunk>> {
        let header = ChunkHeader {
            format_version: self.format_version,
            chunk_number: number,
            chunk_version: 0,
            start_position,
        };
        let mut chunks = self.chunks.write();
        if chunks.last().is_some_and(|c| !c.is_sealed()) {
            return Err(CoreError::invalid_operation(
                "cannot add a chunk while the last one is open",
            ));
        }
        let chunk = Arc::new(self.store.create(header, false)?);
        chunks.push(Arc::clone(&chunk));
        Ok(chunk)
    }

    /// Starts building a replacement for `chunk` with the next version.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the temporary chunk cannot be created.
    pub fn create_replacement(&self, chunk: &Chunk) -> CoreResult<Chunk> {
        let header = ChunkHeader {
            format_version: self.format_version,
            chunk_number: chunk.number(),
            chunk_version: chunk.version() + 1,
            start_position: chunk.start_position(),
        };
        self.store.create(header, true)
    }

    /// Swaps a sealed replacement in for `old`.
    ///
    /// Returns `false` and leaves the arena untouched if `old` is no longer
    /// the chunk at its slot. The replacement is then discarded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the replacement is not sealed or its
    /// range differs from `old`, or an I/O error from promoting it.
    pub fn replace(&self, old: &Arc<Chunk>, replacement: Chunk) -> CoreResult<bool> {
        if !replacement.is_sealed()
            || replacement.number() != old.number()
            || replacement.start_position() != old.start_position()
            || replacement.end_position() != old.end_position()
        {
            return Err(CoreError::invalid_operation(format!(
                "replacement does not match chunk {}",
                old.number()
            )));
        }

        let index = old.number() as usize;
        if !self
            .chunks
            .read()
            .get(index)
            .is_some_and(|current| Arc::ptr_eq(current, old))
        {
            return Ok(false);
        }

        let promoted = Arc::new(self.store.promote(replacement)?);
        let mut chunks = self.chunks.write();
        match chunks.get_mut(index) {
            Some(slot) if Arc::ptr_eq(slot, old) => {
                old.mark_for_deletion();
                *slot = promoted;
                debug!(chunk = old.number(), version = old.version() + 1, "swapped chunk");
                Ok(true)
            }
            _ => {
                promoted.mark_for_deletion();
                Ok(false)
            }
        }
    }

    /// Reads the record starting at `position`, which must lie before
    /// `limit`.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if the position is at or past `limit` or no
    /// record starts there, `CorruptRecord` if the record fails to decode.
    pub fn read_at(&self, position: u64, limit: u64) -> CoreResult<LogRecord> {
        if position >= limit {
            return Err(CoreError::RecordNotFound { position });
        }
        let chunk = {
            let chunks = self.chunks.read();
            let index = chunks.partition_point(|c| c.start_position() <= position);
            match index.checked_sub(1).and_then(|i| chunks.get(i)) {
                Some(chunk) => Arc::clone(chunk),
                None => return Err(CoreError::RecordNotFound { position }),
            }
        };
        chunk.read_at(position)
    }

    /// Scans records at or after `from`, up to `limit` (exclusive).
    #[must_use]
    pub fn scan_forward(&self, from: u64, limit: u64) -> LogScan {
        LogScan::forward(self.snapshot(), from, limit)
    }

    /// Scans records before `before` in reverse, never past `limit`.
    #[must_use]
    pub fn scan_backward(&self, before: u64, limit: u64) -> LogScan {
        LogScan::backward(self.snapshot(), before.min(limit))
    }

    /// Describes every chunk.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a chunk's size cannot be determined.
    pub fn chunk_infos(&self) -> CoreResult<Vec<ChunkInfo>> {
        self.snapshot()
            .iter()
            .map(|c| {
                Ok(ChunkInfo {
                    number: c.number(),
                    version: c.version(),
                    start_position: c.start_position(),
                    end_position: c.end_position(),
                    sealed: c.is_sealed(),
                    record_count: c.record_count(),
                    data_size: c.data_size(),
                    file_size: c.file_size()?,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for ChunkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkManager")
            .field("store", &self.store)
            .field("chunks", &self.chunk_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::CommitRecord;

    fn commit(position: u64) -> LogRecord {
        LogRecord::Commit(CommitRecord {
            position,
            transaction_position: position,
            first_event_number: 0,
            timestamp: 0,
        })
    }

    fn append(manager: &ChunkManager, count: usize) -> Vec<u64> {
        let chunk = manager.open_chunk().unwrap();
        let mut positions = Vec::new();
        for _ in 0..count {
            let position = chunk.end_position();
            chunk
                .append(position, &commit(position).encode().unwrap())
                .unwrap();
            positions.push(position);
        }
        positions
    }

    fn seal_and_roll(manager: &ChunkManager) {
        let chunk = manager.open_chunk().unwrap();
        let end = chunk.end_position();
        chunk.seal(end).unwrap();
        manager.add_chunk(chunk.number() + 1, end).unwrap();
    }

    #[test]
    fn fresh_log_has_one_open_chunk() {
        let manager = ChunkManager::open(ChunkStore::Memory, 0, 1).unwrap();
        assert_eq!(manager.chunk_count(), 1);
        let chunk = manager.open_chunk().unwrap();
        assert!(!chunk.is_sealed());
        assert_eq!(chunk.start_position(), 0);
    }

    #[test]
    fn read_at_respects_limit() {
        let manager = ChunkManager::open(ChunkStore::Memory, 0, 1).unwrap();
        let positions = append(&manager, 2);

        assert!(manager.read_at(positions[1], u64::MAX).is_ok());
        assert!(matches!(
            manager.read_at(positions[1], positions[1]),
            Err(CoreError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn reads_across_chunks() {
        let manager = ChunkManager::open(ChunkStore::Memory, 0, 1).unwrap();
        let first = append(&manager, 2);
        seal_and_roll(&manager);
        let second = append(&manager, 2);

        assert_eq!(manager.chunk_count(), 2);
        assert_eq!(manager.sealed_chunks().len(), 1);
        for position in first.iter().chain(&second) {
            assert_eq!(manager.read_at(*position, u64::MAX).unwrap(), commit(*position));
        }
    }

    #[test]
    fn replace_requires_current_chunk() {
        let manager = ChunkManager::open(ChunkStore::Memory, 0, 1).unwrap();
        let positions = append(&manager, 3);
        seal_and_roll(&manager);
        let old = manager.snapshot()[0].clone();

        let replacement = manager.create_replacement(&old).unwrap();
        replacement
            .append(positions[2], &commit(positions[2]).encode().unwrap())
            .unwrap();
        replacement.seal(old.end_position()).unwrap();
        assert!(manager.replace(&old, replacement).unwrap());

        let current = manager.snapshot()[0].clone();
        assert_eq!(current.version(), 1);
        assert_eq!(current.record_count(), 1);
        assert!(matches!(
            manager.read_at(positions[0], u64::MAX),
            Err(CoreError::RecordNotFound { .. })
        ));
        // the old handle still serves readers holding it
        assert!(old.read_at(positions[0]).is_ok());

        let stale = manager.create_replacement(&old).unwrap();
        stale.seal(old.end_position()).unwrap();
        assert!(!manager.replace(&old, stale).unwrap());
    }

    #[test]
    fn directory_store_reopens() {
        let temp = tempfile::tempdir().unwrap();
        let store = ChunkStore::Directory(temp.path().to_path_buf());
        let (positions, checkpoint) = {
            let manager = ChunkManager::open(store.clone(), 0, 1).unwrap();
            let mut positions = append(&manager, 2);
            seal_and_roll(&manager);
            positions.extend(append(&manager, 1));
            let checkpoint = manager.open_chunk().unwrap().end_position();
            manager.open_chunk().unwrap().flush(true).unwrap();
            (positions, checkpoint)
        };

        let manager = ChunkManager::open(store, checkpoint, 1).unwrap();
        assert_eq!(manager.chunk_count(), 2);
        for position in positions {
            assert!(manager.read_at(position, checkpoint).is_ok());
        }
    }

    #[test]
    fn checkpoint_past_log_end_is_corruption() {
        let temp = tempfile::tempdir().unwrap();
        let store = ChunkStore::Directory(temp.path().to_path_buf());
        drop(ChunkManager::open(store.clone(), 0, 1).unwrap());

        let result = ChunkManager::open(store, 1_000, 1);
        assert!(result.unwrap_err().is_corruption());
    }
}
