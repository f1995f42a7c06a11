//! A single chunk of the transaction log.

use crate::chunk::format::{
    ChunkFooter, ChunkHeader, FooterTail, PosMapEntry, FOOTER_TAIL_SIZE, HEADER_SIZE,
};
use crate::error::{CoreError, CoreResult};
use crate::log::{read_length, LogRecord, LENGTH_SIZE};
use evstore_storage::StorageBackend;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// One chunk: a header, a contiguous run of records and, once sealed, a
/// footer carrying the position map.
///
/// The position map lives in memory for every chunk. Sealed chunks load it
/// from the footer; the open chunk rebuilds it by scanning on open and
/// extends it on every append.
///
/// A chunk replaced by scavenge is marked for deletion and its file is
/// removed when the last handle to it is dropped.
pub struct Chunk {
    header: ChunkHeader,
    backend: RwLock<Box<dyn StorageBackend>>,
    state: RwLock<ChunkState>,
    path: Option<PathBuf>,
    delete_on_drop: AtomicBool,
}

struct ChunkState {
    posmap: Vec<PosMapEntry>,
    data_size: u64,
    /// Set once the footer is written.
    end_position: Option<u64>,
}

impl Chunk {
    /// Creates a new open chunk on an empty backend and writes its header.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the backend is not empty, or a storage
    /// error if the header cannot be written.
    pub fn create(
        header: ChunkHeader,
        mut backend: Box<dyn StorageBackend>,
        path: Option<PathBuf>,
    ) -> CoreResult<Self> {
        if backend.size()? != 0 {
            return Err(CoreError::invalid_argument(format!(
                "chunk {} backend is not empty",
                header.chunk_number
            )));
        }
        backend.append(&header.encode())?;
        backend.flush()?;
        debug!(
            chunk = header.chunk_number,
            version = header.chunk_version,
            start = header.start_position,
            "created chunk"
        );
        Ok(Self {
            header,
            backend: RwLock::new(backend),
            state: RwLock::new(ChunkState {
                posmap: Vec::new(),
                data_size: 0,
                end_position: None,
            }),
            path,
            delete_on_drop: AtomicBool::new(false),
        })
    }

    /// Opens an existing chunk.
    ///
    /// A chunk with a valid footer opens sealed. Otherwise it is the open
    /// chunk: its records are scanned up to `writer_checkpoint` and any
    /// bytes past the last record under the checkpoint are truncated away.
    ///
    /// # Errors
    ///
    /// Returns `ChunkCorruption` for a damaged header or footer,
    /// `CorruptRecord` for a damaged record under the checkpoint, or a
    /// storage error.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        path: Option<PathBuf>,
        writer_checkpoint: u64,
    ) -> CoreResult<Self> {
        let size = backend.size()?;
        if size < HEADER_SIZE as u64 {
            return Err(CoreError::chunk_corruption(format!(
                "chunk file of {size} bytes has no header"
            )));
        }
        let header = ChunkHeader::decode(&backend.read_at(0, HEADER_SIZE)?)?;

        let state = match read_footer(backend.as_ref(), size)? {
            Some(footer) => ChunkState {
                posmap: footer.posmap,
                data_size: footer.data_size,
                end_position: Some(footer.end_position),
            },
            None => recover_open_chunk(&header, backend.as_mut(), writer_checkpoint)?,
        };

        debug!(
            chunk = header.chunk_number,
            version = header.chunk_version,
            sealed = state.end_position.is_some(),
            records = state.posmap.len(),
            "opened chunk"
        );

        Ok(Self {
            header,
            backend: RwLock::new(backend),
            state: RwLock::new(state),
            path,
            delete_on_drop: AtomicBool::new(false),
        })
    }

    /// Returns the chunk header.
    #[must_use]
    pub fn header(&self) -> ChunkHeader {
        self.header
    }

    /// Returns the chunk number.
    #[must_use]
    pub fn number(&self) -> u32 {
        self.header.chunk_number
    }

    /// Returns the scavenge version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.header.chunk_version
    }

    /// Returns the first global position of the chunk's range.
    #[must_use]
    pub fn start_position(&self) -> u64 {
        self.header.start_position
    }

    /// Returns the global position where the chunk's range ends.
    ///
    /// For the open chunk this is where the next record goes.
    #[must_use]
    pub fn end_position(&self) -> u64 {
        let state = self.state.read();
        state
            .end_position
            .unwrap_or(self.header.start_position + state.data_size)
    }

    /// Checks whether the chunk has been completed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.state.read().end_position.is_some()
    }

    /// Returns the number of records in the chunk.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.read().posmap.len()
    }

    /// Returns the bytes of record data in the chunk.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.state.read().data_size
    }

    /// Returns the size of the underlying store, header and footer included.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the size cannot be determined.
    pub fn file_size(&self) -> CoreResult<u64> {
        Ok(self.backend.read().size()?)
    }

    /// Returns the file backing this chunk, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the global position of the record at `index`.
    #[must_use]
    pub fn position_at(&self, index: usize) -> Option<u64> {
        self.state.read().posmap.get(index).map(|e| e.position)
    }

    /// Returns the index of the first record at or after `position`.
    #[must_use]
    pub fn lower_bound(&self, position: u64) -> usize {
        self.state
            .read()
            .posmap
            .partition_point(|e| e.position < position)
    }

    /// Appends an encoded record at the given global position.
    ///
    /// Used by the writer, which keeps positions contiguous, and by
    /// scavenge, which copies records with their original positions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the chunk is sealed or `position` does
    /// not lie past the previous record, or a storage error.
    pub fn append(&self, position: u64, encoded: &[u8]) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.end_position.is_some() {
            return Err(CoreError::invalid_operation(format!(
                "chunk {} is sealed",
                self.number()
            )));
        }
        if position < self.header.start_position
            || state.posmap.last().is_some_and(|e| e.position >= position)
        {
            return Err(CoreError::invalid_operation(format!(
                "position {position} is out of order in chunk {}",
                self.number()
            )));
        }
        let local_offset = u32::try_from(state.data_size).map_err(|_| {
            CoreError::invalid_operation(format!("chunk {} is full", self.number()))
        })?;

        self.backend.write().append(encoded)?;
        state.posmap.push(PosMapEntry {
            position,
            local_offset,
        });
        state.data_size += encoded.len() as u64;
        Ok(())
    }

    /// Pushes appended data to the OS, and to disk if `sync` is set.
    ///
    /// # Errors
    ///
    /// Returns a storage error on failure.
    pub fn flush(&self, sync: bool) -> CoreResult<()> {
        let mut backend = self.backend.write();
        backend.flush()?;
        if sync {
            backend.sync()?;
        }
        Ok(())
    }

    /// Writes the footer and marks the chunk sealed.
    ///
    /// `end_position` is the end of the chunk's range. The writer passes the
    /// position after its last record; scavenge passes the end of the chunk
    /// it replaces.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the chunk is already sealed or
    /// `end_position` lies before the data, or a storage error.
    pub fn seal(&self, end_position: u64) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.end_position.is_some() {
            return Err(CoreError::invalid_operation(format!(
                "chunk {} is already sealed",
                self.number()
            )));
        }
        if state
            .posmap
            .last()
            .is_some_and(|e| e.position >= end_position)
        {
            return Err(CoreError::invalid_operation(format!(
                "end position {end_position} lies inside chunk {}",
                self.number()
            )));
        }

        let footer = ChunkFooter {
            posmap: state.posmap.clone(),
            data_size: state.data_size,
            end_position,
        };
        let encoded = footer.encode()?;
        {
            let mut backend = self.backend.write();
            backend.append(&encoded)?;
            backend.flush()?;
            backend.sync()?;
        }
        state.end_position = Some(end_position);
        debug!(
            chunk = self.number(),
            version = self.version(),
            records = state.posmap.len(),
            end = end_position,
            "sealed chunk"
        );
        Ok(())
    }

    /// Reads the record starting at `position`.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if no record of this chunk starts there,
    /// `CorruptRecord` if it fails to decode.
    pub fn read_at(&self, position: u64) -> CoreResult<LogRecord> {
        let entry = {
            let state = self.state.read();
            let index = state
                .posmap
                .binary_search_by_key(&position, |e| e.position)
                .map_err(|_| CoreError::RecordNotFound { position })?;
            state.posmap[index]
        };
        self.read_entry(entry)
    }

    /// Reads the record at `index` in physical order.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if the index is out of range, `CorruptRecord`
    /// if the record fails to decode.
    pub fn read_nth(&self, index: usize) -> CoreResult<LogRecord> {
        let entry = self.state.read().posmap.get(index).copied();
        match entry {
            Some(entry) => self.read_entry(entry),
            None => Err(CoreError::RecordNotFound {
                position: self.end_position(),
            }),
        }
    }

    /// Reads every record of the chunk in physical order.
    ///
    /// # Errors
    ///
    /// Returns the first read or decode failure.
    pub fn read_all(&self) -> CoreResult<Vec<LogRecord>> {
        let posmap = self.state.read().posmap.clone();
        posmap.into_iter().map(|e| self.read_entry(e)).collect()
    }

    /// Checks every record and the backward length chain.
    ///
    /// Returns the number of records verified.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRecord` for a record that fails to decode or whose
    /// trailing length does not lead back to the previous record.
    pub fn verify(&self) -> CoreResult<usize> {
        let (posmap, data_size) = {
            let state = self.state.read();
            (state.posmap.clone(), state.data_size)
        };
        for entry in &posmap {
            self.read_entry(*entry)?;
        }

        let backend = self.backend.read();
        let mut local = data_size;
        for entry in posmap.iter().rev() {
            let length = read_length(&backend.read_at(
                HEADER_SIZE as u64 + local - LENGTH_SIZE as u64,
                LENGTH_SIZE,
            )?)?;
            local = local
                .checked_sub(u64::from(length) + 2 * LENGTH_SIZE as u64)
                .ok_or_else(|| {
                    CoreError::corrupt_record(format!(
                        "trailing length {length} runs past the start of chunk {}",
                        self.number()
                    ))
                })?;
            if local != u64::from(entry.local_offset) {
                return Err(CoreError::corrupt_record(format!(
                    "backward scan of chunk {} landed at {local}, expected {}",
                    self.number(),
                    entry.local_offset
                )));
            }
        }
        if local != 0 {
            return Err(CoreError::corrupt_record(format!(
                "chunk {} has {local} unaccounted bytes before its first record",
                self.number()
            )));
        }
        Ok(posmap.len())
    }

    /// Marks the chunk's file for removal once the last handle is dropped.
    pub fn mark_for_deletion(&self) {
        self.delete_on_drop.store(true, Ordering::Release);
    }

    /// Clears a pending deletion.
    pub fn keep_file(&self) {
        self.delete_on_drop.store(false, Ordering::Release);
    }

    fn read_entry(&self, entry: PosMapEntry) -> CoreResult<LogRecord> {
        let offset = HEADER_SIZE as u64 + u64::from(entry.local_offset);
        let backend = self.backend.read();
        let length = read_length(&backend.read_at(offset, LENGTH_SIZE)?)?;
        let total = length as usize + 2 * LENGTH_SIZE;
        let bytes = backend.read_at(offset, total)?;
        drop(backend);

        let record = LogRecord::decode(&bytes)?;
        if record.position() != entry.position {
            return Err(CoreError::corrupt_record(format!(
                "record at offset {offset} of chunk {} claims position {}, expected {}",
                self.number(),
                record.position(),
                entry.position
            )));
        }
        Ok(record)
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        if !self.delete_on_drop.load(Ordering::Acquire) {
            return;
        }
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed replaced chunk"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove chunk"),
            }
        }
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("number", &self.number())
            .field("version", &self.version())
            .field("start", &self.start_position())
            .field("end", &self.end_position())
            .field("sealed", &self.is_sealed())
            .field("records", &self.record_count())
            .finish_non_exhaustive()
    }
}

fn read_footer(backend: &dyn StorageBackend, size: u64) -> CoreResult<Option<ChunkFooter>> {
    let min_sealed = (HEADER_SIZE + FOOTER_TAIL_SIZE) as u64;
    if size < min_sealed {
        return Ok(None);
    }
    let tail_bytes = backend.read_at(size - FOOTER_TAIL_SIZE as u64, FOOTER_TAIL_SIZE)?;
    let Some(tail) = FooterTail::parse(&tail_bytes) else {
        return Ok(None);
    };
    // record bytes can contain the magic; only a consistent size counts
    let expected = (HEADER_SIZE as u64)
        .checked_add(tail.data_size)
        .and_then(|s| s.checked_add(tail.footer_size()));
    if expected != Some(size) {
        return Ok(None);
    }
    let footer_size = tail.footer_size();
    let footer_bytes = backend.read_at(size - footer_size, footer_size as usize)?;
    ChunkFooter::decode(&footer_bytes, &tail).map(Some)
}

fn recover_open_chunk(
    header: &ChunkHeader,
    backend: &mut dyn StorageBackend,
    writer_checkpoint: u64,
) -> CoreResult<ChunkState> {
    let file_data = backend.size()? - HEADER_SIZE as u64;
    let limit = file_data.min(writer_checkpoint.saturating_sub(header.start_position));

    let mut posmap = Vec::new();
    let mut local = 0u64;
    while local + LENGTH_SIZE as u64 <= limit {
        let offset = HEADER_SIZE as u64 + local;
        let length = read_length(&backend.read_at(offset, LENGTH_SIZE)?)?;
        let total = u64::from(length) + 2 * LENGTH_SIZE as u64;
        if local + total > limit {
            break;
        }
        let record = LogRecord::decode(&backend.read_at(offset, total as usize)?)?;
        let position = header.start_position + local;
        if record.position() != position {
            return Err(CoreError::corrupt_record(format!(
                "record at offset {offset} of open chunk {} claims position {}, expected {position}",
                header.chunk_number,
                record.position()
            )));
        }
        let local_offset = u32::try_from(local).map_err(|_| {
            CoreError::chunk_corruption(format!("chunk {} is oversized", header.chunk_number))
        })?;
        posmap.push(PosMapEntry {
            position,
            local_offset,
        });
        local += total;
    }

    if local < file_data {
        warn!(
            chunk = header.chunk_number,
            discarded = file_data - local,
            "truncating open chunk past the writer checkpoint"
        );
        backend.truncate(HEADER_SIZE as u64 + local)?;
        backend.sync()?;
    }

    Ok(ChunkState {
        posmap,
        data_size: local,
        end_position: None,
    })
}
