//! The single append path.

use crate::checkpoint::{CheckpointReader, WriterCheckpoint};
use crate::chunk::manager::ChunkManager;
use crate::error::{CoreError, CoreResult};
use crate::log::LogRecord;
use std::sync::Arc;
use tracing::{debug, warn};

/// Appends records to the open chunk and owns the writer checkpoint.
///
/// There is exactly one `LogWriter` per log. A batch is durable once
/// [`Self::append_batch`] returns: the records are flushed, the checkpoint
/// advanced past them and the checkpoint flushed. Any I/O failure on this
/// path halts the writer; later appends fail with `WriterHalted`.
#[derive(Debug)]
pub struct LogWriter {
    chunks: Arc<ChunkManager>,
    checkpoint: WriterCheckpoint,
    chunk_size: u64,
    sync_on_append: bool,
    halted: Option<String>,
}

impl LogWriter {
    /// Creates a writer over `chunks`, continuing from `checkpoint`.
    #[must_use]
    pub fn new(
        chunks: Arc<ChunkManager>,
        checkpoint: WriterCheckpoint,
        chunk_size: u64,
        sync_on_append: bool,
    ) -> Self {
        Self {
            chunks,
            checkpoint,
            chunk_size,
            sync_on_append,
            halted: None,
        }
    }

    /// Returns the position the next record will get.
    #[must_use]
    pub fn next_position(&self) -> u64 {
        self.checkpoint.pending()
    }

    /// Returns the flushed writer checkpoint.
    #[must_use]
    pub fn checkpoint(&self) -> u64 {
        self.checkpoint.read()
    }

    /// Returns a read-only handle on the checkpoint.
    #[must_use]
    pub fn checkpoint_reader(&self) -> CheckpointReader {
        self.checkpoint.reader()
    }

    /// Checks whether an earlier failure halted the writer.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Appends one record and returns its position.
    ///
    /// # Errors
    ///
    /// Same as [`Self::append_batch`].
    pub fn append(&mut self, mut record: LogRecord) -> CoreResult<u64> {
        self.append_batch(std::slice::from_mut(&mut record))?;
        Ok(record.position())
    }

    /// Appends records as one durable unit.
    ///
    /// Positions are assigned in place, contiguously from
    /// [`Self::next_position`]. A record that does not fit the rest of the
    /// open chunk goes to a fresh one.
    ///
    /// # Errors
    ///
    /// - `WriterHalted` if an earlier append failed
    /// - `OutOfSpace` if a record is larger than a whole chunk; nothing is
    ///   written in that case
    /// - `InvalidArgument` if a record cannot be encoded
    /// - `Storage`/`Io` on write failure, which halts the writer
    pub fn append_batch(&mut self, records: &mut [LogRecord]) -> CoreResult<()> {
        if let Some(reason) = &self.halted {
            return Err(CoreError::WriterHalted {
                reason: reason.clone(),
            });
        }

        let mut position = self.checkpoint.pending();
        let mut encoded = Vec::with_capacity(records.len());
        for record in records.iter_mut() {
            record.set_position(position);
            let bytes = record.encode()?;
            if bytes.len() as u64 > self.chunk_size {
                return Err(CoreError::OutOfSpace {
                    record_size: bytes.len(),
                    chunk_size: self.chunk_size,
                });
            }
            position += bytes.len() as u64;
            encoded.push((record.position(), bytes));
        }
        if encoded.is_empty() {
            return Ok(());
        }

        let result = self.write_encoded(&encoded);
        if let Err(e) = &result {
            self.halt(e);
        }
        result
    }

    /// Seals the open chunk and starts the next one.
    ///
    /// Returns the number of the sealed chunk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the open chunk is empty, `WriterHalted`
    /// if the writer is halted, or a storage error, which halts the writer.
    pub fn complete_chunk(&mut self) -> CoreResult<u32> {
        if let Some(reason) = &self.halted {
            return Err(CoreError::WriterHalted {
                reason: reason.clone(),
            });
        }
        let chunk = self.chunks.open_chunk()?;
        if chunk.record_count() == 0 {
            return Err(CoreError::invalid_operation(format!(
                "open chunk {} is empty",
                chunk.number()
            )));
        }
        let result = self.roll_over();
        if let Err(e) = &result {
            self.halt(e);
        }
        result
    }

    fn write_encoded(&mut self, encoded: &[(u64, Vec<u8>)]) -> CoreResult<()> {
        let mut chunk = self.chunks.open_chunk()?;
        for (position, bytes) in encoded {
            if chunk.data_size() + bytes.len() as u64 > self.chunk_size {
                // everything written so far must be durable before sealing
                self.make_durable(*position)?;
                self.roll_over()?;
                chunk = self.chunks.open_chunk()?;
            }
            chunk.append(*position, bytes)?;
        }
        let end = encoded
            .last()
            .map_or(self.checkpoint.pending(), |(p, b)| p + b.len() as u64);
        self.make_durable(end)
    }

    fn make_durable(&mut self, end: u64) -> CoreResult<()> {
        if end <= self.checkpoint.pending() {
            return Ok(());
        }
        self.chunks.open_chunk()?.flush(self.sync_on_append)?;
        self.checkpoint.advance(end);
        self.checkpoint.flush()
    }

    fn roll_over(&mut self) -> CoreResult<u32> {
        let chunk = self.chunks.open_chunk()?;
        let end = chunk.end_position();
        chunk.seal(end)?;
        self.chunks.add_chunk(chunk.number() + 1, end)?;
        debug!(chunk = chunk.number(), end, "completed chunk");
        Ok(chunk.number())
    }

    fn halt(&mut self, error: &CoreError) {
        warn!(error = %error, "halting writer after append failure");
        self.halted = Some(error.to_string());
    }
}
