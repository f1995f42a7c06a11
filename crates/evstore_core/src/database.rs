//! Database facade and recovery.

use crate::checkpoint::{CheckpointReader, WriterCheckpoint};
use crate::chunk::{ChunkInfo, ChunkManager, ChunkStore, LogScan, LogWriter};
use crate::config::Config;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::index::{
    AllSlice, EventRecord, LinkResolver, ReadEventResult, ReadIndex, ResolvedEvent, StreamInfo,
    StreamSlice,
};
use crate::log::{CommitRecord, LinkTarget, LogRecord, PrepareFlags, PrepareRecord};
use crate::scavenge::{
    CancelToken, DiscardUnresolvedLinks, ProgressSnapshot, RetentionPolicy, ScavengeHandle,
    ScavengeProgress, ScavengeResult, Scavenger,
};
use crate::stats::{StatsSnapshot, StoreStats};
use crate::types::{now_millis, ExpectedVersion, TFPos, LINK_EVENT_TYPE, NO_EVENT_NUMBER};
use parking_lot::{Condvar, Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};
use uuid::Uuid;

/// An event to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Unique id of the event.
    pub event_id: Uuid,
    /// Application-defined type.
    pub event_type: String,
    /// Payload.
    pub data: Vec<u8>,
    /// Application metadata.
    pub metadata: Vec<u8>,
    /// Whether `data` is JSON.
    pub is_json: bool,
    /// Whether `data` is a link payload.
    pub is_link: bool,
}

impl NewEvent {
    /// Creates a binary event with a fresh id.
    pub fn new(event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            metadata: Vec::new(),
            is_json: false,
            is_link: false,
        }
    }

    /// Creates a JSON event with a fresh id.
    pub fn json(event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            is_json: true,
            ..Self::new(event_type, data)
        }
    }

    /// Creates a link to event `event_number` of `stream_id`.
    ///
    /// The target does not have to exist.
    pub fn link_to(stream_id: impl Into<String>, event_number: i64) -> Self {
        let target = LinkTarget::new(event_number, stream_id);
        Self {
            is_link: true,
            ..Self::new(LINK_EVENT_TYPE, target.to_bytes())
        }
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the event id.
    #[must_use]
    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }

    fn flags(&self) -> PrepareFlags {
        let mut flags = PrepareFlags::DATA;
        if self.is_json {
            flags = flags.with(PrepareFlags::IS_JSON);
        }
        if self.is_link {
            flags = flags.with(PrepareFlags::IS_LINK_TO);
        }
        flags
    }
}

/// Where an append landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    /// Number of the first appended event.
    pub first_event_number: i64,
    /// Number of the last appended event.
    pub last_event_number: i64,
    /// Position of the first prepare.
    pub transaction_position: u64,
    /// Position of the commit.
    pub commit_position: u64,
}

impl AppendResult {
    /// Returns the all-log position of the first appended event.
    #[must_use]
    pub fn position(&self) -> TFPos {
        TFPos::new(self.commit_position, self.transaction_position)
    }
}

/// The scavenge currently running, if any.
#[derive(Default)]
struct ScavengeSlot {
    current: Mutex<Option<(CancelToken, Arc<ScavengeProgress>)>>,
    /// Signalled when `current` is cleared.
    ended: Condvar,
}

type RunningScavenge = Arc<ScavengeSlot>;

/// Holds the single scavenge slot until dropped.
struct ScavengeGuard {
    running: RunningScavenge,
}

impl ScavengeGuard {
    fn acquire(running: &RunningScavenge, scavenger: &Scavenger) -> CoreResult<Self> {
        let mut slot = running.current.lock();
        if slot.is_some() {
            return Err(CoreError::invalid_operation("a scavenge is already running"));
        }
        *slot = Some((scavenger.cancel_token(), scavenger.progress()));
        Ok(Self {
            running: Arc::clone(running),
        })
    }
}

impl Drop for ScavengeGuard {
    fn drop(&mut self) {
        *self.running.current.lock() = None;
        self.running.ended.notify_all();
    }
}

/// The main store handle.
///
/// `Database` ties the chunked log, the writer checkpoint and the read
/// index together. It provides:
/// - Appends with optimistic concurrency
/// - Event, stream and all-log reads
/// - Link resolution
/// - Scavenge, in the foreground or on a background thread
///
/// # Opening a Store
///
/// ```rust,ignore
/// use evstore_core::{Database, ExpectedVersion, NewEvent};
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_store"))?;
///
/// db.append(
///     "orders-1",
///     ExpectedVersion::NoStream,
///     vec![NewEvent::json("Placed", br#"{"total":12}"#.to_vec())],
/// )?;
///
/// let slice = db.read_stream_forward("orders-1", 0, 100)?;
/// assert_eq!(slice.events.len(), 1);
///
/// db.close()?;
/// ```
///
/// # In-Memory Stores
///
/// ```rust,ignore
/// let db = Database::open_in_memory()?;
/// ```
pub struct Database {
    /// Configuration.
    config: Config,
    /// Store directory (holds the lock). None for in-memory stores.
    dir: Option<StoreDir>,
    /// Chunk arena.
    chunks: Arc<ChunkManager>,
    /// The single append path.
    writer: Arc<Mutex<LogWriter>>,
    /// Flushed writer position.
    checkpoint: CheckpointReader,
    /// Stream projections.
    index: Arc<ReadIndex>,
    /// Counters.
    stats: Arc<StoreStats>,
    /// Policy used by [`Self::scavenge`] and [`Self::start_scavenge`].
    policy: RwLock<Arc<dyn RetentionPolicy>>,
    /// Scavenge in flight.
    running: RunningScavenge,
    /// Whether the store is open.
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a store from a directory path.
    ///
    /// The method:
    /// - Creates the directory if it doesn't exist (unless `create_if_missing` is false)
    /// - Acquires an exclusive lock to prevent concurrent access
    /// - Loads the writer checkpoint and the chunks, discarding torn writes
    ///   past the checkpoint
    /// - Rebuilds the read index
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the store locked (`DatabaseLocked`)
    /// - Chunk files are damaged or missing (`ChunkCorruption`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a store from a directory path with custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use evstore_core::{Config, Database};
    /// use std::path::Path;
    ///
    /// let config = Config::default()
    ///     .chunk_size(64 * 1024 * 1024)
    ///     .sync_on_append(false);
    ///
    /// let db = Database::open_with_config(Path::new("my_store"), config)?;
    /// ```
    ///
    /// # Errors
    ///
    /// As [`Self::open`], plus `InvalidArgument` for a bad configuration and
    /// `InvalidFormat` when `create_if_missing`/`error_if_exists` forbid
    /// opening.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        config.validate()?;
        let dir = StoreDir::open(path, config.create_if_missing)?;

        let is_new = dir.is_new_store()?;
        if !config.create_if_missing && is_new {
            return Err(CoreError::invalid_format(
                "store does not exist and create_if_missing is false",
            ));
        }
        if config.error_if_exists && !is_new {
            return Err(CoreError::invalid_format(
                "store already exists and error_if_exists is true",
            ));
        }

        let checkpoint = WriterCheckpoint::open(&dir.checkpoint_path())?;
        let chunks = ChunkManager::open(
            ChunkStore::Directory(dir.path().to_path_buf()),
            checkpoint.read(),
            config.format_version,
        )?;
        Self::assemble(config, Some(dir), chunks, checkpoint)
    }

    /// Opens a fresh in-memory store for testing.
    ///
    /// Data is lost when the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` only if the default configuration is
    /// rejected.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens a fresh in-memory store with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad configuration.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        config.validate()?;
        let checkpoint = WriterCheckpoint::in_memory();
        let chunks = ChunkManager::open(ChunkStore::Memory, 0, config.format_version)?;
        Self::assemble(config, None, chunks, checkpoint)
    }

    fn assemble(
        config: Config,
        dir: Option<StoreDir>,
        chunks: ChunkManager,
        checkpoint: WriterCheckpoint,
    ) -> CoreResult<Self> {
        let chunks = Arc::new(chunks);
        let reader = checkpoint.reader();
        let index = Arc::new(ReadIndex::new(Arc::clone(&chunks), checkpoint.reader()));
        let replayed = index.rebuild()?;
        let writer = LogWriter::new(
            Arc::clone(&chunks),
            checkpoint,
            config.chunk_size,
            config.sync_on_append,
        );

        info!(
            path = ?dir.as_ref().map(StoreDir::path),
            chunks = chunks.chunk_count(),
            records = replayed,
            streams = index.stream_count(),
            checkpoint = writer.checkpoint(),
            "opened store"
        );

        Ok(Self {
            config,
            dir,
            chunks,
            writer: Arc::new(Mutex::new(writer)),
            checkpoint: reader,
            index,
            stats: Arc::new(StoreStats::new()),
            policy: RwLock::new(Arc::new(DiscardUnresolvedLinks)),
            running: Arc::new(ScavengeSlot::default()),
            is_open: RwLock::new(true),
        })
    }

    // ========================================================================
    // Append
    // ========================================================================

    /// Appends events to a stream as one transaction.
    ///
    /// The events get consecutive numbers after the stream's last event and
    /// become visible together once their commit is durable.
    ///
    /// # Errors
    ///
    /// - `WrongExpectedVersion` if `expected_version` does not match; nothing
    ///   is written
    /// - `InvalidArgument` for an empty stream id or an empty batch
    /// - `OutOfSpace`, `WriterHalted` or a storage error from the writer
    pub fn append(
        &self,
        stream_id: &str,
        expected_version: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> CoreResult<AppendResult> {
        self.ensure_open()?;
        if stream_id.is_empty() {
            return Err(CoreError::invalid_argument("stream id must not be empty"));
        }
        if events.is_empty() {
            return Err(CoreError::invalid_argument("no events to append"));
        }

        // the writer lock serializes the version check with the write
        let mut writer = self.writer.lock();
        let current = self.index.last_event_number(stream_id);
        if !expected_version.matches(current) {
            self.stats.record_version_conflict();
            return Err(CoreError::WrongExpectedVersion {
                stream: stream_id.to_string(),
                expected: expected_version.to_string(),
                actual: current,
            });
        }

        let transaction_position = writer.next_position();
        let first_event_number = current + 1;
        let count = events.len();
        let timestamp = now_millis();
        let mut records = Vec::with_capacity(count + 1);
        for (offset, event) in events.into_iter().enumerate() {
            let mut flags = event.flags();
            if offset == 0 {
                flags = flags.with(PrepareFlags::TRANSACTION_BEGIN);
            }
            if offset == count - 1 {
                flags = flags.with(PrepareFlags::TRANSACTION_END);
            }
            let transaction_offset = u32::try_from(offset)
                .map_err(|_| CoreError::invalid_argument("too many events in one append"))?;
            records.push(LogRecord::Prepare(PrepareRecord {
                position: 0,
                transaction_position,
                transaction_offset,
                flags,
                stream_id: stream_id.to_string(),
                event_number: NO_EVENT_NUMBER,
                event_id: event.event_id,
                event_type: event.event_type,
                data: event.data,
                metadata: event.metadata,
                timestamp,
            }));
        }
        records.push(LogRecord::Commit(CommitRecord {
            position: 0,
            transaction_position,
            first_event_number,
            timestamp,
        }));

        if let Err(e) = writer.append_batch(&mut records) {
            self.stats.record_error();
            return Err(e);
        }
        for record in &records {
            self.index.observe(record);
        }
        let commit_position = records.last().map_or(transaction_position, LogRecord::position);
        self.stats
            .record_append(count as u64, writer.next_position() - transaction_position);
        drop(writer);

        debug!(
            stream = stream_id,
            first = first_event_number,
            count,
            commit = commit_position,
            "appended events"
        );
        Ok(AppendResult {
            first_event_number,
            last_event_number: first_event_number + count as i64 - 1,
            transaction_position,
            commit_position,
        })
    }

    /// Appends one raw record and returns its position.
    ///
    /// The low-level path for tooling and tests: the caller is responsible
    /// for transaction positions and event numbers. The record is indexed
    /// like any other once durable.
    ///
    /// # Errors
    ///
    /// Returns the writer's error.
    pub fn append_record(&self, mut record: LogRecord) -> CoreResult<u64> {
        self.ensure_open()?;
        let mut writer = self.writer.lock();
        let before = writer.next_position();
        if let Err(e) = writer.append_batch(std::slice::from_mut(&mut record)) {
            self.stats.record_error();
            return Err(e);
        }
        self.index.observe(&record);
        let events = u64::from(matches!(record, LogRecord::Prepare(_)));
        self.stats
            .record_append(events, writer.next_position() - before);
        Ok(record.position())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Reads event `event_number` of a stream; `-1` reads the last event.
    ///
    /// # Errors
    ///
    /// Returns a read or decode failure. A missing event is not an error.
    pub fn read_event(&self, stream_id: &str, event_number: i64) -> CoreResult<ReadEventResult> {
        self.ensure_open()?;
        self.stats.record_read();
        self.index.read_event(stream_id, event_number)
    }

    /// Reads up to `max_count` events of a stream from `from` upwards.
    ///
    /// # Errors
    ///
    /// Returns a read or decode failure.
    pub fn read_stream_forward(
        &self,
        stream_id: &str,
        from: i64,
        max_count: usize,
    ) -> CoreResult<StreamSlice> {
        self.ensure_open()?;
        self.stats.record_read();
        self.index.read_stream_forward(stream_id, from, max_count)
    }

    /// Reads up to `max_count` events of a stream from `from` downwards;
    /// `-1` starts at the last event.
    ///
    /// # Errors
    ///
    /// Returns a read or decode failure.
    pub fn read_stream_backward(
        &self,
        stream_id: &str,
        from: i64,
        max_count: usize,
    ) -> CoreResult<StreamSlice> {
        self.ensure_open()?;
        self.stats.record_read();
        self.index.read_stream_backward(stream_id, from, max_count)
    }

    /// Reads committed events of all streams from `from` in commit order.
    ///
    /// # Errors
    ///
    /// Returns a read or decode failure.
    pub fn read_all_forward(&self, from: TFPos, max_count: usize) -> CoreResult<AllSlice> {
        self.ensure_open()?;
        self.stats.record_read();
        self.index.read_all_forward(from, max_count)
    }

    /// Reads committed events of all streams before `from`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a read or decode failure.
    pub fn read_all_backward(&self, from: TFPos, max_count: usize) -> CoreResult<AllSlice> {
        self.ensure_open()?;
        self.stats.record_read();
        self.index.read_all_backward(from, max_count)
    }

    /// Follows a link event to its target.
    ///
    /// # Errors
    ///
    /// Returns `MalformedLink` or `LinkUnresolved` for links that cannot be
    /// followed, or a read failure.
    pub fn resolve_link(&self, event: EventRecord) -> CoreResult<ResolvedEvent> {
        self.ensure_open()?;
        LinkResolver::new(&self.index).resolve(event)
    }

    /// Returns what the index knows about a stream.
    #[must_use]
    pub fn stream_info(&self, stream_id: &str) -> Option<StreamInfo> {
        self.index.stream_info(stream_id)
    }

    /// Returns every indexed stream, sorted by id.
    #[must_use]
    pub fn streams(&self) -> Vec<StreamInfo> {
        self.index.streams()
    }

    /// Scans raw records from `from` up to the writer checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` on a closed store.
    pub fn scan_log(&self, from: u64) -> CoreResult<LogScan> {
        self.ensure_open()?;
        Ok(self.chunks.scan_forward(from, self.writer_checkpoint()))
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Returns the flushed writer checkpoint.
    #[must_use]
    pub fn writer_checkpoint(&self) -> u64 {
        self.checkpoint.read()
    }

    /// Seals the open chunk and starts a new one.
    ///
    /// Returns the number of the sealed chunk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the open chunk is empty, or a writer
    /// error.
    pub fn complete_chunk(&self) -> CoreResult<u32> {
        self.ensure_open()?;
        self.writer.lock().complete_chunk()
    }

    /// Describes every chunk of the log.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a file size cannot be read.
    pub fn chunk_infos(&self) -> CoreResult<Vec<ChunkInfo>> {
        self.chunks.chunk_infos()
    }

    /// Decodes and checks every record of every chunk.
    ///
    /// Returns the number of records verified.
    ///
    /// # Errors
    ///
    /// Returns the first corruption found.
    pub fn verify(&self) -> CoreResult<usize> {
        self.ensure_open()?;
        let mut records = 0;
        for chunk in self.chunks.snapshot() {
            records += chunk.verify()?;
        }
        Ok(records)
    }

    /// Returns a snapshot of the store counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Replaces the policy used by [`Self::scavenge`] and
    /// [`Self::start_scavenge`]. The default is [`DiscardUnresolvedLinks`].
    pub fn set_retention_policy(&self, policy: impl RetentionPolicy + 'static) {
        *self.policy.write() = Arc::new(policy);
    }

    /// Runs a scavenge pass with the configured policy and waits for it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a scavenge is already running, or the
    /// pass's error.
    pub fn scavenge(&self) -> CoreResult<ScavengeResult> {
        let policy = self.policy.read().clone();
        self.run_scavenge(self.scavenger(policy))
    }

    /// Runs a scavenge pass with `policy`, cancellable through `cancel`.
    ///
    /// # Errors
    ///
    /// As [`Self::scavenge`]; `ScavengeAborted` once `cancel` fires.
    pub fn scavenge_with(
        &self,
        policy: impl RetentionPolicy + 'static,
        cancel: CancelToken,
    ) -> CoreResult<ScavengeResult> {
        let scavenger = self.scavenger(Arc::new(policy)).with_cancel_token(cancel);
        self.run_scavenge(scavenger)
    }

    /// Starts a scavenge pass with the configured policy on a background
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a scavenge is already running, or an
    /// I/O error if the thread cannot be spawned.
    pub fn start_scavenge(&self) -> CoreResult<ScavengeHandle> {
        let policy = self.policy.read().clone();
        self.spawn_scavenge(self.scavenger(policy))
    }

    /// Starts a scavenge pass with `policy` on a background thread.
    ///
    /// # Errors
    ///
    /// As [`Self::start_scavenge`].
    pub fn start_scavenge_with(
        &self,
        policy: impl RetentionPolicy + 'static,
    ) -> CoreResult<ScavengeHandle> {
        self.spawn_scavenge(self.scavenger(Arc::new(policy)))
    }

    /// Returns the progress of the running scavenge, if any.
    #[must_use]
    pub fn scavenge_progress(&self) -> Option<ProgressSnapshot> {
        self.running
            .current
            .lock()
            .as_ref()
            .map(|(_, progress)| progress.snapshot())
    }

    fn scavenger(&self, policy: Arc<dyn RetentionPolicy>) -> Scavenger {
        Scavenger::new(
            Arc::clone(&self.chunks),
            Arc::clone(&self.index),
            Arc::clone(&self.writer),
            policy,
        )
    }

    fn run_scavenge(&self, scavenger: Scavenger) -> CoreResult<ScavengeResult> {
        self.ensure_open()?;
        let _guard = ScavengeGuard::acquire(&self.running, &scavenger)?;
        let result = scavenger.run();
        record_scavenge(&self.stats, &result);
        result
    }

    fn spawn_scavenge(&self, scavenger: Scavenger) -> CoreResult<ScavengeHandle> {
        self.ensure_open()?;
        let guard = ScavengeGuard::acquire(&self.running, &scavenger)?;
        let cancel = scavenger.cancel_token();
        let progress = scavenger.progress();
        let stats = Arc::clone(&self.stats);
        let thread = thread::Builder::new()
            .name("evstore-scavenge".into())
            .spawn(move || {
                let _guard = guard;
                let result = scavenger.run();
                record_scavenge(&stats, &result);
                result
            })?;
        Ok(ScavengeHandle::new(thread, cancel, progress))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Closes the store.
    ///
    /// A running scavenge is asked to stop and waited for, so nothing
    /// touches the log once this returns. The open chunk is synced.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the open chunk cannot be synced.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }

        {
            let mut slot = self.running.current.lock();
            if let Some((cancel, _)) = slot.as_ref() {
                cancel.cancel();
                debug!("waiting for scavenge to stop");
            }
            while slot.is_some() {
                self.running.ended.wait(&mut slot);
            }
        }
        self.chunks.open_chunk()?.flush(true)?;

        *is_open = false;
        info!(
            path = ?self.dir.as_ref().map(StoreDir::path),
            checkpoint = self.writer_checkpoint(),
            "closed store"
        );
        Ok(())
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Ensures the store is open.
    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Returns store configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the store directory, `None` in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }
}

fn record_scavenge(stats: &StoreStats, result: &CoreResult<ScavengeResult>) {
    match result {
        Ok(result) => stats.record_scavenge(
            result.chunks_rewritten as u64,
            result.records_discarded,
            result.bytes_reclaimed,
        ),
        Err(_) => stats.record_error(),
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .field("chunks", &self.chunks.chunk_count())
            .field("streams", &self.index.stream_count())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scavenge::{Decision, KeepAll, MaxCount, RetentionContext};
    use crate::index::SliceStatus;
    use tempfile::tempdir;

    fn create_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn event(data: &str) -> NewEvent {
        NewEvent::new("test", data.as_bytes().to_vec())
    }

    #[test]
    fn open_in_memory() {
        let db = create_db();
        assert!(db.is_open());
        assert_eq!(db.writer_checkpoint(), 0);
        assert!(db.path().is_none());
    }

    #[test]
    fn append_and_read_back() {
        let db = create_db();
        let result = db
            .append("orders", ExpectedVersion::NoStream, vec![event("a"), event("b")])
            .unwrap();
        assert_eq!(result.first_event_number, 0);
        assert_eq!(result.last_event_number, 1);
        assert!(result.commit_position > result.transaction_position);

        let first = db.read_event("orders", 0).unwrap().into_event().unwrap();
        assert_eq!(first.data, b"a");
        assert_eq!(first.commit_position, result.commit_position);
        let last = db.read_event("orders", -1).unwrap().into_event().unwrap();
        assert_eq!(last.data, b"b");

        let slice = db.read_stream_forward("orders", 0, 10).unwrap();
        assert_eq!(slice.status, SliceStatus::Success);
        assert_eq!(slice.events.len(), 2);
        assert!(slice.is_end_of_stream);
    }

    #[test]
    fn json_and_metadata_round_trip() {
        let db = create_db();
        db.append(
            "s",
            ExpectedVersion::Any,
            vec![NewEvent::json("Placed", br#"{"a":1}"#.to_vec()).with_metadata(b"m".to_vec())],
        )
        .unwrap();
        let read = db.read_event("s", 0).unwrap().into_event().unwrap();
        assert!(read.flags.is_json());
        assert_eq!(read.metadata, b"m");
        assert_eq!(read.event_type, "Placed");
    }

    #[test]
    fn expected_version_is_checked() {
        let db = create_db();
        db.append("s", ExpectedVersion::NoStream, vec![event("a")])
            .unwrap();

        let err = db
            .append("s", ExpectedVersion::NoStream, vec![event("b")])
            .unwrap_err();
        assert!(matches!(err, CoreError::WrongExpectedVersion { actual: 0, .. }));

        db.append("s", ExpectedVersion::Exact(0), vec![event("b")])
            .unwrap();
        assert!(db
            .append("s", ExpectedVersion::Exact(0), vec![event("c")])
            .is_err());
        db.append("s", ExpectedVersion::StreamExists, vec![event("c")])
            .unwrap();
        assert_eq!(db.stream_info("s").unwrap().last_event_number, 2);
        assert_eq!(db.stats().version_conflicts, 2);
    }

    #[test]
    fn empty_appends_are_rejected() {
        let db = create_db();
        assert!(matches!(
            db.append("s", ExpectedVersion::Any, Vec::new()),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(matches!(
            db.append("", ExpectedVersion::Any, vec![event("a")]),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn link_events_exist_without_target() {
        let db = create_db();
        db.append("links", ExpectedVersion::Any, vec![NewEvent::link_to("missing", 3)])
            .unwrap();

        let link = db.read_event("links", 0).unwrap().into_event().unwrap();
        assert!(link.is_link());
        assert_eq!(link.event_type, LINK_EVENT_TYPE);
        assert!(matches!(
            db.resolve_link(link),
            Err(CoreError::LinkUnresolved { .. })
        ));
    }

    #[test]
    fn resolve_link_to_existing_event() {
        let db = create_db();
        db.append("target", ExpectedVersion::Any, vec![event("x")])
            .unwrap();
        db.append("links", ExpectedVersion::Any, vec![NewEvent::link_to("target", 0)])
            .unwrap();

        let link = db.read_event("links", 0).unwrap().into_event().unwrap();
        let resolved = db.resolve_link(link).unwrap();
        assert!(resolved.is_resolved_link());
        assert_eq!(resolved.event.stream_id, "target");
        assert_eq!(resolved.event.data, b"x");
    }

    #[test]
    fn scavenge_keeps_last_event() {
        let db = create_db();
        for i in 0..5 {
            db.append("s", ExpectedVersion::Any, vec![event(&i.to_string())])
                .unwrap();
        }
        db.complete_chunk().unwrap();

        let result = db.scavenge_with(MaxCount(0), CancelToken::new()).unwrap();
        assert_eq!(result.events_discarded, 4);
        assert_eq!(db.stream_info("s").unwrap().last_event_number, 4);
        assert!(db.read_event("s", 4).unwrap().is_success());
        assert!(!db.read_event("s", 0).unwrap().is_success());

        let stats = db.stats();
        assert_eq!(stats.scavenges, 1);
        assert_eq!(stats.records_discarded, 8);
    }

    #[test]
    fn background_scavenge_reports_result() {
        let db = create_db();
        db.append("s", ExpectedVersion::Any, vec![event("a")])
            .unwrap();
        db.complete_chunk().unwrap();

        let handle = db.start_scavenge_with(KeepAll).unwrap();
        let result = handle.wait().unwrap();
        assert_eq!(result.chunks_scanned, 1);
        assert_eq!(result.chunks_rewritten, 0);
        assert!(db.scavenge_progress().is_none());
    }

    #[test]
    fn only_one_scavenge_at_a_time() {
        let db = create_db();
        db.append("s", ExpectedVersion::Any, vec![event("a")])
            .unwrap();
        db.complete_chunk().unwrap();

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let blocking = move |_: &RetentionContext<'_>, _: &EventRecord| {
            let _ = entered_tx.send(());
            let _ = release_rx.lock().recv();
            Decision::Keep
        };
        let handle = db.start_scavenge_with(blocking).unwrap();
        entered_rx.recv().unwrap();

        assert!(db.scavenge_progress().is_some());
        assert!(matches!(
            db.scavenge(),
            Err(CoreError::InvalidOperation { .. })
        ));

        release_tx.send(()).unwrap();
        handle.wait().unwrap();
        db.scavenge().unwrap();
    }

    #[test]
    fn close_waits_for_background_scavenge() {
        let db = create_db();
        for i in 0..20 {
            db.append("s", ExpectedVersion::Any, vec![event(&i.to_string())])
                .unwrap();
        }
        db.complete_chunk().unwrap();

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        let slow = move |_: &RetentionContext<'_>, _: &EventRecord| {
            let _ = entered_tx.lock().send(());
            thread::sleep(std::time::Duration::from_millis(20));
            Decision::Discard
        };
        let handle = db.start_scavenge_with(slow).unwrap();
        entered_rx.recv().unwrap();

        db.close().unwrap();
        let checkpoint = db.writer_checkpoint();
        assert!(db.scavenge_progress().is_none());

        assert!(matches!(
            handle.wait(),
            Err(CoreError::ScavengeAborted { chunk_number: 0 })
        ));
        assert_eq!(db.writer_checkpoint(), checkpoint);
    }

    #[test]
    fn closed_store_rejects_operations() {
        let db = create_db();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(
            db.append("s", ExpectedVersion::Any, vec![event("a")]),
            Err(CoreError::DatabaseClosed)
        ));
        assert!(matches!(db.read_event("s", 0), Err(CoreError::DatabaseClosed)));
        db.close().unwrap();
    }

    #[test]
    fn reopen_preserves_streams() {
        let dir = tempdir().unwrap();
        let config = Config::default().sync_on_append(false);
        {
            let db = Database::open_with_config(dir.path(), config.clone()).unwrap();
            db.append("s", ExpectedVersion::Any, vec![event("a"), event("b")])
                .unwrap();
            db.complete_chunk().unwrap();
            db.append("s", ExpectedVersion::Any, vec![event("c")])
                .unwrap();
        }

        let db = Database::open_with_config(dir.path(), config).unwrap();
        let slice = db.read_stream_forward("s", 0, 10).unwrap();
        let data: Vec<&[u8]> = slice.events.iter().map(|e| e.data.as_slice()).collect();
        assert_eq!(data, vec![&b"a"[..], b"b", b"c"]);
        assert_eq!(db.chunk_infos().unwrap().len(), 2);
        assert_eq!(db.verify().unwrap(), 5);
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _db = Database::open(dir.path()).unwrap();
        assert!(matches!(
            Database::open(dir.path()),
            Err(CoreError::DatabaseLocked)
        ));
    }

    #[test]
    fn error_if_exists() {
        let dir = tempdir().unwrap();
        {
            let db = Database::open(dir.path()).unwrap();
            db.append("s", ExpectedVersion::Any, vec![event("a")])
                .unwrap();
        }
        let config = Config::default().error_if_exists(true);
        assert!(matches!(
            Database::open_with_config(dir.path(), config),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn append_record_is_indexed() {
        let db = create_db();
        let prepare = db
            .append_record(LogRecord::Prepare(PrepareRecord {
                position: 0,
                transaction_position: 0,
                transaction_offset: 0,
                flags: PrepareFlags::SINGLE_WRITE,
                stream_id: "raw".into(),
                event_number: NO_EVENT_NUMBER,
                event_id: Uuid::new_v4(),
                event_type: "t".into(),
                data: b"raw".to_vec(),
                metadata: Vec::new(),
                timestamp: 0,
            }))
            .unwrap();
        assert!(!db.read_event("raw", 0).unwrap().is_success());

        db.append_record(LogRecord::Commit(CommitRecord {
            position: 0,
            transaction_position: prepare,
            first_event_number: 0,
            timestamp: 0,
        }))
        .unwrap();
        assert!(db.read_event("raw", 0).unwrap().is_success());
        assert_eq!(db.scan_log(0).unwrap().count(), 2);
    }
}
