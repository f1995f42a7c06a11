//! The read index and its queries.

use crate::checkpoint::CheckpointReader;
use crate::chunk::ChunkManager;
use crate::error::{CoreError, CoreResult};
use crate::index::event::{
    AllSlice, EventRecord, ReadEventResult, SliceStatus, StreamInfo, StreamSlice,
};
use crate::index::stream::{IndexEntry, IndexSnapshot, StreamHistory};
use crate::log::{CommitRecord, LogRecord, PrepareRecord};
use crate::types::{TFPos, NO_EVENT_NUMBER};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A prepare waiting for its commit.
#[derive(Debug, Clone)]
struct PendingPrepare {
    position: u64,
    stream_id: String,
    event_number: i64,
    transaction_offset: u32,
}

/// Projects the physical log into per-stream event sequences.
///
/// The index only ever learns about records below the writer checkpoint:
/// the append path calls [`Self::observe`] after the checkpoint is flushed,
/// and [`Self::rebuild`] replays the log up to it.
pub struct ReadIndex {
    chunks: Arc<ChunkManager>,
    checkpoint: CheckpointReader,
    streams: RwLock<HashMap<String, Arc<StreamHistory>>>,
    pending: Mutex<HashMap<u64, Vec<PendingPrepare>>>,
    /// Held exclusively while a chunk swap and its discards are applied.
    swap: RwLock<()>,
}

impl ReadIndex {
    /// Creates an empty index over `chunks`.
    #[must_use]
    pub fn new(chunks: Arc<ChunkManager>, checkpoint: CheckpointReader) -> Self {
        Self {
            chunks,
            checkpoint,
            streams: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            swap: RwLock::new(()),
        }
    }

    /// Replays the whole log into the index.
    ///
    /// Returns the number of records replayed.
    ///
    /// # Errors
    ///
    /// Returns the first read or decode failure.
    pub fn rebuild(&self) -> CoreResult<usize> {
        let limit = self.checkpoint.read();
        let mut count = 0;
        for record in self.chunks.scan_forward(0, limit) {
            self.observe(&record?);
            count += 1;
        }
        debug!(
            records = count,
            streams = self.streams.read().len(),
            "rebuilt read index"
        );
        Ok(count)
    }

    /// Feeds one durable record to the index.
    ///
    /// Prepares wait until their commit arrives; a commit indexes every
    /// pending prepare of its transaction. A transaction still open when a
    /// commit lands two chunks past its start is abandoned, and a later
    /// commit for it indexes nothing.
    pub fn observe(&self, record: &LogRecord) {
        match record {
            LogRecord::Prepare(prepare) => {
                self.pending
                    .lock()
                    .entry(prepare.transaction_position)
                    .or_default()
                    .push(PendingPrepare {
                        position: prepare.position,
                        stream_id: prepare.stream_id.clone(),
                        event_number: prepare.event_number,
                        transaction_offset: prepare.transaction_offset,
                    });
            }
            LogRecord::Commit(commit) => {
                let prepares = {
                    let mut pending = self.pending.lock();
                    let prepares = pending.remove(&commit.transaction_position);
                    if !pending.is_empty() {
                        self.prune_abandoned(&mut pending, commit.position);
                    }
                    prepares
                };
                let Some(prepares) = prepares else {
                    return;
                };
                let mut streams = self.streams.write();
                for prepare in prepares {
                    let event_number = if prepare.event_number == NO_EVENT_NUMBER {
                        commit.first_event_number + i64::from(prepare.transaction_offset)
                    } else {
                        prepare.event_number
                    };
                    let history = streams.entry(prepare.stream_id).or_default();
                    Arc::make_mut(history).insert(
                        event_number,
                        IndexEntry {
                            prepare_position: prepare.position,
                            commit_position: commit.position,
                        },
                    );
                }
            }
            LogRecord::System(_) => {}
        }
    }

    /// Forgets transactions that began before the chunk preceding the one
    /// holding `position`.
    fn prune_abandoned(&self, pending: &mut HashMap<u64, Vec<PendingPrepare>>, position: u64) {
        let Some(floor) = self.chunks.preceding_chunk_start(position) else {
            return;
        };
        let before = pending.len();
        pending.retain(|&transaction_position, _| transaction_position >= floor);
        let pruned = before - pending.len();
        if pruned > 0 {
            debug!(pruned, floor, "dropped abandoned transactions");
        }
    }

    /// Returns the number of transactions waiting for their commit.
    #[must_use]
    pub fn pending_transactions(&self) -> usize {
        self.pending.lock().len()
    }

    /// Takes a point-in-time copy of the stream index.
    #[must_use]
    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot::new(self.streams.read().clone())
    }

    /// Runs `apply` while missing-record checks wait, so a chunk swap and
    /// the discards that follow it look like one step to readers.
    pub fn swap_exclusive<T>(&self, apply: impl FnOnce() -> T) -> T {
        let _swap = self.swap.write();
        apply()
    }

    /// Removes one event from the index after scavenge dropped it.
    ///
    /// The stream's last event is never removed.
    pub fn discard(&self, stream_id: &str, event_number: i64, prepare_position: u64) -> bool {
        let mut streams = self.streams.write();
        match streams.get_mut(stream_id) {
            Some(history) => Arc::make_mut(history).remove(event_number, prepare_position),
            None => false,
        }
    }

    /// Returns a stream's last event number, -1 if the stream is unknown.
    #[must_use]
    pub fn last_event_number(&self, stream_id: &str) -> i64 {
        self.history(stream_id)
            .map_or(NO_EVENT_NUMBER, |h| h.last_event_number())
    }

    /// Returns a summary of one stream.
    #[must_use]
    pub fn stream_info(&self, stream_id: &str) -> Option<StreamInfo> {
        self.history(stream_id).map(|h| StreamInfo {
            stream_id: stream_id.to_string(),
            last_event_number: h.last_event_number(),
            event_count: h.len(),
        })
    }

    /// Returns a summary of every stream, ordered by id.
    #[must_use]
    pub fn streams(&self) -> Vec<StreamInfo> {
        let mut infos: Vec<StreamInfo> = self
            .streams
            .read()
            .iter()
            .map(|(id, h)| StreamInfo {
                stream_id: id.clone(),
                last_event_number: h.last_event_number(),
                event_count: h.len(),
            })
            .collect();
        infos.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        infos
    }

    /// Returns the number of known streams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Returns the number of indexed events across all streams.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.streams.read().values().map(|h| h.len()).sum()
    }

    /// Reads one event. `-1` reads the stream's last event.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a number below -1, or a read or decode
    /// failure. A missing event is `Ok(NotFound)`.
    pub fn read_event(&self, stream_id: &str, event_number: i64) -> CoreResult<ReadEventResult> {
        if event_number < NO_EVENT_NUMBER {
            return Err(CoreError::invalid_argument(format!(
                "invalid event number {event_number}"
            )));
        }
        let Some(history) = self.history(stream_id) else {
            return Ok(ReadEventResult::NotFound);
        };
        let number = if event_number == NO_EVENT_NUMBER {
            history.last_event_number()
        } else {
            event_number
        };
        let Some(entry) = history.get(number) else {
            return Ok(ReadEventResult::NotFound);
        };
        Ok(match self.read_indexed(stream_id, number, entry)? {
            Some(event) => ReadEventResult::Success(event),
            None => ReadEventResult::NotFound,
        })
    }

    /// Reads up to `max_count` events with numbers `>= from`, ascending.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a negative `from`, or a read or decode
    /// failure.
    pub fn read_stream_forward(
        &self,
        stream_id: &str,
        from: i64,
        max_count: usize,
    ) -> CoreResult<StreamSlice> {
        if from < 0 {
            return Err(CoreError::invalid_argument(format!(
                "invalid start event number {from}"
            )));
        }
        let Some(history) = self.history(stream_id) else {
            return Ok(no_stream(stream_id));
        };

        let mut entries: Vec<(i64, IndexEntry)> =
            history.forward_from(from).take(max_count.saturating_add(1)).collect();
        let next = (entries.len() > max_count).then(|| entries[max_count].0);
        entries.truncate(max_count);

        Ok(StreamSlice {
            stream_id: stream_id.to_string(),
            status: SliceStatus::Success,
            events: self.read_entries(stream_id, entries)?,
            next_event_number: next.unwrap_or(history.last_event_number() + 1),
            last_event_number: history.last_event_number(),
            is_end_of_stream: next.is_none(),
        })
    }

    /// Reads up to `max_count` events with numbers `<= from`, descending.
    /// `-1` starts at the stream's last event.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for `from` below -1, or a read or decode
    /// failure.
    pub fn read_stream_backward(
        &self,
        stream_id: &str,
        from: i64,
        max_count: usize,
    ) -> CoreResult<StreamSlice> {
        if from < NO_EVENT_NUMBER {
            return Err(CoreError::invalid_argument(format!(
                "invalid start event number {from}"
            )));
        }
        let Some(history) = self.history(stream_id) else {
            return Ok(no_stream(stream_id));
        };
        let last = history.last_event_number();
        let start = if from == NO_EVENT_NUMBER { last } else { from.min(last) };

        let mut entries: Vec<(i64, IndexEntry)> =
            history.backward_from(start).take(max_count.saturating_add(1)).collect();
        let next = (entries.len() > max_count).then(|| entries[max_count].0);
        entries.truncate(max_count);

        Ok(StreamSlice {
            stream_id: stream_id.to_string(),
            status: SliceStatus::Success,
            events: self.read_entries(stream_id, entries)?,
            next_event_number: next.unwrap_or(NO_EVENT_NUMBER),
            last_event_number: last,
            is_end_of_stream: next.is_none(),
        })
    }

    /// Reads committed events at or after `from` in commit order.
    ///
    /// # Errors
    ///
    /// Returns a read or decode failure.
    pub fn read_all_forward(&self, from: TFPos, max_count: usize) -> CoreResult<AllSlice> {
        let limit = self.checkpoint.read();
        if max_count == 0 {
            return Ok(AllSlice {
                events: Vec::new(),
                next_pos: from,
                is_end: from.commit_position >= limit,
            });
        }

        let start = from.commit_position;
        let mut events = Vec::new();
        // prepares met by this scan, by transaction
        let mut open: HashMap<u64, Vec<PrepareRecord>> = HashMap::new();
        for record in self.chunks.scan_forward(start, limit) {
            let commit = match record? {
                LogRecord::Prepare(prepare) => {
                    open.entry(prepare.transaction_position)
                        .or_default()
                        .push(prepare);
                    continue;
                }
                LogRecord::Commit(commit) => commit,
                LogRecord::System(_) => continue,
            };
            let seen = open.remove(&commit.transaction_position);
            // a transaction that began before the scan was only partly seen
            let prepares = if commit.transaction_position >= start {
                seen.unwrap_or_default()
            } else {
                self.transaction_prepares(&commit)?
            };
            for prepare in prepares {
                let pos = TFPos::new(commit.position, prepare.position);
                if pos < from {
                    continue;
                }
                if events.len() == max_count {
                    return Ok(AllSlice {
                        events,
                        next_pos: pos,
                        is_end: false,
                    });
                }
                events.push((pos, EventRecord::from_committed(prepare, &commit)));
            }
        }
        Ok(AllSlice {
            events,
            next_pos: TFPos::head(limit),
            is_end: true,
        })
    }

    /// Reads committed events before `from` in reverse commit order.
    ///
    /// # Errors
    ///
    /// Returns a read or decode failure.
    pub fn read_all_backward(&self, from: TFPos, max_count: usize) -> CoreResult<AllSlice> {
        let limit = self.checkpoint.read();
        if max_count == 0 {
            return Ok(AllSlice {
                events: Vec::new(),
                next_pos: from,
                is_end: from == TFPos::START,
            });
        }

        // commits at from.commit_position may still hold earlier prepares
        let upper = from.commit_position.saturating_add(1);
        let mut events: Vec<(TFPos, EventRecord)> = Vec::new();
        for record in self.chunks.scan_backward(upper, limit) {
            let LogRecord::Commit(commit) = record? else {
                continue;
            };
            for prepare in self.transaction_prepares(&commit)?.into_iter().rev() {
                let pos = TFPos::new(commit.position, prepare.position);
                if pos >= from {
                    continue;
                }
                if events.len() == max_count {
                    let next_pos = events.last().map_or(from, |(p, _)| *p);
                    return Ok(AllSlice {
                        events,
                        next_pos,
                        is_end: false,
                    });
                }
                events.push((pos, EventRecord::from_committed(prepare, &commit)));
            }
        }
        Ok(AllSlice {
            events,
            next_pos: TFPos::START,
            is_end: true,
        })
    }

    fn history(&self, stream_id: &str) -> Option<Arc<StreamHistory>> {
        self.streams.read().get(stream_id).cloned()
    }

    fn read_entries(
        &self,
        stream_id: &str,
        entries: Vec<(i64, IndexEntry)>,
    ) -> CoreResult<Vec<EventRecord>> {
        let mut events = Vec::with_capacity(entries.len());
        for (number, entry) in entries {
            if let Some(event) = self.read_indexed(stream_id, number, entry)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Reads the prepare behind an index entry.
    ///
    /// `None` means the record went away between the index lookup and the
    /// read, which only a concurrent scavenge can cause. A missing record
    /// the index still points at is corruption.
    fn read_indexed(
        &self,
        stream_id: &str,
        event_number: i64,
        entry: IndexEntry,
    ) -> CoreResult<Option<EventRecord>> {
        match self
            .chunks
            .read_at(entry.prepare_position, self.checkpoint.read())
        {
            Ok(LogRecord::Prepare(prepare)) if prepare.stream_id == stream_id => Ok(Some(
                EventRecord::from_prepare(prepare, event_number, entry.commit_position),
            )),
            Ok(other) => Err(CoreError::corrupt_record(format!(
                "index entry {event_number}@{stream_id} points at a {:?} record at {}",
                other.record_type(),
                entry.prepare_position
            ))),
            Err(CoreError::RecordNotFound { position }) => {
                let _swap = self.swap.read();
                let current = self
                    .history(stream_id)
                    .and_then(|history| history.get(event_number));
                if current == Some(entry) {
                    Err(CoreError::corrupt_record(format!(
                        "index entry {event_number}@{stream_id} points at missing record {position}"
                    )))
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Collects the prepares a commit finalizes, in log order.
    fn transaction_prepares(&self, commit: &CommitRecord) -> CoreResult<Vec<PrepareRecord>> {
        let mut prepares = Vec::new();
        for record in self
            .chunks
            .scan_forward(commit.transaction_position, commit.position)
        {
            if let LogRecord::Prepare(prepare) = record? {
                if prepare.transaction_position == commit.transaction_position {
                    prepares.push(prepare);
                }
            }
        }
        Ok(prepares)
    }
}

fn no_stream(stream_id: &str) -> StreamSlice {
    StreamSlice {
        stream_id: stream_id.to_string(),
        status: SliceStatus::NoStream,
        events: Vec::new(),
        next_event_number: NO_EVENT_NUMBER,
        last_event_number: NO_EVENT_NUMBER,
        is_end_of_stream: true,
    }
}

impl std::fmt::Debug for ReadIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadIndex")
            .field("streams", &self.stream_count())
            .field("pending_transactions", &self.pending_transactions())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::WriterCheckpoint;
    use crate::chunk::{ChunkStore, LogWriter};
    use crate::log::PrepareFlags;
    use uuid::Uuid;

    struct Fixture {
        writer: LogWriter,
        index: ReadIndex,
    }

    impl Fixture {
        fn new() -> Self {
            let chunks = Arc::new(ChunkManager::open(ChunkStore::Memory, 0, 1).unwrap());
            let checkpoint = WriterCheckpoint::in_memory();
            let index = ReadIndex::new(Arc::clone(&chunks), checkpoint.reader());
            let writer = LogWriter::new(chunks, checkpoint, 64 * 1024, false);
            Self { writer, index }
        }

        /// Writes one transaction of events to `stream` and indexes it.
        fn write(&mut self, stream: &str, first_event_number: i64, count: u32) {
            let tx = self.writer.next_position();
            let mut records: Vec<LogRecord> = (0..count)
                .map(|offset| {
                    LogRecord::Prepare(PrepareRecord {
                        position: 0,
                        transaction_position: tx,
                        transaction_offset: offset,
                        flags: PrepareFlags::DATA,
                        stream_id: stream.to_string(),
                        event_number: NO_EVENT_NUMBER,
                        event_id: Uuid::new_v4(),
                        event_type: "test".into(),
                        data: format!("{stream}-{offset}").into_bytes(),
                        metadata: Vec::new(),
                        timestamp: 0,
                    })
                })
                .collect();
            records.push(LogRecord::Commit(CommitRecord {
                position: 0,
                transaction_position: tx,
                first_event_number,
                timestamp: 0,
            }));
            self.writer.append_batch(&mut records).unwrap();
            for record in &records {
                self.index.observe(record);
            }
        }

        /// Writes a prepare that is never committed and returns its
        /// transaction position.
        fn write_uncommitted(&mut self, stream: &str) -> u64 {
            let tx = self.writer.next_position();
            let record = LogRecord::Prepare(PrepareRecord {
                position: 0,
                transaction_position: tx,
                transaction_offset: 0,
                flags: PrepareFlags::DATA,
                stream_id: stream.to_string(),
                event_number: NO_EVENT_NUMBER,
                event_id: Uuid::new_v4(),
                event_type: "test".into(),
                data: Vec::new(),
                metadata: Vec::new(),
                timestamp: 0,
            });
            let position = self.writer.append(record.clone()).unwrap();
            let mut record = record;
            record.set_position(position);
            self.index.observe(&record);
            tx
        }

        /// Commits a transaction written earlier.
        fn commit(&mut self, transaction_position: u64, first_event_number: i64) {
            let record = LogRecord::Commit(CommitRecord {
                position: 0,
                transaction_position,
                first_event_number,
                timestamp: 0,
            });
            let position = self.writer.append(record.clone()).unwrap();
            let mut record = record;
            record.set_position(position);
            self.index.observe(&record);
        }
    }

    fn numbers(slice: &StreamSlice) -> Vec<i64> {
        slice.events.iter().map(|e| e.event_number).collect()
    }

    #[test]
    fn commit_makes_prepares_visible() {
        let mut f = Fixture::new();
        f.write_uncommitted("s");
        assert_eq!(f.index.read_event("s", 0).unwrap(), ReadEventResult::NotFound);

        f.write("s", 0, 3);
        let event = f.index.read_event("s", 2).unwrap().into_event().unwrap();
        assert_eq!(event.event_number, 2);
        assert_eq!(event.data, b"s-2");
        assert_eq!(f.index.last_event_number("s"), 2);
        assert_eq!(
            f.index.read_event("s", -1).unwrap().into_event().unwrap().event_number,
            2
        );
        assert_eq!(f.index.read_event("s", 3).unwrap(), ReadEventResult::NotFound);
        assert_eq!(f.index.read_event("other", 0).unwrap(), ReadEventResult::NotFound);
    }

    #[test]
    fn stream_reads_page_in_both_directions() {
        let mut f = Fixture::new();
        f.write("s", 0, 5);

        let first = f.index.read_stream_forward("s", 0, 2).unwrap();
        assert_eq!(numbers(&first), vec![0, 1]);
        assert_eq!(first.next_event_number, 2);
        assert!(!first.is_end_of_stream);

        let last = f.index.read_stream_forward("s", 4, 10).unwrap();
        assert_eq!(numbers(&last), vec![4]);
        assert_eq!(last.next_event_number, 5);
        assert!(last.is_end_of_stream);

        let backward = f.index.read_stream_backward("s", -1, 3).unwrap();
        assert_eq!(numbers(&backward), vec![4, 3, 2]);
        assert_eq!(backward.next_event_number, 1);
        let rest = f.index.read_stream_backward("s", 1, 10).unwrap();
        assert_eq!(numbers(&rest), vec![1, 0]);
        assert!(rest.is_end_of_stream);
        assert_eq!(rest.next_event_number, -1);
    }

    #[test]
    fn missing_stream_reads_as_no_stream() {
        let f = Fixture::new();
        let slice = f.index.read_stream_forward("nope", 0, 10).unwrap();
        assert_eq!(slice.status, SliceStatus::NoStream);
        assert!(slice.events.is_empty());
        assert_eq!(slice.last_event_number, -1);
    }

    #[test]
    fn discard_creates_gaps_but_keeps_last() {
        let mut f = Fixture::new();
        f.write("s", 0, 3);
        let entry_1 = f.index.read_event("s", 1).unwrap().into_event().unwrap();
        let entry_2 = f.index.read_event("s", 2).unwrap().into_event().unwrap();

        assert!(f.index.discard("s", 1, entry_1.log_position));
        assert!(!f.index.discard("s", 2, entry_2.log_position));

        let forward = f.index.read_stream_forward("s", 0, 10).unwrap();
        assert_eq!(numbers(&forward), vec![0, 2]);
        let info = f.index.stream_info("s").unwrap();
        assert_eq!(info.last_event_number, 2);
        assert_eq!(info.event_count, 2);
    }

    #[test]
    fn all_reads_follow_commit_order() {
        let mut f = Fixture::new();
        f.write("a", 0, 2);
        f.write_uncommitted("b");
        f.write("b", 0, 1);

        let forward = f.index.read_all_forward(TFPos::START, 100).unwrap();
        let streams: Vec<_> = forward
            .events
            .iter()
            .map(|(_, e)| (e.stream_id.as_str(), e.event_number))
            .collect();
        assert_eq!(streams, vec![("a", 0), ("a", 1), ("b", 0)]);
        assert!(forward.is_end);

        let head = TFPos::head(f.writer.checkpoint());
        let backward = f.index.read_all_backward(head, 100).unwrap();
        let mut reversed = forward.events.clone();
        reversed.reverse();
        assert_eq!(backward.events, reversed);
    }

    #[test]
    fn interleaved_transactions_read_in_commit_order() {
        let mut f = Fixture::new();
        let first = f.write_uncommitted("a");
        let second = f.write_uncommitted("b");
        f.commit(second, 0);
        f.commit(first, 0);

        let all = f.index.read_all_forward(TFPos::START, 10).unwrap();
        let streams: Vec<&str> = all.events.iter().map(|(_, e)| e.stream_id.as_str()).collect();
        assert_eq!(streams, vec!["b", "a"]);

        let (last_pos, _) = all.events[1];
        let tail = f.index.read_all_forward(last_pos, 10).unwrap();
        assert_eq!(tail.events.len(), 1);
        assert_eq!(tail.events[0].1.stream_id, "a");
        assert_eq!(tail.events[0].0, last_pos);
    }

    #[test]
    fn all_reads_page() {
        let mut f = Fixture::new();
        f.write("a", 0, 3);
        f.write("b", 0, 2);

        let mut collected = Vec::new();
        let mut pos = TFPos::START;
        loop {
            let slice = f.index.read_all_forward(pos, 2).unwrap();
            collected.extend(slice.events.iter().map(|(p, _)| *p));
            if slice.is_end {
                break;
            }
            pos = slice.next_pos;
        }
        assert_eq!(collected.len(), 5);
        assert!(collected.windows(2).all(|w| w[0] < w[1]));

        let mut backward = Vec::new();
        let mut pos = TFPos::head(f.writer.checkpoint());
        loop {
            let slice = f.index.read_all_backward(pos, 2).unwrap();
            backward.extend(slice.events.iter().map(|(p, _)| *p));
            if slice.is_end {
                break;
            }
            pos = slice.next_pos;
        }
        backward.reverse();
        assert_eq!(backward, collected);
    }

    #[test]
    fn missing_record_behind_live_entry_is_corruption() {
        let mut f = Fixture::new();
        f.write("s", 0, 2);
        let real = f.index.history("s").unwrap().get(1).unwrap();
        {
            let mut streams = f.index.streams.write();
            let history = streams.get_mut("s").unwrap();
            Arc::make_mut(history).insert(
                1,
                IndexEntry {
                    prepare_position: real.prepare_position + 1,
                    commit_position: real.commit_position,
                },
            );
        }

        assert!(matches!(
            f.index.read_event("s", 1),
            Err(CoreError::CorruptRecord { .. })
        ));
        assert!(f.index.read_stream_forward("s", 0, 10).is_err());
        assert!(f.index.read_event("s", 0).unwrap().is_success());
    }

    #[test]
    fn entry_dropped_during_read_reads_as_missing() {
        let mut f = Fixture::new();
        f.write("s", 0, 3);
        let stale = f.index.history("s").unwrap().get(1).unwrap();
        assert!(f.index.discard("s", 1, stale.prepare_position));

        let gone = IndexEntry {
            prepare_position: stale.prepare_position + 1,
            ..stale
        };
        assert_eq!(f.index.read_indexed("s", 1, gone).unwrap(), None);
    }

    #[test]
    fn transaction_may_commit_in_the_next_chunk() {
        let mut f = Fixture::new();
        let tx = f.write_uncommitted("s");
        f.writer.complete_chunk().unwrap();
        f.commit(tx, 0);

        assert!(f.index.read_event("s", 0).unwrap().is_success());
        assert_eq!(f.index.pending_transactions(), 0);
    }

    #[test]
    fn abandoned_transactions_are_pruned() {
        let mut f = Fixture::new();
        let tx = f.write_uncommitted("s");
        f.writer.complete_chunk().unwrap();
        f.write("other", 0, 1);
        assert_eq!(f.index.pending_transactions(), 1);

        f.writer.complete_chunk().unwrap();
        f.write("other", 1, 1);
        assert_eq!(f.index.pending_transactions(), 0);

        f.commit(tx, 0);
        assert_eq!(f.index.read_event("s", 0).unwrap(), ReadEventResult::NotFound);
        assert!(f.index.stream_info("s").is_none());

        let rebuilt = ReadIndex::new(Arc::clone(&f.index.chunks), f.writer.checkpoint_reader());
        rebuilt.rebuild().unwrap();
        assert_eq!(rebuilt.pending_transactions(), 0);
        assert_eq!(rebuilt.streams(), f.index.streams());
    }

    #[test]
    fn rebuild_matches_live_index() {
        let mut f = Fixture::new();
        f.write("a", 0, 2);
        f.write("b", 0, 1);
        f.write("a", 2, 1);

        let rebuilt = ReadIndex::new(Arc::clone(&f.index.chunks), f.writer.checkpoint_reader());
        rebuilt.rebuild().unwrap();
        assert_eq!(rebuilt.streams(), f.index.streams());
        assert_eq!(rebuilt.event_count(), 4);
    }
}
