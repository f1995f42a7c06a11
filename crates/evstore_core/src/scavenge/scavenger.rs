//! The chunk-by-chunk scavenge pass.

use crate::chunk::{Chunk, ChunkManager, LogWriter};
use crate::error::{CoreError, CoreResult};
use crate::index::{EventRecord, IndexEntry, IndexSnapshot, ReadIndex};
use crate::log::{LogRecord, SystemRecord, SystemRecordKind};
use crate::scavenge::handle::{CancelToken, ScavengeProgress};
use crate::scavenge::policy::{Decision, DiscardSet, RetentionContext, RetentionPolicy};
use crate::types::now_millis;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How a scavenge pass ended, as recorded in its completion marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScavengeStatus {
    /// Every sealed chunk was processed.
    Completed = 0,
    /// The pass was cancelled.
    Aborted = 1,
    /// The pass stopped on an error.
    Failed = 2,
}

impl ScavengeStatus {
    /// Converts a byte to a status.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Completed),
            1 => Some(Self::Aborted),
            2 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Payload of the system records that bracket a scavenge pass.
///
/// Layout: the 16-byte scavenge id, then one status byte on the
/// completion marker only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScavengeMarker {
    /// Identifies the pass.
    pub scavenge_id: Uuid,
    /// Outcome, present on completion markers.
    pub status: Option<ScavengeStatus>,
}

impl ScavengeMarker {
    /// Encodes the marker payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut data = self.scavenge_id.as_bytes().to_vec();
        if let Some(status) = self.status {
            data.push(status as u8);
        }
        data
    }

    /// Decodes a marker payload.
    ///
    /// Returns `None` if the payload is not a marker.
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<Self> {
        let (id, rest) = data.split_at_checked(16)?;
        let scavenge_id = Uuid::from_slice(id).ok()?;
        let status = match rest {
            [] => None,
            [b] => Some(ScavengeStatus::from_byte(*b)?),
            _ => return None,
        };
        Some(Self {
            scavenge_id,
            status,
        })
    }
}

/// Summary of a finished scavenge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScavengeResult {
    /// Identifies the pass in the log markers.
    pub scavenge_id: Uuid,
    /// Sealed chunks examined.
    pub chunks_scanned: usize,
    /// Chunks replaced by a smaller version.
    pub chunks_rewritten: usize,
    /// Records left in place across the scanned chunks.
    pub records_kept: u64,
    /// Records dropped, prepares and commits.
    pub records_discarded: u64,
    /// Committed events dropped from the index.
    pub events_discarded: u64,
    /// File bytes freed.
    pub bytes_reclaimed: u64,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    rewritten: bool,
    records_kept: u64,
    records_discarded: u64,
    events_discarded: u64,
    bytes_reclaimed: u64,
}

/// An event chosen for removal.
struct Dropped {
    stream_id: String,
    event_number: i64,
}

impl From<&EventRecord> for Dropped {
    fn from(event: &EventRecord) -> Self {
        Self {
            stream_id: event.stream_id.clone(),
            event_number: event.event_number,
        }
    }
}

/// Rewrites sealed chunks without the records a retention policy drops.
///
/// Each stream's last event survives whatever the policy decides, so a
/// stream's last event number never moves backwards. Records are copied
/// with their original positions; a chunk is swapped in only once its
/// replacement is sealed, and the index forgets dropped events right after
/// the swap, before readers can check for missing records.
pub struct Scavenger {
    chunks: Arc<ChunkManager>,
    index: Arc<ReadIndex>,
    writer: Arc<Mutex<LogWriter>>,
    policy: Arc<dyn RetentionPolicy>,
    cancel: CancelToken,
    progress: Arc<ScavengeProgress>,
}

impl Scavenger {
    /// Creates a scavenger.
    #[must_use]
    pub fn new(
        chunks: Arc<ChunkManager>,
        index: Arc<ReadIndex>,
        writer: Arc<Mutex<LogWriter>>,
        policy: Arc<dyn RetentionPolicy>,
    ) -> Self {
        Self {
            chunks,
            index,
            writer,
            policy,
            cancel: CancelToken::new(),
            progress: Arc::new(ScavengeProgress::new()),
        }
    }

    /// Uses `cancel` as the pass's cancellation flag.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the pass's cancellation flag.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Returns the pass's live progress.
    #[must_use]
    pub fn progress(&self) -> Arc<ScavengeProgress> {
        Arc::clone(&self.progress)
    }

    /// Runs one pass over every sealed chunk.
    ///
    /// Writes a `ScavengeStarted` marker first and a `ScavengeCompleted`
    /// marker last, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns `ScavengeAborted` if cancelled; the chunk in progress is left
    /// as it was and chunks already swapped stay swapped. Other errors come
    /// from reading, writing or swapping chunks.
    pub fn run(&self) -> CoreResult<ScavengeResult> {
        let started = Instant::now();
        let scavenge_id = Uuid::new_v4();
        self.write_marker(
            SystemRecordKind::ScavengeStarted,
            ScavengeMarker {
                scavenge_id,
                status: None,
            },
        )?;

        let chunks = self.chunks.sealed_chunks();
        self.progress.start(chunks.len());
        info!(%scavenge_id, chunks = chunks.len(), "scavenge started");

        let mut result = ScavengeResult {
            scavenge_id,
            ..ScavengeResult::default()
        };
        let outcome = self.scavenge_chunks(&chunks, &mut result);
        let status = match &outcome {
            Ok(()) => ScavengeStatus::Completed,
            Err(CoreError::ScavengeAborted { .. }) => ScavengeStatus::Aborted,
            Err(_) => ScavengeStatus::Failed,
        };
        let marker = self.write_marker(
            SystemRecordKind::ScavengeCompleted,
            ScavengeMarker {
                scavenge_id,
                status: Some(status),
            },
        );
        result.elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                marker?;
                info!(
                    %scavenge_id,
                    rewritten = result.chunks_rewritten,
                    discarded = result.records_discarded,
                    reclaimed = result.bytes_reclaimed,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "scavenge completed"
                );
                Ok(result)
            }
            Err(e) => {
                if let Err(marker_error) = marker {
                    warn!(%scavenge_id, error = %marker_error, "failed to write scavenge marker");
                }
                warn!(%scavenge_id, error = %e, "scavenge stopped");
                Err(e)
            }
        }
    }

    fn scavenge_chunks(
        &self,
        chunks: &[Arc<Chunk>],
        result: &mut ScavengeResult,
    ) -> CoreResult<()> {
        let snapshot = self.index.snapshot();
        let dropped = self.plan(chunks, &snapshot)?;
        for chunk in chunks {
            self.check_cancel(chunk.number())?;
            self.progress.enter_chunk(chunk.number());
            let outcome = self.scavenge_chunk(chunk, &dropped)?;
            self.progress
                .finish_chunk(outcome.rewritten, outcome.records_discarded);

            result.chunks_scanned += 1;
            if outcome.rewritten {
                result.chunks_rewritten += 1;
            }
            result.records_kept += outcome.records_kept;
            result.records_discarded += outcome.records_discarded;
            result.events_discarded += outcome.events_discarded;
            result.bytes_reclaimed += outcome.bytes_reclaimed;
        }
        Ok(())
    }

    /// Decides every committed event of `chunks`.
    ///
    /// Returns the dropped events keyed by prepare position. A kept link is
    /// decided again each time the set grows, so a link into an event this
    /// pass drops goes in the same pass.
    fn plan(
        &self,
        chunks: &[Arc<Chunk>],
        snapshot: &IndexSnapshot,
    ) -> CoreResult<BTreeMap<u64, Dropped>> {
        let mut dropped = BTreeMap::new();
        let Some(end) = chunks.last().map(|chunk| chunk.end_position()) else {
            return Ok(dropped);
        };
        let committed = committed_below(snapshot, end);
        let now = now_millis();
        let mut discarded = DiscardSet::default();
        let mut kept_links = Vec::new();

        for chunk in chunks {
            for record in chunk.read_all()? {
                self.check_cancel(chunk.number())?;
                let LogRecord::Prepare(prepare) = record else {
                    continue;
                };
                // uncommitted prepares are never indexed
                let Some(&(event_number, entry)) = committed.get(&prepare.position) else {
                    continue;
                };
                let last_event_number = snapshot.last_event_number(&prepare.stream_id);
                let event = EventRecord::from_prepare(prepare, event_number, entry.commit_position);
                let ctx = RetentionContext {
                    snapshot,
                    discarded: &discarded,
                    last_event_number,
                    now,
                };
                let decision = self.policy.decide(&ctx, &event);
                if event_number == last_event_number {
                    continue;
                }
                match decision {
                    Decision::Discard => {
                        discarded.insert(&event.stream_id, event_number);
                        dropped.insert(event.log_position, Dropped::from(&event));
                    }
                    Decision::Keep if event.is_link() => kept_links.push(event),
                    Decision::Keep => {}
                }
            }
        }

        let mut rounds = 0;
        loop {
            let before = discarded.len();
            kept_links.retain(|event| {
                let decision = {
                    let ctx = RetentionContext {
                        snapshot,
                        discarded: &discarded,
                        last_event_number: snapshot.last_event_number(&event.stream_id),
                        now,
                    };
                    self.policy.decide(&ctx, event)
                };
                if decision == Decision::Keep {
                    return true;
                }
                discarded.insert(&event.stream_id, event.event_number);
                dropped.insert(event.log_position, Dropped::from(event));
                false
            });
            if discarded.len() == before {
                break;
            }
            rounds += 1;
        }
        debug!(
            events = committed.len(),
            dropped = dropped.len(),
            rounds,
            "planned scavenge"
        );
        Ok(dropped)
    }

    fn scavenge_chunk(
        &self,
        chunk: &Arc<Chunk>,
        dropped: &BTreeMap<u64, Dropped>,
    ) -> CoreResult<ChunkOutcome> {
        let number = chunk.number();
        let range = chunk.start_position()..chunk.end_position();
        if dropped.range(range.clone()).next().is_none() {
            debug!(chunk = number, records = chunk.record_count(), "chunk unchanged");
            return Ok(ChunkOutcome {
                records_kept: chunk.record_count() as u64,
                ..ChunkOutcome::default()
            });
        }
        let records = chunk.read_all()?;

        let mut keep = Vec::with_capacity(records.len());
        let mut kept_transactions = HashSet::new();
        let mut chunk_transactions = HashSet::new();
        for record in &records {
            self.check_cancel(number)?;
            let kept = match record {
                LogRecord::Prepare(prepare) => {
                    chunk_transactions.insert(prepare.transaction_position);
                    let kept = !dropped.contains_key(&prepare.position);
                    if kept {
                        kept_transactions.insert(prepare.transaction_position);
                    }
                    kept
                }
                LogRecord::Commit(commit) => {
                    let tx = commit.transaction_position;
                    tx < range.start
                        || kept_transactions.contains(&tx)
                        || !chunk_transactions.contains(&tx)
                }
                LogRecord::System(_) => true,
            };
            keep.push(kept);
        }

        let records_kept = keep.iter().filter(|kept| **kept).count() as u64;
        let records_discarded = records.len() as u64 - records_kept;

        // an aborted replacement removes its temp file on drop
        let replacement = self.chunks.create_replacement(chunk)?;
        for (record, _) in records.iter().zip(&keep).filter(|(_, kept)| **kept) {
            self.check_cancel(number)?;
            replacement.append(record.position(), &record.encode()?)?;
        }
        replacement.seal(range.end)?;
        let bytes_reclaimed = chunk
            .file_size()?
            .saturating_sub(replacement.file_size()?);

        let swapped = self.index.swap_exclusive(|| -> CoreResult<Option<u64>> {
            if !self.chunks.replace(chunk, replacement)? {
                return Ok(None);
            }
            let mut events_discarded = 0;
            for (&position, event) in dropped.range(range) {
                self.index
                    .discard(&event.stream_id, event.event_number, position);
                events_discarded += 1;
            }
            Ok(Some(events_discarded))
        })?;
        let Some(events_discarded) = swapped else {
            warn!(chunk = number, "chunk changed during scavenge, skipped");
            return Ok(ChunkOutcome {
                records_kept: records.len() as u64,
                ..ChunkOutcome::default()
            });
        };

        debug!(
            chunk = number,
            kept = records_kept,
            discarded = records_discarded,
            reclaimed = bytes_reclaimed,
            "rewrote chunk"
        );
        Ok(ChunkOutcome {
            rewritten: true,
            records_kept,
            records_discarded,
            events_discarded,
            bytes_reclaimed,
        })
    }

    fn check_cancel(&self, chunk_number: u32) -> CoreResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::ScavengeAborted { chunk_number });
        }
        Ok(())
    }

    fn write_marker(&self, kind: SystemRecordKind, marker: ScavengeMarker) -> CoreResult<u64> {
        self.writer.lock().append(LogRecord::System(SystemRecord {
            position: 0,
            timestamp: now_millis(),
            kind,
            data: marker.encode(),
        }))
    }
}

impl std::fmt::Debug for Scavenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scavenger")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.snapshot())
            .finish_non_exhaustive()
    }
}

/// Maps the positions of indexed prepares below `end` to their event
/// numbers and index entries, in one walk over the index.
fn committed_below(snapshot: &IndexSnapshot, end: u64) -> HashMap<u64, (i64, IndexEntry)> {
    snapshot
        .histories()
        .flat_map(|(_, history)| history.iter())
        .filter(|(_, entry)| entry.prepare_position < end)
        .map(|(event_number, entry)| (entry.prepare_position, (event_number, entry)))
        .collect()
}
