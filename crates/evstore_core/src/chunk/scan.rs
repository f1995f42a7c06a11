//! Lazy scans over the log.

use crate::chunk::file::Chunk;
use crate::error::CoreResult;
use crate::log::LogRecord;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// An iterator over log records in physical order.
///
/// A scan works on the chunk snapshot and the limit it was created with:
/// chunks swapped in by scavenge afterwards and records appended past the
/// limit are not seen. It stops for good after yielding an error.
#[derive(Debug)]
pub struct LogScan {
    chunks: Vec<Arc<Chunk>>,
    direction: Direction,
    chunk_index: usize,
    /// Forward: next record to read. Backward: one past the next record.
    record_index: usize,
    limit: u64,
    done: bool,
}

impl LogScan {
    pub(crate) fn forward(chunks: Vec<Arc<Chunk>>, from: u64, limit: u64) -> Self {
        let chunk_index = chunks
            .partition_point(|c| c.start_position() <= from)
            .saturating_sub(1);
        let record_index = chunks.get(chunk_index).map_or(0, |c| c.lower_bound(from));
        Self {
            done: chunks.is_empty() || from >= limit,
            chunks,
            direction: Direction::Forward,
            chunk_index,
            record_index,
            limit,
        }
    }

    pub(crate) fn backward(chunks: Vec<Arc<Chunk>>, before: u64) -> Self {
        let after_last = chunks.partition_point(|c| c.start_position() < before);
        let (chunk_index, record_index) = match after_last.checked_sub(1) {
            Some(i) => (i, chunks[i].lower_bound(before)),
            None => (0, 0),
        };
        Self {
            done: after_last == 0,
            chunks,
            direction: Direction::Backward,
            chunk_index,
            record_index,
            limit: before,
        }
    }

    fn next_forward(&mut self) -> Option<CoreResult<LogRecord>> {
        loop {
            let chunk = self.chunks.get(self.chunk_index)?;
            match chunk.position_at(self.record_index) {
                Some(position) if position >= self.limit => return None,
                Some(_) => {
                    let record = chunk.read_nth(self.record_index);
                    self.record_index += 1;
                    return Some(record);
                }
                None => {
                    self.chunk_index += 1;
                    self.record_index = 0;
                }
            }
        }
    }

    fn next_backward(&mut self) -> Option<CoreResult<LogRecord>> {
        while self.record_index == 0 {
            self.chunk_index = self.chunk_index.checked_sub(1)?;
            self.record_index = self.chunks[self.chunk_index].record_count();
        }
        self.record_index -= 1;
        Some(self.chunks[self.chunk_index].read_nth(self.record_index))
    }
}

impl Iterator for LogScan {
    type Item = CoreResult<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.direction {
            Direction::Forward => self.next_forward(),
            Direction::Backward => self.next_backward(),
        };
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkManager, ChunkStore};
    use crate::log::CommitRecord;

    /// Builds a log of `per_chunk` records in each of `chunks` chunks.
    fn build(chunks: usize, per_chunk: usize) -> (ChunkManager, Vec<u64>) {
        let manager = ChunkManager::open(ChunkStore::Memory, 0, 1).unwrap();
        let mut positions = Vec::new();
        for n in 0..chunks {
            let chunk = manager.open_chunk().unwrap();
            for _ in 0..per_chunk {
                let position = chunk.end_position();
                let record = LogRecord::Commit(CommitRecord {
                    position,
                    transaction_position: position,
                    first_event_number: 0,
                    timestamp: 0,
                });
                chunk.append(position, &record.encode().unwrap()).unwrap();
                positions.push(position);
            }
            if n + 1 < chunks {
                let end = chunk.end_position();
                chunk.seal(end).unwrap();
                manager.add_chunk(chunk.number() + 1, end).unwrap();
            }
        }
        (manager, positions)
    }

    fn positions(scan: LogScan) -> Vec<u64> {
        scan.map(|r| r.unwrap().position()).collect()
    }

    #[test]
    fn forward_crosses_chunks() {
        let (manager, all) = build(3, 2);
        assert_eq!(positions(manager.scan_forward(0, u64::MAX)), all);
        assert_eq!(positions(manager.scan_forward(all[3], u64::MAX)), all[3..]);
        // a position inside a record starts at the next one
        assert_eq!(positions(manager.scan_forward(all[1] + 1, u64::MAX)), all[2..]);
    }

    #[test]
    fn forward_stops_at_limit() {
        let (manager, all) = build(2, 3);
        assert_eq!(positions(manager.scan_forward(0, all[4])), all[..4]);
        assert!(manager.scan_forward(all[4], all[4]).next().is_none());
    }

    #[test]
    fn backward_is_reverse_of_forward() {
        let (manager, all) = build(3, 3);
        let end = manager.open_chunk().unwrap().end_position();
        let mut reversed = all.clone();
        reversed.reverse();
        assert_eq!(positions(manager.scan_backward(end, end)), reversed);
        assert_eq!(
            positions(manager.scan_backward(all[5], end)),
            reversed[reversed.len() - 5..]
        );
        assert!(manager.scan_backward(0, end).next().is_none());
    }

    #[test]
    fn backward_never_passes_limit() {
        let (manager, all) = build(1, 4);
        assert_eq!(positions(manager.scan_backward(u64::MAX, all[2])), vec![all[1], all[0]]);
    }
}
