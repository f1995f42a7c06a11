//! Per-stream index state.

use crate::types::NO_EVENT_NUMBER;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

/// Where a committed event lives in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Position of the prepare record.
    pub prepare_position: u64,
    /// Position of the commit record.
    pub commit_position: u64,
}

/// The indexed events of one stream.
///
/// Without scavenging the indexed numbers are exactly `0..=last`. Scavenge
/// punches holes, but never removes the entry for `last_event_number`.
#[derive(Debug, Clone)]
pub struct StreamHistory {
    entries: BTreeMap<i64, IndexEntry>,
    last_event_number: i64,
}

impl Default for StreamHistory {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            last_event_number: NO_EVENT_NUMBER,
        }
    }
}

impl StreamHistory {
    /// Returns the last event number ever indexed, -1 if none.
    #[must_use]
    pub fn last_event_number(&self) -> i64 {
        self.last_event_number
    }

    /// Returns the number of indexed events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether no events are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up one event.
    #[must_use]
    pub fn get(&self, event_number: i64) -> Option<IndexEntry> {
        self.entries.get(&event_number).copied()
    }

    /// Checks whether `event_number` is indexed.
    #[must_use]
    pub fn contains(&self, event_number: i64) -> bool {
        self.entries.contains_key(&event_number)
    }

    /// Iterates indexed events at or above `from`, ascending.
    pub fn forward_from(&self, from: i64) -> impl Iterator<Item = (i64, IndexEntry)> + '_ {
        self.entries.range(from..).map(|(&n, &e)| (n, e))
    }

    /// Iterates indexed events at or below `from`, descending.
    pub fn backward_from(&self, from: i64) -> impl Iterator<Item = (i64, IndexEntry)> + '_ {
        self.entries
            .range((Bound::Unbounded, Bound::Included(from)))
            .rev()
            .map(|(&n, &e)| (n, e))
    }

    /// Iterates every indexed event, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (i64, IndexEntry)> + '_ {
        self.forward_from(i64::MIN)
    }

    pub(crate) fn insert(&mut self, event_number: i64, entry: IndexEntry) {
        self.entries.insert(event_number, entry);
        self.last_event_number = self.last_event_number.max(event_number);
    }

    /// Removes an entry if it still points at `prepare_position`.
    ///
    /// The last event is never removed. Returns whether an entry was removed.
    pub(crate) fn remove(&mut self, event_number: i64, prepare_position: u64) -> bool {
        if event_number == self.last_event_number {
            return false;
        }
        match self.entries.get(&event_number) {
            Some(entry) if entry.prepare_position == prepare_position => {
                self.entries.remove(&event_number);
                true
            }
            _ => false,
        }
    }
}

/// A point-in-time copy of the stream index.
///
/// Histories are shared with the live index until either side changes.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    streams: HashMap<String, Arc<StreamHistory>>,
}

impl IndexSnapshot {
    pub(crate) fn new(streams: HashMap<String, Arc<StreamHistory>>) -> Self {
        Self { streams }
    }

    /// Returns a stream's history.
    #[must_use]
    pub fn stream(&self, stream_id: &str) -> Option<&StreamHistory> {
        self.streams.get(stream_id).map(Arc::as_ref)
    }

    /// Returns a stream's last event number, -1 if unknown.
    #[must_use]
    pub fn last_event_number(&self, stream_id: &str) -> i64 {
        self.stream(stream_id)
            .map_or(NO_EVENT_NUMBER, StreamHistory::last_event_number)
    }

    /// Checks whether an event is indexed.
    #[must_use]
    pub fn contains(&self, stream_id: &str, event_number: i64) -> bool {
        self.stream(stream_id)
            .is_some_and(|history| history.contains(event_number))
    }

    /// Returns the number of known streams.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Iterates every stream's history, in no particular order.
    pub fn histories(&self) -> impl Iterator<Item = (&str, &StreamHistory)> + '_ {
        self.streams
            .iter()
            .map(|(id, history)| (id.as_str(), history.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(p: u64) -> IndexEntry {
        IndexEntry {
            prepare_position: p,
            commit_position: p + 1,
        }
    }

    fn history(numbers: &[i64]) -> StreamHistory {
        let mut history = StreamHistory::default();
        for &n in numbers {
            history.insert(n, entry(n as u64 * 10));
        }
        history
    }

    #[test]
    fn ranges_skip_gaps() {
        let history = history(&[0, 1, 4, 7]);
        let forward: Vec<_> = history.forward_from(2).map(|(n, _)| n).collect();
        assert_eq!(forward, vec![4, 7]);
        let backward: Vec<_> = history.backward_from(5).map(|(n, _)| n).collect();
        assert_eq!(backward, vec![4, 1, 0]);
        assert_eq!(history.last_event_number(), 7);
    }

    #[test]
    fn last_event_is_never_removed() {
        let mut history = history(&[0, 1, 2]);
        assert!(!history.remove(2, 20));
        assert!(history.contains(2));
        assert!(history.remove(1, 10));
        assert!(!history.contains(1));
        assert_eq!(history.last_event_number(), 2);
    }

    #[test]
    fn remove_checks_prepare_position() {
        let mut history = history(&[0, 1]);
        assert!(!history.remove(0, 999));
        assert!(history.contains(0));
    }

    #[test]
    fn snapshot_is_isolated_from_later_changes() {
        let mut streams = HashMap::new();
        streams.insert("s".to_string(), Arc::new(history(&[0, 1])));
        let snapshot = IndexSnapshot::new(streams.clone());

        if let Some(live) = streams.get_mut("s") {
            Arc::make_mut(live).insert(2, entry(20));
        }
        assert_eq!(snapshot.last_event_number("s"), 1);
        assert!(!snapshot.contains("s", 2));
        assert_eq!(snapshot.last_event_number("missing"), -1);
    }
}
