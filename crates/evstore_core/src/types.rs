//! Core type definitions for EvStore.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Event number sentinel: "not yet assigned" on a prepare, "last event" on
/// reads, "no stream" as a stream's last event number.
pub const NO_EVENT_NUMBER: i64 = -1;

/// Event type written for link events.
pub const LINK_EVENT_TYPE: &str = "$>";

/// A logical read position in the global log.
///
/// A committed event spans two physical positions: its prepare and the
/// commit that made it visible. Ordering is lexicographic with the commit
/// position first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TFPos {
    /// Position of the commit record.
    pub commit_position: u64,
    /// Position of the prepare record.
    pub prepare_position: u64,
}

impl TFPos {
    /// The start of the log.
    pub const START: Self = Self::new(0, 0);

    /// Creates a new position pair.
    #[must_use]
    pub const fn new(commit_position: u64, prepare_position: u64) -> Self {
        Self {
            commit_position,
            prepare_position,
        }
    }

    /// A position at the head of a log whose writer checkpoint is `checkpoint`.
    #[must_use]
    pub const fn head(checkpoint: u64) -> Self {
        Self::new(checkpoint, checkpoint)
    }
}

impl fmt::Display for TFPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C:{}/P:{}", self.commit_position, self.prepare_position)
    }
}

/// Optimistic concurrency expectation for an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append regardless of the stream's state.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream must exist.
    StreamExists,
    /// The stream's last event number must equal this value.
    Exact(i64),
}

impl ExpectedVersion {
    /// Checks the expectation against a stream's last event number.
    #[must_use]
    pub fn matches(self, last_event_number: i64) -> bool {
        match self {
            Self::Any => true,
            Self::NoStream => last_event_number == NO_EVENT_NUMBER,
            Self::StreamExists => last_event_number > NO_EVENT_NUMBER,
            Self::Exact(n) => last_event_number == n,
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::NoStream => f.write_str("no stream"),
            Self::StreamExists => f.write_str("stream exists"),
            Self::Exact(n) => write!(f, "{n}"),
        }
    }
}

/// Current wall-clock time as unix milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tfpos_orders_by_commit_first() {
        let a = TFPos::new(10, 50);
        let b = TFPos::new(20, 0);
        assert!(a < b);
        assert!(TFPos::new(10, 5) < TFPos::new(10, 6));
        assert_eq!(TFPos::head(7), TFPos::new(7, 7));
    }

    #[test]
    fn expected_version_matching() {
        assert!(ExpectedVersion::Any.matches(-1));
        assert!(ExpectedVersion::Any.matches(9));
        assert!(ExpectedVersion::NoStream.matches(-1));
        assert!(!ExpectedVersion::NoStream.matches(0));
        assert!(ExpectedVersion::StreamExists.matches(0));
        assert!(!ExpectedVersion::StreamExists.matches(-1));
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(3).matches(4));
    }

    #[test]
    fn display() {
        assert_eq!(TFPos::new(1, 2).to_string(), "C:1/P:2");
        assert_eq!(ExpectedVersion::Exact(4).to_string(), "4");
        assert_eq!(ExpectedVersion::NoStream.to_string(), "no stream");
    }
}
