//! Logical read results.

use crate::log::{CommitRecord, PrepareFlags, PrepareRecord};
use crate::types::TFPos;
use uuid::Uuid;

/// A committed event as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Stream the event belongs to.
    pub stream_id: String,
    /// Event number within the stream.
    pub event_number: i64,
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event type.
    pub event_type: String,
    /// Event payload.
    pub data: Vec<u8>,
    /// Event metadata.
    pub metadata: Vec<u8>,
    /// Prepare flags.
    pub flags: PrepareFlags,
    /// Creation time, unix milliseconds.
    pub timestamp: i64,
    /// Position of the prepare record.
    pub log_position: u64,
    /// Position of the commit that made the event visible.
    pub commit_position: u64,
}

impl EventRecord {
    /// Builds the logical event for a prepare committed by `commit`.
    #[must_use]
    pub fn from_committed(prepare: PrepareRecord, commit: &CommitRecord) -> Self {
        let event_number = prepare.event_number_under(commit);
        Self::from_prepare(prepare, event_number, commit.position)
    }

    /// Builds the logical event for a prepare with a known number and
    /// commit position.
    #[must_use]
    pub fn from_prepare(prepare: PrepareRecord, event_number: i64, commit_position: u64) -> Self {
        Self {
            stream_id: prepare.stream_id,
            event_number,
            event_id: prepare.event_id,
            event_type: prepare.event_type,
            data: prepare.data,
            metadata: prepare.metadata,
            flags: prepare.flags,
            timestamp: prepare.timestamp,
            log_position: prepare.position,
            commit_position,
        }
    }

    /// Checks whether this event is a link to another event.
    #[must_use]
    pub fn is_link(&self) -> bool {
        self.flags.is_link_to()
    }

    /// Returns the event's position in the all-log order.
    #[must_use]
    pub fn tf_pos(&self) -> TFPos {
        TFPos::new(self.commit_position, self.log_position)
    }
}

/// Result of a point read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEventResult {
    /// The event exists.
    Success(EventRecord),
    /// The event never existed, was scavenged, or the stream is unknown.
    NotFound,
}

impl ReadEventResult {
    /// Returns the event if found.
    #[must_use]
    pub fn event(&self) -> Option<&EventRecord> {
        match self {
            Self::Success(event) => Some(event),
            Self::NotFound => None,
        }
    }

    /// Consumes the result, returning the event if found.
    #[must_use]
    pub fn into_event(self) -> Option<EventRecord> {
        match self {
            Self::Success(event) => Some(event),
            Self::NotFound => None,
        }
    }

    /// Checks whether the event was found.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Whether a stream read found the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStatus {
    /// The stream exists.
    Success,
    /// The stream was never written.
    NoStream,
}

/// A page of a stream read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSlice {
    /// Stream read.
    pub stream_id: String,
    /// Whether the stream exists.
    pub status: SliceStatus,
    /// Events in read order.
    pub events: Vec<EventRecord>,
    /// Event number to pass to continue reading in the same direction.
    pub next_event_number: i64,
    /// The stream's last event number, -1 if it does not exist.
    pub last_event_number: i64,
    /// Whether no more events lie in the read direction.
    pub is_end_of_stream: bool,
}

/// A page of an all-log read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllSlice {
    /// Events in read order, with their all-log positions.
    pub events: Vec<(TFPos, EventRecord)>,
    /// Position to pass to continue reading in the same direction.
    pub next_pos: TFPos,
    /// Whether the read reached the end of the log in its direction.
    pub is_end: bool,
}

/// Summary of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream id.
    pub stream_id: String,
    /// Last event number ever committed.
    pub last_event_number: i64,
    /// Number of events still indexed.
    pub event_count: usize,
}
