//! Store statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! use evstore_core::{Database, ExpectedVersion, NewEvent};
//!
//! let db = Database::open_in_memory()?;
//! db.append("orders", ExpectedVersion::Any, vec![NewEvent::json("Placed", b"{}".to_vec())])?;
//!
//! let stats = db.stats();
//! println!("Appends: {}", stats.appends);
//! println!("Events written: {}", stats.events_written);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Store statistics.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct StoreStats {
    // Append path
    /// Appended batches.
    appends: AtomicU64,
    /// Events written through the append surface.
    events_written: AtomicU64,
    /// Record bytes written to the log.
    bytes_written: AtomicU64,
    /// Appends rejected by the expected-version check.
    version_conflicts: AtomicU64,

    // Read path
    /// Point and range reads.
    reads: AtomicU64,

    // Scavenge
    /// Completed scavenge passes.
    scavenges: AtomicU64,
    /// Chunks rewritten by scavenge.
    chunks_rewritten: AtomicU64,
    /// Records dropped by scavenge.
    records_discarded: AtomicU64,
    /// Bytes reclaimed by scavenge.
    bytes_reclaimed: AtomicU64,

    /// Errors returned to callers.
    errors: AtomicU64,
}

impl StoreStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_append(&self, events: u64, bytes: u64) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.events_written.fetch_add(events, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_version_conflict(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scavenge(&self, chunks_rewritten: u64, records: u64, bytes: u64) {
        self.scavenges.fetch_add(1, Ordering::Relaxed);
        self.chunks_rewritten
            .fetch_add(chunks_rewritten, Ordering::Relaxed);
        self.records_discarded.fetch_add(records, Ordering::Relaxed);
        self.bytes_reclaimed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of appended batches.
    pub fn appends(&self) -> u64 {
        self.appends.load(Ordering::Relaxed)
    }

    /// Returns the number of events written.
    pub fn events_written(&self) -> u64 {
        self.events_written.load(Ordering::Relaxed)
    }

    /// Returns the number of reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of completed scavenge passes.
    pub fn scavenges(&self) -> u64 {
        self.scavenges.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            appends: self.appends(),
            events_written: self.events_written(),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            version_conflicts: self.version_conflicts.load(Ordering::Relaxed),
            reads: self.reads(),
            scavenges: self.scavenges(),
            chunks_rewritten: self.chunks_rewritten.load(Ordering::Relaxed),
            records_discarded: self.records_discarded.load(Ordering::Relaxed),
            bytes_reclaimed: self.bytes_reclaimed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of store statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Appended batches.
    pub appends: u64,
    /// Events written.
    pub events_written: u64,
    /// Record bytes written.
    pub bytes_written: u64,
    /// Appends rejected by the expected-version check.
    pub version_conflicts: u64,
    /// Reads served.
    pub reads: u64,
    /// Completed scavenge passes.
    pub scavenges: u64,
    /// Chunks rewritten by scavenge.
    pub chunks_rewritten: u64,
    /// Records dropped by scavenge.
    pub records_discarded: u64,
    /// Bytes reclaimed by scavenge.
    pub bytes_reclaimed: u64,
    /// Errors returned to callers.
    pub errors: u64,
}
