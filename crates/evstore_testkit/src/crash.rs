//! Crash recovery testing for EvStore.
//!
//! A crash is simulated by closing a file store and then damaging its
//! files the way an interrupted process would leave them:
//!
//! 1. **Torn tail** - garbage bytes past the last durable record
//! 2. **Unacknowledged record** - a complete record written past the
//!    writer checkpoint, whose append never returned
//! 3. **Interrupted scavenge** - a half-built `.tmp` chunk left behind
//!
//! ## Usage
//!
//! ```rust,ignore
//! use evstore_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::with_temp_dir()?;
//! let results = harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use evstore_core::dir::{parse_chunk_file_name, temp_chunk_file_name};
use evstore_core::{
    now_millis, CoreError, Database, ExpectedVersion, LogRecord, NewEvent, PrepareFlags,
    PrepareRecord, ReadEventResult,
};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Ways a crash can damage a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash in the middle of writing a record.
    TornTail,
    /// Crash after writing a record but before advancing the checkpoint.
    UnacknowledgedRecord,
    /// Crash while scavenge builds a replacement chunk.
    InterruptedScavenge,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// What was tested.
    pub description: String,
    /// Events expected after recovery.
    pub expected_events: usize,
    /// Events found after recovery.
    pub actual_events: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, events: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_events: events,
            actual_events: events,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_events: expected,
            actual_events: actual,
            error: Some(error.to_string()),
        }
    }
}

/// Returns the path of the open chunk, the highest-numbered chunk file.
///
/// # Errors
///
/// Returns `NotFound` if the directory holds no chunk file.
pub fn open_chunk_file(store: &Path) -> io::Result<PathBuf> {
    let mut best: Option<((u32, u32), PathBuf)> = None;
    for entry in fs::read_dir(store)? {
        let entry = entry?;
        let Some(key) = parse_chunk_file_name(&entry.file_name().to_string_lossy()) else {
            continue;
        };
        if best.as_ref().map_or(true, |(k, _)| key > *k) {
            best = Some((key, entry.path()));
        }
    }
    best.map(|(_, path)| path)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no chunk files"))
}

/// Appends raw bytes to the open chunk of a closed store.
///
/// # Errors
///
/// Returns an I/O error.
pub fn append_torn_bytes(store: &Path, bytes: &[u8]) -> io::Result<()> {
    let path = open_chunk_file(store)?;
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Builds a single-event prepare at `position` that no commit follows.
pub fn unacknowledged_prepare(position: u64, stream_id: &str) -> LogRecord {
    LogRecord::Prepare(PrepareRecord {
        position,
        transaction_position: position,
        transaction_offset: 0,
        flags: PrepareFlags::SINGLE_WRITE,
        stream_id: stream_id.to_string(),
        event_number: -1,
        event_id: Uuid::new_v4(),
        event_type: "Lost".to_string(),
        data: b"never acknowledged".to_vec(),
        metadata: Vec::new(),
        timestamp: now_millis(),
    })
}

/// Appends a complete encoded record to the open chunk of a closed store
/// without moving its checkpoint.
///
/// `record` should carry the store's writer checkpoint as its position.
///
/// # Errors
///
/// Returns an I/O error, or `InvalidData` if the record cannot be encoded.
pub fn append_unacknowledged_record(store: &Path, record: &LogRecord) -> io::Result<()> {
    let bytes = record
        .encode()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    append_torn_bytes(store, &bytes)
}

/// Leaves a partial replacement file for `chunk`, as a scavenge killed
/// mid-rewrite would. Returns its path.
///
/// # Errors
///
/// Returns an I/O error.
pub fn leave_scavenge_temp_file(store: &Path, chunk: u32, version: u32) -> io::Result<PathBuf> {
    let path = store.join(temp_chunk_file_name(chunk, version));
    fs::write(&path, [0xEE; 64])?;
    Ok(path)
}

/// Returns the `.tmp` files in a store directory.
///
/// # Errors
///
/// Returns an I/O error.
pub fn temp_files(store: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(store)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            found.push(path);
        }
    }
    Ok(found)
}

/// Harness running crash recovery tests in one directory.
pub struct CrashRecoveryHarness {
    store_path: PathBuf,
    _temp_dir: Option<tempfile::TempDir>,
    results: Vec<CrashRecoveryResult>,
}

const STREAM: &str = "crash-test";
const EVENTS: usize = 10;

impl CrashRecoveryHarness {
    /// Creates a harness over a store directory.
    pub fn new(store_path: impl AsRef<Path>) -> Self {
        Self {
            store_path: store_path.as_ref().to_path_buf(),
            _temp_dir: None,
            results: Vec::new(),
        }
    }

    /// Creates a harness over a fresh temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn with_temp_dir() -> io::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        Ok(Self {
            store_path: temp_dir.path().join("store"),
            _temp_dir: Some(temp_dir),
            results: Vec::new(),
        })
    }

    fn open_fresh(&self) -> Result<Database, CoreError> {
        if self.store_path.exists() {
            fs::remove_dir_all(&self.store_path)?;
        }
        Database::open(&self.store_path)
    }

    /// Writes `EVENTS` events, crashes at `point`, reopens and checks that
    /// exactly the acknowledged events are visible.
    pub fn test_crash(&mut self, point: CrashPoint) -> CrashRecoveryResult {
        let description = format!("{point:?} recovers acknowledged events");
        let result = self
            .crash_and_count(point)
            .map(|found| {
                if found == EVENTS {
                    CrashRecoveryResult::pass(&description, EVENTS)
                } else {
                    CrashRecoveryResult::fail(
                        &description,
                        EVENTS,
                        found,
                        "acknowledged events differ after recovery",
                    )
                }
            })
            .unwrap_or_else(|e| CrashRecoveryResult::fail(&description, EVENTS, 0, &e.to_string()));
        self.results.push(result.clone());
        result
    }

    fn crash_and_count(&self, point: CrashPoint) -> Result<usize, CoreError> {
        let db = self.open_fresh()?;
        for i in 0..EVENTS {
            db.append(
                STREAM,
                ExpectedVersion::Any,
                vec![NewEvent::new("Written", vec![i as u8; 32])],
            )?;
        }
        let checkpoint = db.writer_checkpoint();
        db.complete_chunk()?;
        db.close()?;
        drop(db);

        match point {
            CrashPoint::TornTail => append_torn_bytes(&self.store_path, &[0xAB; 37])?,
            CrashPoint::UnacknowledgedRecord => {
                // the sealed chunk ends at the old checkpoint and the new open
                // chunk is empty, so the next record would start there
                let record = unacknowledged_prepare(checkpoint, STREAM);
                append_unacknowledged_record(&self.store_path, &record)?;
            }
            CrashPoint::InterruptedScavenge => {
                leave_scavenge_temp_file(&self.store_path, 0, 1)?;
            }
        }

        let db = Database::open(&self.store_path)?;
        if !temp_files(&self.store_path)?.is_empty() {
            return Err(CoreError::invalid_operation("leftover .tmp file after open"));
        }
        let mut found = 0;
        for n in 0..=EVENTS as i64 {
            if let ReadEventResult::Success(_) = db.read_event(STREAM, n)? {
                found += 1;
            }
        }
        db.close()?;
        Ok(found)
    }

    /// Runs every crash test.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        [
            CrashPoint::TornTail,
            CrashPoint::UnacknowledgedRecord,
            CrashPoint::InterruptedScavenge,
        ]
        .into_iter()
        .map(|point| self.test_crash(point))
        .collect()
    }

    /// Returns a summary of the results so far.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut out = format!("{passed}/{} crash tests passed\n", self.results.len());
        for r in self.results.iter().filter(|r| !r.passed) {
            out.push_str(&format!(
                "  FAILED {}: expected {}, found {} ({})\n",
                r.description,
                r.expected_events,
                r.actual_events,
                r.error.as_deref().unwrap_or("")
            ));
        }
        out
    }

    /// Checks whether every test so far passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_crash_points_recover() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        harness.run_all_tests();
        assert!(harness.all_passed(), "{}", harness.summary());
    }

    #[test]
    fn open_chunk_is_highest_number() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.append(STREAM, ExpectedVersion::Any, vec![NewEvent::new("x", vec![1])])
            .unwrap();
        db.complete_chunk().unwrap();
        db.close().unwrap();
        drop(db);

        let path = open_chunk_file(dir.path()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "chunk-000001.000000"
        );
    }
}
