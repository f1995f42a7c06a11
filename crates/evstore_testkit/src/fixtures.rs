//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores
//! and common test scenarios.

use evstore_core::{Config, CoreResult, Database, ExpectedVersion, NewEvent};
use std::path::Path;
use tempfile::TempDir;

/// Chunk size used by test stores: small enough that a few hundred events
/// span several chunks.
pub const TEST_CHUNK_SIZE: u64 = 8 * 1024;

/// Configuration used by test stores.
pub fn test_config() -> Config {
    Config::default()
        .chunk_size(TEST_CHUNK_SIZE)
        .sync_on_append(false)
}

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
    config: Config,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        let config = test_config();
        Self {
            db: Database::open_in_memory_with_config(config.clone())
                .expect("Failed to open in-memory store"),
            temp_dir: None,
            config,
        }
    }

    /// Creates a new file-based test store.
    pub fn file() -> Self {
        Self::file_with_config(test_config())
    }

    /// Creates a new file-based test store with custom configuration.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_with_config(temp_dir.path(), config.clone())
            .expect("Failed to open file store");
        Self {
            db,
            temp_dir: Some(temp_dir),
            config,
        }
    }

    /// Returns the store path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Closes the store and opens it again from disk.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores, which do not survive closing.
    pub fn reopen(self) -> Self {
        let Self {
            db,
            temp_dir,
            config,
        } = self;
        drop(db);
        let temp_dir = temp_dir.expect("Only file stores can be reopened");
        let db = Database::open_with_config(temp_dir.path(), config.clone())
            .expect("Failed to reopen store");
        Self {
            db,
            temp_dir: Some(temp_dir),
            config,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust,ignore
/// use evstore_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|db| {
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let store = TestStore::memory();
    f(&store.db)
}

/// Runs a test with a temporary file-based store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let store = TestStore::file();
    let path = store
        .path()
        .expect("File store should have a path")
        .to_path_buf();
    f(&store.db, &path)
}

#[derive(Debug, Clone)]
enum Step {
    Events { stream: String, count: usize },
    Link { stream: String, target_stream: String, target_number: i64 },
    CompleteChunk,
}

/// Builds a store's contents step by step.
///
/// ```rust,ignore
/// ScenarioBuilder::new()
///     .events("orders", 5)
///     .link("by-category", "orders", 2)
///     .complete_chunk()
///     .build(&db)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScenarioBuilder {
    steps: Vec<Step>,
}

impl ScenarioBuilder {
    /// Creates an empty scenario.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `count` JSON events to `stream`, one append each.
    pub fn events(mut self, stream: &str, count: usize) -> Self {
        self.steps.push(Step::Events {
            stream: stream.to_string(),
            count,
        });
        self
    }

    /// Appends a link to `target_number@target_stream` to `stream`.
    pub fn link(mut self, stream: &str, target_stream: &str, target_number: i64) -> Self {
        self.steps.push(Step::Link {
            stream: stream.to_string(),
            target_stream: target_stream.to_string(),
            target_number,
        });
        self
    }

    /// Seals the open chunk.
    pub fn complete_chunk(mut self) -> Self {
        self.steps.push(Step::CompleteChunk);
        self
    }

    /// Writes the scenario into `db`.
    ///
    /// # Errors
    ///
    /// Returns the first failing store operation.
    pub fn build(&self, db: &Database) -> CoreResult<()> {
        for step in &self.steps {
            match step {
                Step::Events { stream, count } => {
                    for _ in 0..*count {
                        let next = db
                            .stream_info(stream)
                            .map_or(0, |info| info.last_event_number + 1);
                        let data = format!(r#"{{"stream":"{stream}","n":{next}}}"#);
                        db.append(
                            stream,
                            ExpectedVersion::Any,
                            vec![NewEvent::json("TestEvent", data.into_bytes())],
                        )?;
                    }
                }
                Step::Link {
                    stream,
                    target_stream,
                    target_number,
                } => {
                    db.append(
                        stream,
                        ExpectedVersion::Any,
                        vec![NewEvent::link_to(target_stream.as_str(), *target_number)],
                    )?;
                }
                Step::CompleteChunk => {
                    db.complete_chunk()?;
                }
            }
        }
        Ok(())
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Stream holding the two links of [`link_to_stream`].
    pub const LINK_STREAM: &str = "linkTo-Stream";
    /// Stream the links point into, never written.
    pub const TARGET_STREAM: &str = "test-stream";

    /// Two links to events 11 and 12 of a stream that does not exist,
    /// sealed into the first chunk.
    pub fn link_to_stream(db: &Database) -> CoreResult<()> {
        ScenarioBuilder::new()
            .link(LINK_STREAM, TARGET_STREAM, 11)
            .link(LINK_STREAM, TARGET_STREAM, 12)
            .complete_chunk()
            .build(db)
    }

    /// Creates a store with `streams` streams of `events` events each, all
    /// in sealed chunks.
    pub fn populated_store(streams: usize, events: usize) -> TestStore {
        let store = TestStore::memory();
        let mut builder = ScenarioBuilder::new();
        for i in 0..streams {
            builder = builder.events(&format!("stream-{i}"), events);
        }
        builder
            .complete_chunk()
            .build(&store.db)
            .expect("Failed to populate store");
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = TestStore::memory();
        assert!(store.is_open());
        assert!(store.path().is_none());
    }

    #[test]
    fn test_with_temp_store() {
        with_temp_store(|db| {
            ScenarioBuilder::new().events("s", 3).build(db).unwrap();
            assert_eq!(db.stream_info("s").unwrap().last_event_number, 2);
        });
    }

    #[test]
    fn test_reopen_file_store() {
        let store = TestStore::file();
        ScenarioBuilder::new().events("s", 2).build(&store).unwrap();
        let store = store.reopen();
        assert_eq!(store.stream_info("s").unwrap().last_event_number, 1);
    }

    #[test]
    fn test_populated_scenario() {
        let store = scenarios::populated_store(3, 4);
        assert_eq!(store.streams().len(), 3);
        assert!(store.chunk_infos().unwrap()[0].sealed);
    }
}
