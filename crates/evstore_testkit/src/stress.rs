//! Stress tests for EvStore.
//!
//! These verify behavior under concurrent appends, reads and scavenge.

use evstore_core::{CoreError, Database, ExpectedVersion, NewEvent, ReadEventResult, TFPos};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Appends per writer thread.
    pub operations: usize,
    /// Number of writer threads, one stream each.
    pub threads: usize,
    /// Size of event data in bytes.
    pub event_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            event_size: 64,
        }
    }
}

fn stream_name(thread: usize) -> String {
    format!("stress-{thread}")
}

/// Appends from one thread, expecting each version in turn.
pub fn stress_sequential_appends(db: &Database, config: &StressConfig) -> StressTestResult {
    let data = vec![0xABu8; config.event_size];
    let stream = stream_name(0);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let expected = ExpectedVersion::Exact(i as i64 - 1);
        match db.append(&stream, expected, vec![NewEvent::new("Stress", data.clone())]) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Appends from `threads` writers while as many readers page through the
/// all-log and read back their writer's events.
///
/// A reader counts a failure when an event it saw acknowledged is missing
/// or when the all-log goes backwards.
pub fn stress_concurrent_appends_and_reads(
    db: &Database,
    config: &StressConfig,
) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let successful = &successful;
            let failed = &failed;
            scope.spawn(move || {
                let stream = stream_name(t);
                let data = vec![t as u8; config.event_size];
                for _ in 0..config.operations {
                    match db.append(&stream, ExpectedVersion::Any, vec![NewEvent::new("Stress", data.clone())]) {
                        Ok(result) => {
                            let read = db.read_event(&stream, result.last_event_number);
                            if matches!(read, Ok(ReadEventResult::Success(_))) {
                                successful.fetch_add(1, Ordering::Relaxed);
                            } else {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });

            scope.spawn(move || {
                let mut last = TFPos::START;
                let mut from = TFPos::START;
                for _ in 0..config.operations / 10 + 1 {
                    match db.read_all_forward(from, 50) {
                        Ok(slice) => {
                            for (pos, _) in &slice.events {
                                if *pos < last {
                                    failed.fetch_add(1, Ordering::Relaxed);
                                }
                                last = *pos;
                            }
                            from = slice.next_pos;
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Appends concurrently while scavenge passes run in the background.
///
/// Every append must succeed and every stream must keep its last event.
/// A scavenge that finds nothing sealed yet is fine.
pub fn stress_appends_during_scavenge(db: &Database, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let successful = &successful;
            let failed = &failed;
            scope.spawn(move || {
                let stream = stream_name(t);
                let data = vec![t as u8; config.event_size];
                for i in 0..config.operations {
                    let result = db.append(
                        &stream,
                        ExpectedVersion::Any,
                        vec![NewEvent::new("Stress", data.clone())],
                    );
                    if result.is_ok() {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                    if i % 97 == 96 {
                        match db.complete_chunk() {
                            Ok(_) | Err(CoreError::InvalidOperation { .. }) => {}
                            Err(_) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
            });
        }

        scope.spawn(|| {
            for _ in 0..3 {
                match db.start_scavenge().and_then(|handle| handle.wait()) {
                    Ok(_) => {
                        successful.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        });
    });

    for t in 0..config.threads {
        let stream = stream_name(t);
        let last = db.stream_info(&stream).map_or(-1, |info| info.last_event_number);
        if !matches!(db.read_event(&stream, last), Ok(ReadEventResult::Success(_))) {
            failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;

    fn small() -> StressConfig {
        StressConfig {
            operations: 200,
            threads: 3,
            event_size: 48,
        }
    }

    #[test]
    fn sequential_appends_all_succeed() {
        let store = TestStore::memory();
        let result = stress_sequential_appends(&store, &small());
        assert_eq!(result.failed_ops, 0);
        assert_eq!(store.stream_info("stress-0").unwrap().last_event_number, 199);
    }

    #[test]
    fn concurrent_appends_and_reads() {
        let store = TestStore::memory();
        let config = small();
        let result = stress_concurrent_appends_and_reads(&store, &config);
        assert_eq!(result.failed_ops, 0);
        for t in 0..config.threads {
            let info = store.stream_info(&stream_name(t)).unwrap();
            assert_eq!(info.event_count, config.operations);
        }
    }

    #[test]
    fn appends_during_scavenge() {
        let store = TestStore::memory();
        let config = small();
        let result = stress_appends_during_scavenge(&store, &config);
        assert_eq!(result.failed_ops, 0);
        for t in 0..config.threads {
            let info = store.stream_info(&stream_name(t)).unwrap();
            assert_eq!(info.last_event_number, config.operations as i64 - 1);
        }
    }
}
