//! Cancellation, progress and background runs.

use crate::error::{CoreError, CoreResult};
use crate::scavenge::scavenger::ScavengeResult;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Cooperative cancellation flag, checked between records and chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Checks whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

const NO_CHUNK: u64 = u64::MAX;

/// Live counters of a scavenge pass.
#[derive(Debug)]
pub struct ScavengeProgress {
    chunks_total: AtomicU64,
    chunks_done: AtomicU64,
    chunks_rewritten: AtomicU64,
    records_discarded: AtomicU64,
    current_chunk: AtomicU64,
}

impl Default for ScavengeProgress {
    fn default() -> Self {
        Self {
            chunks_total: AtomicU64::new(0),
            chunks_done: AtomicU64::new(0),
            chunks_rewritten: AtomicU64::new(0),
            records_discarded: AtomicU64::new(0),
            current_chunk: AtomicU64::new(NO_CHUNK),
        }
    }
}

impl ScavengeProgress {
    /// Creates zeroed progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn start(&self, chunks_total: usize) {
        self.chunks_total
            .store(chunks_total as u64, Ordering::Relaxed);
    }

    pub(crate) fn enter_chunk(&self, number: u32) {
        self.current_chunk
            .store(u64::from(number), Ordering::Relaxed);
    }

    pub(crate) fn finish_chunk(&self, rewritten: bool, records_discarded: u64) {
        self.chunks_done.fetch_add(1, Ordering::Relaxed);
        if rewritten {
            self.chunks_rewritten.fetch_add(1, Ordering::Relaxed);
        }
        self.records_discarded
            .fetch_add(records_discarded, Ordering::Relaxed);
        self.current_chunk.store(NO_CHUNK, Ordering::Relaxed);
    }

    /// Returns the current counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let current = self.current_chunk.load(Ordering::Relaxed);
        ProgressSnapshot {
            chunks_total: self.chunks_total.load(Ordering::Relaxed),
            chunks_done: self.chunks_done.load(Ordering::Relaxed),
            chunks_rewritten: self.chunks_rewritten.load(Ordering::Relaxed),
            records_discarded: self.records_discarded.load(Ordering::Relaxed),
            current_chunk: u32::try_from(current).ok(),
        }
    }
}

/// A point-in-time view of [`ScavengeProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    /// Sealed chunks in the pass.
    pub chunks_total: u64,
    /// Chunks finished so far.
    pub chunks_done: u64,
    /// Chunks replaced so far.
    pub chunks_rewritten: u64,
    /// Records dropped so far.
    pub records_discarded: u64,
    /// Chunk being processed, if any.
    pub current_chunk: Option<u32>,
}

/// A scavenge running on its own thread.
#[derive(Debug)]
pub struct ScavengeHandle {
    thread: JoinHandle<CoreResult<ScavengeResult>>,
    cancel: CancelToken,
    progress: Arc<ScavengeProgress>,
}

impl ScavengeHandle {
    pub(crate) fn new(
        thread: JoinHandle<CoreResult<ScavengeResult>>,
        cancel: CancelToken,
        progress: Arc<ScavengeProgress>,
    ) -> Self {
        Self {
            thread,
            cancel,
            progress,
        }
    }

    /// Requests the pass to stop at the next record or chunk boundary.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Returns the pass's progress so far.
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Checks whether the pass has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks until the pass ends.
    ///
    /// # Errors
    ///
    /// Returns the pass's error, `ScavengeAborted` after [`Self::abort`].
    pub fn wait(self) -> CoreResult<ScavengeResult> {
        self.thread
            .join()
            .map_err(|_| CoreError::invalid_operation("scavenge thread panicked"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn progress_tracks_chunks() {
        let progress = ScavengeProgress::new();
        progress.start(3);
        progress.enter_chunk(0);
        assert_eq!(progress.snapshot().current_chunk, Some(0));
        progress.finish_chunk(true, 4);
        progress.enter_chunk(1);
        progress.finish_chunk(false, 0);

        let snap = progress.snapshot();
        assert_eq!(snap.chunks_total, 3);
        assert_eq!(snap.chunks_done, 2);
        assert_eq!(snap.chunks_rewritten, 1);
        assert_eq!(snap.records_discarded, 4);
        assert_eq!(snap.current_chunk, None);
    }
}
