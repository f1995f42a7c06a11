//! Writer checkpoint.
//!
//! The writer checkpoint is the position below which everything is durably
//! appended. It is owned by the single append path; readers hold a
//! [`CheckpointReader`] that only ever sees flushed values.
//!
//! ## File Format
//!
//! ```text
//! | position (8) | crc32 (4) |
//! ```
//!
//! The file is replaced with write-temp, fsync, rename.

use crate::error::{CoreError, CoreResult};
use crate::log::compute_crc32;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const CHECKPOINT_FILE_SIZE: usize = 12;

/// The durable writer position, owned by the append path.
#[derive(Debug)]
pub struct WriterCheckpoint {
    current: u64,
    flushed: Arc<AtomicU64>,
    path: Option<PathBuf>,
}

impl WriterCheckpoint {
    /// Creates a checkpoint that lives only in memory, starting at zero.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            current: 0,
            flushed: Arc::new(AtomicU64::new(0)),
            path: None,
        }
    }

    /// Opens the checkpoint stored at `path`, or starts at zero if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the file is damaged, or an I/O error.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let value = if path.exists() {
            decode(&fs::read(path)?)?
        } else {
            0
        };
        Ok(Self {
            current: value,
            flushed: Arc::new(AtomicU64::new(value)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Returns the last flushed position.
    #[must_use]
    pub fn read(&self) -> u64 {
        self.flushed.load(Ordering::Acquire)
    }

    /// Returns the advanced but not yet flushed position.
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.current
    }

    /// Moves the checkpoint forward.
    ///
    /// # Panics
    ///
    /// Panics if `position` is not greater than the current value. The
    /// append path only ever moves forward; anything else is a bug.
    pub fn advance(&mut self, position: u64) {
        assert!(
            position > self.current,
            "writer checkpoint must advance: {} -> {}",
            self.current,
            position
        );
        self.current = position;
    }

    /// Persists the current value and publishes it to readers.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the checkpoint file cannot be replaced. The
    /// published value is unchanged in that case.
    pub fn flush(&mut self) -> CoreResult<()> {
        if self.current == self.read() {
            return Ok(());
        }
        if let Some(path) = &self.path {
            persist(path, self.current)?;
        }
        self.flushed.store(self.current, Ordering::Release);
        Ok(())
    }

    /// Returns a read-only handle on the flushed value.
    #[must_use]
    pub fn reader(&self) -> CheckpointReader {
        CheckpointReader(Arc::clone(&self.flushed))
    }
}

/// Read-only view of the writer checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointReader(Arc<AtomicU64>);

impl CheckpointReader {
    /// Returns the last flushed writer position.
    #[must_use]
    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

fn decode(data: &[u8]) -> CoreResult<u64> {
    if data.len() != CHECKPOINT_FILE_SIZE {
        return Err(CoreError::invalid_format(format!(
            "checkpoint file has {} bytes, expected {CHECKPOINT_FILE_SIZE}",
            data.len()
        )));
    }
    let stored = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    let computed = compute_crc32(&data[..8]);
    if stored != computed {
        return Err(CoreError::invalid_format(format!(
            "checkpoint checksum mismatch: expected {stored:08x}, got {computed:08x}"
        )));
    }
    let mut value = [0u8; 8];
    value.copy_from_slice(&data[..8]);
    Ok(u64::from_le_bytes(value))
}

fn persist(path: &Path, value: u64) -> CoreResult<()> {
    let mut data = Vec::with_capacity(CHECKPOINT_FILE_SIZE);
    data.extend_from_slice(&value.to_le_bytes());
    data.extend_from_slice(&compute_crc32(&data).to_le_bytes());

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let mut file = File::create(&temp_path)?;
    file.write_all(&data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temp_path, path)?;
    sync_parent(path)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> CoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn readers_see_only_flushed_values() {
        let mut checkpoint = WriterCheckpoint::in_memory();
        let reader = checkpoint.reader();

        checkpoint.advance(100);
        assert_eq!(checkpoint.pending(), 100);
        assert_eq!(reader.read(), 0);

        checkpoint.flush().unwrap();
        assert_eq!(reader.read(), 100);
        assert_eq!(checkpoint.read(), 100);
    }

    #[test]
    #[should_panic(expected = "writer checkpoint must advance")]
    fn advancing_backwards_panics() {
        let mut checkpoint = WriterCheckpoint::in_memory();
        checkpoint.advance(50);
        checkpoint.advance(50);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("writer.chk");
        {
            let mut checkpoint = WriterCheckpoint::open(&path).unwrap();
            assert_eq!(checkpoint.read(), 0);
            checkpoint.advance(4242);
            checkpoint.flush().unwrap();
        }

        let checkpoint = WriterCheckpoint::open(&path).unwrap();
        assert_eq!(checkpoint.read(), 4242);
        assert_eq!(checkpoint.pending(), 4242);
    }

    #[test]
    fn damaged_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("writer.chk");
        {
            let mut checkpoint = WriterCheckpoint::open(&path).unwrap();
            checkpoint.advance(7);
            checkpoint.flush().unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0x01;
        fs::write(&path, bytes).unwrap();

        let result = WriterCheckpoint::open(&path);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
    }
}
