//! Store configuration.

/// Smallest accepted chunk size. Anything below cannot hold a useful record.
pub const MIN_CHUNK_SIZE: u64 = 4 * 1024;

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the store already exists.
    pub error_if_exists: bool,

    /// Maximum number of record bytes in one chunk before rolling over.
    pub chunk_size: u64,

    /// Whether to fsync chunk data on every append (safer but slower).
    pub sync_on_append: bool,

    /// Chunk format version to use for new chunks.
    pub format_version: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            chunk_size: 256 * 1024 * 1024, // 256 MB
            sync_on_append: true,
            format_version: 1,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if the store exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the chunk data size.
    #[must_use]
    pub const fn chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets whether to sync chunk data on every append.
    #[must_use]
    pub const fn sync_on_append(mut self, value: bool) -> Self {
        self.sync_on_append = value;
        self
    }

    /// Checks the configuration for values the store cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the chunk size is below [`MIN_CHUNK_SIZE`]
    /// or does not fit a chunk's 32-bit local offsets.
    pub fn validate(&self) -> crate::CoreResult<()> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(crate::CoreError::invalid_argument(format!(
                "chunk size {} is below the minimum of {MIN_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        if self.chunk_size > u64::from(u32::MAX) {
            return Err(crate::CoreError::invalid_argument(format!(
                "chunk size {} exceeds {}",
                self.chunk_size,
                u32::MAX
            )));
        }
        Ok(())
    }
}
