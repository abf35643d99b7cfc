//! Store configuration.

use std::path::PathBuf;

/// Canonical number of shards.
///
/// The shard count must match the value used when the data directory was
/// last written; persisted keys are only routable under the same count.
pub const DEFAULT_SHARD_COUNT: usize = 32;

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Filesystem path to the data directory.
    pub destination: PathBuf,

    /// Number of shards. Fixed for the lifetime of the data directory.
    pub shard_count: usize,

    /// Whether to create the data directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Config {
    /// Creates a configuration for the given data directory with default
    /// values.
    #[must_use]
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            shard_count: DEFAULT_SHARD_COUNT,
            create_if_missing: true,
        }
    }

    /// Sets the shard count.
    #[must_use]
    pub fn shard_count(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }

    /// Sets whether to create the data directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}
