//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for SiloDB.
///
/// Storage backends are **opaque byte stores**. They provide simple operations
/// for reading, appending, and flushing data. SiloDB owns all file format
/// interpretation - backends do not understand blocks, shards, or indexes.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `sync` ensures all appended data is durable
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The offset is beyond the current size
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes all pending writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush` - after this returns
    /// successfully, all previously appended data survives process
    /// termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops and re-acquires the underlying handle at the same location.
    ///
    /// Closing the handle forces the operating system to complete any
    /// buffered writes before the storage is used again. A no-op for
    /// backends without an OS handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle cannot be reopened.
    fn reopen(&mut self) -> StorageResult<()>;

    /// Atomically replaces the entire contents with the given blocks.
    ///
    /// Returns the offset at which each block landed, in input order.
    /// Existing readers observe either the old contents or the new, never
    /// a mixture. Used by shard compaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement cannot be completed; the old
    /// contents remain intact in that case.
    fn rewrite(&mut self, blocks: &[Vec<u8>]) -> StorageResult<Vec<u64>>;
}
