//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::ops::Range;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Ephemeral stores that don't need persistence
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use silodb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Mutex<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Resolves a read request to an in-bounds byte range, if there is
    /// one.
    fn resolve_range(offset: u64, len: usize, size: usize) -> Option<Range<usize>> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(len)?;
        (end <= size).then_some(start..end)
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.lock();

        match Self::resolve_range(offset, len, data.len()) {
            Some(range) => Ok(data[range].to_vec()),
            None => Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: data.len() as u64,
            }),
        }
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.lock();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.lock().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn reopen(&mut self) -> StorageResult<()> {
        // No OS handle to cycle.
        Ok(())
    }

    fn rewrite(&mut self, blocks: &[Vec<u8>]) -> StorageResult<Vec<u64>> {
        let mut data = self.data.lock();

        let mut replacement = Vec::with_capacity(blocks.iter().map(Vec::len).sum());
        let mut offsets = Vec::with_capacity(blocks.len());

        for block in blocks {
            offsets.push(replacement.len() as u64);
            replacement.extend_from_slice(block);
        }

        *data = replacement;
        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_append_and_read() {
        let mut backend = InMemoryBackend::new();

        let offset = backend.append(b"hello").unwrap();
        assert_eq!(offset, 0);

        let offset = backend.append(b" world").unwrap();
        assert_eq!(offset, 5);

        let data = backend.read_at(0, 11).unwrap();
        assert_eq!(&data, b"hello world");
    }

    #[test]
    fn memory_read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();

        let result = backend.read_at(1, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));

        let result = backend.read_at(9, 1);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn memory_read_rejects_overflowing_range() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();

        let result = backend.read_at(u64::MAX, usize::MAX);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn memory_with_data() {
        let backend = InMemoryBackend::with_data(vec![1, 2, 3]);
        assert_eq!(backend.size().unwrap(), 3);
        assert_eq!(backend.read_at(1, 2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn memory_rewrite() {
        let mut backend = InMemoryBackend::with_data(b"old contents".to_vec());

        let offsets = backend
            .rewrite(&[b"one".to_vec(), b"two".to_vec()])
            .unwrap();

        assert_eq!(offsets, vec![0, 3]);
        assert_eq!(backend.data(), b"onetwo");
    }

    #[test]
    fn memory_reopen_is_noop() {
        let mut backend = InMemoryBackend::with_data(b"kept".to_vec());
        backend.reopen().unwrap();
        assert_eq!(backend.data(), b"kept");
    }
}
