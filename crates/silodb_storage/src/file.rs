//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The file handle and its tracked length, guarded as one unit.
///
/// The length is authoritative for an append-only stream: every write
/// lands at `len`, so reads never have to consult file metadata and a
/// bounds check is a plain comparison.
#[derive(Debug)]
struct FileState {
    file: File,
    len: u64,
}

impl FileState {
    fn check_range(&self, offset: u64, len: usize) -> StorageResult<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.len,
            }),
        }
    }
}

/// A file-based storage backend.
///
/// This backend provides persistent storage using OS file APIs.
/// Data survives process restarts.
///
/// # Durability
///
/// - `flush()` pushes buffered writes to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
/// - `rewrite()` stages the new contents in a sibling temp file and
///   renames it over the original, so a crash mid-compaction leaves the
///   old contents intact
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads. One
/// mutex guards the handle and the length together; positional reads
/// move the cursor, so they need the same exclusivity as writes anyway.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// If the file exists, it is opened for reading and appending.
    /// If it doesn't exist, a new file is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Self::from_file(path, file)
    }

    /// Wraps a caller-supplied open file handle.
    ///
    /// The handle must be readable and writable and must refer to `path`,
    /// which is retained for `reopen` and `rewrite`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file size cannot be read.
    pub fn from_file(path: &Path, file: File) -> StorageResult<Self> {
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FileState { file, len }),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".compact");
        PathBuf::from(name)
    }

    #[cfg(unix)]
    fn sync_parent_dir(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent_dir(&self) -> StorageResult<()> {
        // NTFS journaling covers rename durability on Windows.
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.check_range(offset, len)?;

        let mut buffer = vec![0u8; len];
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut state = self.state.lock();
        let offset = state.len;

        // The tracked length, not the OS cursor, decides where the
        // stream ends.
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.len += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.state.lock().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.state.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.state.lock().file.sync_all()?;
        Ok(())
    }

    fn reopen(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.file.flush()?;

        let reopened = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;

        // Dropping the old handle closes it; the OS completes any
        // outstanding buffered writes on close.
        state.len = reopened.metadata()?.len();
        state.file = reopened;
        Ok(())
    }

    fn rewrite(&mut self, blocks: &[Vec<u8>]) -> StorageResult<Vec<u64>> {
        let temp_path = self.compact_path();

        let mut temp = File::create(&temp_path)?;
        let mut offsets = Vec::with_capacity(blocks.len());
        let mut written = 0u64;

        for block in blocks {
            offsets.push(written);
            temp.write_all(block)?;
            written += block.len() as u64;
        }

        temp.sync_all()?;
        drop(temp);

        fs::rename(&temp_path, &self.path)?;
        self.sync_parent_dir()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;

        *self.state.lock() = FileState { file, len: written };

        Ok(offsets)
    }
}
