//! Store directory management.
//!
//! This module handles the file system layout for a store:
//!
//! ```text
//! <destination>/
//! ├─ LOCK              # Advisory lock for single-process embedding
//! ├─ map.index         # Round-robin counter + destination path
//! ├─ shard_0.gobs      # Append-only block files, one per shard
//! ├─ shard_0.idx       # Index snapshot sidecars, one per shard
//! └─ ...
//! ```
//!
//! The LOCK file ensures only one process embeds a given store at a time.
//! `map.index` is a two-line text file: line 1 is the decimal round-robin
//! counter, line 2 the destination path (informational).

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const MAP_INDEX_FILE: &str = "map.index";
/// Temporary file for atomic map.index writes.
const MAP_INDEX_TEMP: &str = "map.index.tmp";

/// Manages the store directory structure and file locking.
///
/// Holds an exclusive advisory lock for its whole lifetime; only one
/// `StoreDir` instance can exist per directory at a time.
#[derive(Debug)]
pub struct StoreDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `StoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_argument(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_argument(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to a shard's block file.
    #[must_use]
    pub fn shard_file_path(&self, shard_id: usize) -> PathBuf {
        self.path.join(format!("shard_{shard_id}.gobs"))
    }

    /// Returns the path to a shard's index snapshot sidecar.
    #[must_use]
    pub fn shard_index_path(&self, shard_id: usize) -> PathBuf {
        self.path.join(format!("shard_{shard_id}.idx"))
    }

    /// Returns the path to the `map.index` file.
    #[must_use]
    pub fn map_index_path(&self) -> PathBuf {
        self.path.join(MAP_INDEX_FILE)
    }

    /// Reads the round-robin counter from `map.index`.
    ///
    /// Returns `None` when the file doesn't exist (new store). An
    /// unparsable file is fatal: silently restarting the counter would
    /// skew round-robin placement for the whole session.
    pub fn load_counter(&self) -> CoreResult<Option<u64>> {
        let path = self.map_index_path();

        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)?;
        let first_line = contents.lines().next().unwrap_or("");

        let counter = first_line.trim().parse::<u64>().map_err(|_| {
            CoreError::index_corruption(format!(
                "map.index has no counter on line 1: {first_line:?}"
            ))
        })?;

        Ok(Some(counter))
    }

    /// Writes `map.index` atomically: counter, newline, destination path.
    ///
    /// Uses write-then-rename so concurrent syncs are last-writer-wins
    /// and a crash never leaves a half-written file.
    pub fn save_counter(&self, counter: u64) -> CoreResult<()> {
        let temp_path = self.path.join(MAP_INDEX_TEMP);

        let mut file = File::create(&temp_path)?;
        write!(file, "{counter}\n{}", self.path.display())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.map_index_path())?;
        self.sync_directory()?;

        Ok(())
    }

    /// Reads a shard's index snapshot sidecar.
    ///
    /// Returns `None` when the sidecar doesn't exist.
    pub fn load_shard_snapshot(&self, shard_id: usize) -> CoreResult<Option<Vec<u8>>> {
        let path = self.shard_index_path(shard_id);

        if !path.exists() {
            return Ok(None);
        }

        Ok(Some(fs::read(&path)?))
    }

    /// Writes a shard's index snapshot sidecar atomically.
    pub fn save_shard_snapshot(&self, shard_id: usize, data: &[u8]) -> CoreResult<()> {
        let path = self.shard_index_path(shard_id);
        let mut temp_path = path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        self.sync_directory()?;

        Ok(())
    }

    /// Syncs the store directory so metadata updates are durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        // On Unix, fsync on a directory syncs the directory entries.
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        // NTFS journaling provides metadata durability on Windows.
        Ok(())
    }
}
