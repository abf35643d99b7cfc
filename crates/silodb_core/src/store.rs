//! The sharded map engine.
//!
//! A [`Store`] routes operations across a fixed array of shards:
//!
//! - **Inserts** go round-robin: each [`Store::set`] advances a counter
//!   (persisted by sync, restored on open) and appends to that shard.
//!   The shard owning a record is therefore not derivable from its keys;
//!   `set` returns the owning shard id for every key it installs.
//! - **Point probes** ([`Store::get`], [`Store::has`]) hash the key with
//!   FNV-1a to pick a shard. Known-shard reads take the shard id the
//!   caller remembered from `set`.
//! - **Multi-valued queries** fan out over all shards sequentially, in
//!   ascending shard order, one shard lock at a time.
//!
//! No operation holds more than one shard lock at once, so no lock
//! ordering is needed. The engine itself only owns the small counter
//! mutex.

use crate::config::Config;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::id::RecordId;
use crate::index::IndexSnapshot;
use crate::shard::{Shard, ShardOffset};
use crate::types::{id_key, shard_for_key, unique_key, IndexDescriptor};
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use silodb_codec::Block;
use silodb_storage::FileBackend;
use std::collections::HashMap;
use std::fs::File;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A sharded, append-only, indexed key/value store.
///
/// Designed for single-process embedding: the host supplies opaque
/// payloads plus index descriptors and gets raw bytes and keys back.
/// Dropping the store releases the directory lock; durability is only
/// guaranteed up to the last [`Store::sync`].
pub struct Store {
    shards: Vec<Arc<Shard>>,
    counter: Mutex<u64>,
    dir: StoreDir,
    shard_count: usize,
}

impl Store {
    /// Opens a store, creating or loading the shard files in the
    /// configured destination directory.
    ///
    /// Existing shards are restored from their index snapshot sidecars
    /// where possible and rebuilt by scanning their block files where
    /// not.
    pub fn open(config: Config) -> CoreResult<Self> {
        let dir = StoreDir::open(&config.destination, config.create_if_missing)?;

        let mut backends = Vec::with_capacity(config.shard_count);
        for shard_id in 0..config.shard_count {
            backends.push(FileBackend::open(&dir.shard_file_path(shard_id))?);
        }

        Self::open_inner(config, dir, backends)
    }

    /// Opens a store over caller-supplied open file handles, one per
    /// shard in shard order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if the handle count doesn't
    /// match the configured shard count.
    pub fn open_with_files(config: Config, files: Vec<File>) -> CoreResult<Self> {
        if files.len() != config.shard_count {
            return Err(CoreError::invalid_argument(format!(
                "expected {} preallocated files, got {}",
                config.shard_count,
                files.len()
            )));
        }

        let dir = StoreDir::open(&config.destination, config.create_if_missing)?;

        let mut backends = Vec::with_capacity(files.len());
        for (shard_id, file) in files.into_iter().enumerate() {
            backends.push(FileBackend::from_file(&dir.shard_file_path(shard_id), file)?);
        }

        Self::open_inner(config, dir, backends)
    }

    fn open_inner(
        config: Config,
        dir: StoreDir,
        backends: Vec<FileBackend>,
    ) -> CoreResult<Self> {
        if config.shard_count == 0 {
            return Err(CoreError::invalid_argument("shard count must be positive"));
        }

        let counter = dir.load_counter()?.unwrap_or(0);

        let mut shards = Vec::with_capacity(backends.len());
        for (shard_id, backend) in backends.into_iter().enumerate() {
            let shard = Arc::new(Shard::new(shard_id, Box::new(backend)));
            Self::load_shard(&dir, &shard)?;
            shards.push(shard);
        }

        let store = Self {
            shards,
            counter: Mutex::new(counter),
            dir,
            shard_count: config.shard_count,
        };

        info!(
            path = %store.dir.path().display(),
            shards = store.shard_count,
            entries = store.count(),
            "store opened"
        );

        Ok(store)
    }

    /// Restores one shard's indexes from its sidecar, falling back to a
    /// full block-file scan when the sidecar is absent, unreadable, or
    /// disagrees with the file.
    fn load_shard(dir: &StoreDir, shard: &Shard) -> CoreResult<()> {
        if let Some(bytes) = dir.load_shard_snapshot(shard.id())? {
            match IndexSnapshot::decode(&bytes) {
                Ok(snapshot) => {
                    let file_size = shard.file_size()?;
                    if snapshot.shard_id == shard.id() as u32 && snapshot.file_size <= file_size {
                        let high_water = snapshot.file_size;
                        shard.install_snapshot(snapshot);
                        let recovered = shard.scan_file(high_water)?;
                        if recovered > 0 {
                            debug!(
                                shard = shard.id(),
                                recovered, "recovered blocks appended after last sync"
                            );
                        }
                        return Ok(());
                    }
                    warn!(
                        shard = shard.id(),
                        "index snapshot inconsistent with shard file, rebuilding"
                    );
                }
                Err(err) => {
                    warn!(shard = shard.id(), %err, "unreadable index snapshot, rebuilding");
                }
            }
        }

        let recovered = shard.scan_file(0)?;
        debug!(shard = shard.id(), recovered, "rebuilt index from shard file");
        Ok(())
    }

    /// Stores a payload under a freshly generated record id.
    ///
    /// The record is appended to the next round-robin shard and indexed
    /// under one entry per descriptor plus the identity entry. Returns a
    /// map from each installed index key to the shard id that owns it, so
    /// the host can address later point reads without rehashing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if a unique descriptor
    /// collides in the target shard; no index entries are installed in
    /// that case.
    pub fn set(
        &self,
        indexes: &[IndexDescriptor],
        payload: &[u8],
    ) -> CoreResult<HashMap<String, usize>> {
        let id = RecordId::generate().to_string();
        let encoded = Block::new(id.clone(), payload.to_vec()).encode()?;

        let shard = self.next_shard();
        let keys = shard.insert_record(&encoded, &id, indexes)?;

        Ok(keys.into_iter().map(|key| (key, shard.id())).collect())
    }

    /// Returns the payload of the record with the given id in the given
    /// shard.
    pub fn find_by_id(&self, shard: usize, id: &str) -> CoreResult<Vec<u8>> {
        payload_of(self.shard_at(shard)?.read_live(&id_key(id))?)
    }

    /// Returns the payload under a unique index key in the given shard.
    ///
    /// Records marked deleted read as not found.
    pub fn find_by_unique_key(&self, shard: usize, field: &str, data: &str) -> CoreResult<Vec<u8>> {
        payload_of(self.shard_at(shard)?.read_live(&unique_key(field, data))?)
    }

    /// Returns up to `limit` payloads indexed under a non-unique key.
    ///
    /// Shards are visited in ascending order; within a shard, results
    /// come back in ascending ordinal order (insertion order).
    pub fn find_by_key(&self, field: &str, data: &str, limit: usize) -> CoreResult<Vec<Vec<u8>>> {
        let mut blocks = Vec::new();
        if limit == 0 {
            return Ok(blocks);
        }

        for shard in &self.shards {
            shard.collect_by_key(field, data, limit, &mut blocks)?;
            if blocks.len() == limit {
                break;
            }
        }

        blocks.into_iter().map(payload_of).collect()
    }

    /// Marks the record with the given id as deleted.
    pub fn delete_by_id(&self, shard: usize, id: &str) -> CoreResult<()> {
        self.shard_at(shard)?.mark_deleted(&id_key(id))
    }

    /// Marks the record under a unique index key as deleted.
    pub fn delete_by_unique_key(&self, shard: usize, field: &str, data: &str) -> CoreResult<()> {
        self.shard_at(shard)?.mark_deleted(&unique_key(field, data))
    }

    /// Marks up to `limit` live records under a non-unique key as
    /// deleted, scanning each shard's ordinals downward.
    ///
    /// Returns the fully-qualified keys deleted, so the host can restore
    /// them later with [`Store::restore_by_key`].
    pub fn delete_by_key(&self, field: &str, data: &str, limit: usize) -> Vec<String> {
        let mut deleted = Vec::new();
        if limit == 0 {
            return deleted;
        }

        for shard in &self.shards {
            shard.delete_by_key(field, data, limit, &mut deleted);
            if deleted.len() == limit {
                break;
            }
        }

        deleted
    }

    /// Clears the deleted mark on the record under a unique index key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyEvicted`] when the key is gone, i.e.
    /// the record was compacted away since it was deleted.
    pub fn restore_by_unique_key(&self, shard: usize, field: &str, data: &str) -> CoreResult<()> {
        self.shard_at(shard)?.unmark_deleted(&unique_key(field, data))
    }

    /// Re-enables up to `limit` tombstoned records under a non-unique
    /// key. Returns how many were restored.
    pub fn restore_by_key(&self, field: &str, data: &str, limit: usize) -> usize {
        let mut restored = 0;
        if limit == 0 {
            return restored;
        }

        for shard in &self.shards {
            shard.restore_by_key(field, data, limit, &mut restored);
            if restored == limit {
                break;
            }
        }

        restored
    }

    /// Returns the descriptor under a fully-qualified key, routed by
    /// hash, live or deleted.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<ShardOffset>> {
        self.shards[shard_for_key(key, self.shard_count)].get(key)
    }

    /// Checks whether any entry exists under a fully-qualified key,
    /// routed by hash.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.shards[shard_for_key(key, self.shard_count)].has(key)
    }

    /// Returns the total number of index entries across all shards,
    /// live and deleted.
    #[must_use]
    pub fn count(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    /// Checks whether the store holds no index entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns a snapshot iterator over all `(key, descriptor)` pairs.
    ///
    /// Each shard is snapshotted under its read lock into a buffered
    /// channel sized to its entry count; the snapshot is point-in-time
    /// per shard but not atomic across shards. Iteration order within a
    /// shard is unspecified.
    #[must_use]
    pub fn iter_buffered(&self) -> IterBuffered {
        let channels: Vec<_> = self
            .shards
            .iter()
            .map(|shard| shard.snapshot_channel())
            .collect();

        IterBuffered {
            channels: channels.into_iter(),
            current: None,
        }
    }

    /// Flushes every shard file to disk, persists each shard's index
    /// snapshot, and finally writes `map.index` with the round-robin
    /// counter.
    pub fn sync(&self) -> CoreResult<()> {
        for shard in &self.shards {
            shard.sync()?;
            let snapshot = shard.export_index()?;
            self.dir.save_shard_snapshot(shard.id(), &snapshot.encode())?;
        }

        let counter = self.counter.lock();
        self.dir.save_counter(*counter)?;
        drop(counter);

        info!(path = %self.dir.path().display(), "store synced");
        Ok(())
    }

    /// Closes and reopens every shard's file handle, forcing the OS to
    /// complete buffered writes.
    pub fn flush(&self) -> CoreResult<()> {
        for shard in &self.shards {
            shard.reopen()?;
        }
        Ok(())
    }

    /// Compacts every shard in sequence, dropping tombstoned and
    /// orphaned blocks. Fails fast on the first shard error.
    ///
    /// Returns the total number of bytes reclaimed.
    pub fn optimize(&self) -> CoreResult<u64> {
        let mut reclaimed = 0u64;

        for shard in &self.shards {
            let freed = shard.optimize()?;
            if freed > 0 {
                debug!(shard = shard.id(), freed, "shard compacted");
            }
            // Compaction moved every block, so the old snapshot is stale.
            let snapshot = shard.export_index()?;
            self.dir.save_shard_snapshot(shard.id(), &snapshot.encode())?;
            reclaimed += freed;
        }

        info!(reclaimed, "store optimized");
        Ok(reclaimed)
    }

    /// Overrides the round-robin counter; the next [`Store::set`] lands
    /// on shard `(value + 1) % shard_count`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] when `value` is not a valid
    /// shard index.
    pub fn set_counter_index(&self, value: u64) -> CoreResult<()> {
        if value >= self.shard_count as u64 {
            return Err(CoreError::invalid_argument(format!(
                "counter index {value} out of range [0, {})",
                self.shard_count
            )));
        }

        *self.counter.lock() = value;
        Ok(())
    }

    /// Returns the number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Returns the data directory path.
    #[must_use]
    pub fn destination(&self) -> &std::path::Path {
        self.dir.path()
    }

    fn next_shard(&self) -> Arc<Shard> {
        let mut counter = self.counter.lock();
        *counter += 1;
        if *counter >= self.shard_count as u64 {
            *counter = 0;
        }
        Arc::clone(&self.shards[*counter as usize])
    }

    fn shard_at(&self, shard: usize) -> CoreResult<&Shard> {
        self.shards.get(shard).map(Arc::as_ref).ok_or_else(|| {
            CoreError::invalid_argument(format!(
                "shard index {shard} out of range [0, {})",
                self.shard_count
            ))
        })
    }
}

/// Strips the block framing off stored bytes, returning the payload.
fn payload_of(bytes: Vec<u8>) -> CoreResult<Vec<u8>> {
    Ok(Block::decode(&bytes)?.payload)
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.dir.path())
            .field("shard_count", &self.shard_count)
            .field("entries", &self.count())
            .finish_non_exhaustive()
    }
}

/// Snapshot iterator over all index entries, produced by
/// [`Store::iter_buffered`].
///
/// Holding this iterator across engine-mutating operations is safe but
/// yields a view that predates those mutations shard by shard.
pub struct IterBuffered {
    channels: std::vec::IntoIter<Receiver<(String, Arc<ShardOffset>)>>,
    current: Option<Receiver<(String, Arc<ShardOffset>)>>,
}

impl Iterator for IterBuffered {
    type Item = (String, Arc<ShardOffset>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(channel) = &self.current {
                // Channels are pre-filled and closed; recv never blocks.
                if let Ok(pair) = channel.recv() {
                    return Some(pair);
                }
            }
            self.current = Some(self.channels.next()?);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(path: &std::path::Path, shard_count: usize) -> Store {
        Store::open(Config::new(path).shard_count(shard_count)).unwrap()
    }

    #[test]
    fn set_returns_keys_with_owning_shard() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path(), 4);

        let keys = store
            .set(&[IndexDescriptor::unique("email", "a@x")], b"payload")
            .unwrap();

        assert_eq!(keys.len(), 2);
        assert!(keys.contains_key("email:a@x"));
        assert!(keys.keys().any(|key| key.starts_with("id:")));

        // All keys of one record live in the same shard.
        let shards: Vec<_> = keys.values().collect();
        assert!(shards.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn find_roundtrip_via_returned_shard() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path(), 4);

        let keys = store
            .set(&[IndexDescriptor::unique("email", "a@x")], b"hello")
            .unwrap();
        let shard = keys["email:a@x"];

        let payload = store.find_by_unique_key(shard, "email", "a@x").unwrap();
        assert_eq!(payload, b"hello");

        let id = keys
            .keys()
            .find_map(|key| key.strip_prefix("id:"))
            .unwrap();
        assert_eq!(store.find_by_id(shard, id).unwrap(), b"hello");
    }

    #[test]
    fn round_robin_advances_and_wraps() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path(), 3);

        let mut shards = Vec::new();
        for _ in 0..6 {
            let keys = store.set(&[], b"p").unwrap();
            shards.push(*keys.values().next().unwrap());
        }

        assert_eq!(shards, vec![1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn set_counter_index_redirects_next_set() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path(), 4);

        store.set_counter_index(1).unwrap();
        let keys = store.set(&[], b"p").unwrap();
        assert_eq!(*keys.values().next().unwrap(), 2);

        // Wraps at the top of the range.
        store.set_counter_index(3).unwrap();
        let keys = store.set(&[], b"p").unwrap();
        assert_eq!(*keys.values().next().unwrap(), 0);
    }

    #[test]
    fn set_counter_index_validates_range() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path(), 4);

        assert!(matches!(
            store.set_counter_index(4),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(store.set_counter_index(3).is_ok());
    }

    #[test]
    fn shard_index_out_of_range() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path(), 4);

        let result = store.find_by_unique_key(4, "email", "a@x");
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
    }

    #[test]
    fn has_and_get_are_hash_routed() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path(), 1);

        // One shard, so hash routing always finds the entry.
        store
            .set(&[IndexDescriptor::unique("email", "a@x")], b"p")
            .unwrap();

        assert!(store.has("email:a@x"));
        assert!(!store.has("email:b@x"));

        let descriptor = store.get("email:a@x").unwrap();
        assert!(!descriptor.is_deleted());
    }

    #[test]
    fn count_and_is_empty() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path(), 4);

        assert!(store.is_empty());

        store
            .set(&[IndexDescriptor::unique("email", "a@x")], b"p")
            .unwrap();

        // One unique entry plus the identity entry.
        assert_eq!(store.count(), 2);
        assert!(!store.is_empty());
    }

    #[test]
    fn iter_buffered_sees_all_entries() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path(), 4);

        for _ in 0..5 {
            store.set(&[IndexDescriptor::multi("tag", "x")], b"p").unwrap();
        }

        let entries: Vec<_> = store.iter_buffered().collect();
        assert_eq!(entries.len(), store.count());
    }

    #[test]
    fn zero_shards_rejected() {
        let temp = tempdir().unwrap();
        let result = Store::open(Config::new(temp.path()).shard_count(0));
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
    }

    #[test]
    fn preallocated_files_count_must_match() {
        let temp = tempdir().unwrap();
        let result =
            Store::open_with_files(Config::new(temp.path()).shard_count(2), Vec::new());
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
    }

    #[test]
    fn find_by_key_limit_zero() {
        let temp = tempdir().unwrap();
        let store = open_store(temp.path(), 4);

        store.set(&[IndexDescriptor::multi("tag", "x")], b"p").unwrap();

        assert!(store.find_by_key("tag", "x", 0).unwrap().is_empty());
        assert!(store.delete_by_key("tag", "x", 0).is_empty());
        assert_eq!(store.restore_by_key("tag", "x", 0), 0);
    }
}
