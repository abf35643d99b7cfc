//! A single store partition.
//!
//! Each shard owns one append-only file plus two in-memory maps:
//!
//! - the **offset index**, mapping every index key to the descriptor of
//!   the block it refers to
//! - the **capacity map**, mapping each non-unique fingerprint to the
//!   number of ordinals assigned for it in this shard
//!
//! One reader/writer lock guards the file handle and both maps together.
//! Reads take the read lock (including positional file reads); every
//! mutation takes the write lock.
//!
//! ## Shared descriptors
//!
//! All index entries of one record - the identity entry and every
//! secondary entry - hold the same [`Arc<ShardOffset>`]. Flipping the
//! descriptor's `deleted` flag therefore changes visibility for every
//! index view at once. Compaction groups keys by descriptor identity so
//! each live block is copied exactly once.
//!
//! ## Recovery policy
//!
//! When rebuilding from a shard file ([`Shard::scan_file`]), a truncated
//! block at the end of the file is treated as a clean end of data (a
//! crash mid-append before sync). A checksum mismatch or nonsensical
//! frame length is corruption and aborts the open.

use crate::error::{CoreError, CoreResult};
use crate::index::{IndexSnapshot, SnapshotEntry};
use crate::types::{fingerprint, id_key, ordinal_key, unique_key, IndexDescriptor};
use crossbeam::channel::{bounded, Receiver};
use parking_lot::RwLock;
use silodb_codec::{Block, LEN_PREFIX_SIZE};
use silodb_storage::StorageBackend;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Locates an encoded block within its shard's file.
///
/// Descriptors are shared by reference between all index entries of one
/// record; see the module docs.
#[derive(Debug)]
pub struct ShardOffset {
    start: u64,
    length: u32,
    deleted: AtomicBool,
}

impl ShardOffset {
    pub(crate) fn new(start: u64, length: u32) -> Self {
        Self {
            start,
            length,
            deleted: AtomicBool::new(false),
        }
    }

    /// Absolute byte offset of the block within the shard file.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Size of the block in bytes.
    #[must_use]
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Whether the record is logically deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        // The owning shard's lock orders all access to this flag.
        self.deleted.load(Ordering::Relaxed)
    }

    pub(crate) fn set_deleted(&self, deleted: bool) {
        self.deleted.store(deleted, Ordering::Relaxed);
    }
}

struct ShardInner {
    backend: Box<dyn StorageBackend>,
    items: HashMap<String, Arc<ShardOffset>>,
    capacity: HashMap<String, u64>,
}

/// One partition of the store: an append-only file and its indexes.
pub struct Shard {
    id: usize,
    inner: RwLock<ShardInner>,
}

impl Shard {
    /// Creates a shard over the given backend with empty indexes.
    pub fn new(id: usize, backend: Box<dyn StorageBackend>) -> Self {
        Self {
            id,
            inner: RwLock::new(ShardInner {
                backend,
                items: HashMap::new(),
                capacity: HashMap::new(),
            }),
        }
    }

    /// Returns the shard index.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the number of index entries in this shard.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    /// Checks whether this shard holds no index entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks whether any entry (live or deleted) exists under `key`.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.inner.read().items.contains_key(key)
    }

    /// Returns the descriptor under `key`, live or deleted.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<ShardOffset>> {
        self.inner.read().items.get(key).map(Arc::clone)
    }

    /// Returns the current size of the shard file in bytes.
    pub fn file_size(&self) -> CoreResult<u64> {
        Ok(self.inner.read().backend.size()?)
    }

    /// Appends an encoded block and installs its index entries.
    ///
    /// One entry per descriptor is installed, plus the identity entry
    /// `id:<id>`; all of them share one descriptor. The whole batch is
    /// staged and validated before anything becomes visible: a unique
    /// collision fails the insert with no index entries installed. The
    /// appended bytes then remain as an orphan in the file until the next
    /// [`Shard::optimize`] drops them.
    ///
    /// Returns the installed index keys.
    pub fn insert_record(
        &self,
        encoded: &[u8],
        id: &str,
        indexes: &[IndexDescriptor],
    ) -> CoreResult<Vec<String>> {
        let mut inner = self.inner.write();
        let inner = &mut *inner;

        let start = inner.backend.append(encoded)?;
        let offset = Arc::new(ShardOffset::new(start, encoded.len() as u32));

        let mut staged: Vec<String> = Vec::with_capacity(indexes.len() + 1);
        let mut capacity_updates: HashMap<String, u64> = HashMap::new();

        for descriptor in indexes {
            if descriptor.unique {
                let key = unique_key(&descriptor.field, &descriptor.data);
                if inner.items.contains_key(&key) || staged.contains(&key) {
                    return Err(CoreError::duplicate_key(key, self.id));
                }
                staged.push(key);
            } else {
                let group = fingerprint(&descriptor.field, &descriptor.data);
                let mut ordinal = capacity_updates
                    .get(&group)
                    .or_else(|| inner.capacity.get(&group))
                    .copied()
                    .unwrap_or(0);

                // Smallest unused ordinal: the dense prefix ends at the
                // capacity bound, but probe past it in case the maps ever
                // disagree.
                loop {
                    let key = ordinal_key(ordinal, &group);
                    if inner.items.contains_key(&key) || staged.contains(&key) {
                        ordinal += 1;
                    } else {
                        staged.push(key);
                        break;
                    }
                }
                capacity_updates.insert(group, ordinal + 1);
            }
        }

        staged.push(id_key(id));

        for key in &staged {
            inner.items.insert(key.clone(), Arc::clone(&offset));
        }
        for (group, count) in capacity_updates {
            inner.capacity.insert(group, count);
        }

        Ok(staged)
    }

    /// Reads the payload block referenced by a live entry under `key`.
    ///
    /// Deleted and absent entries both read as not found.
    pub fn read_live(&self, key: &str) -> CoreResult<Vec<u8>> {
        let inner = self.inner.read();

        match inner.items.get(key) {
            Some(offset) if !offset.is_deleted() => Ok(inner
                .backend
                .read_at(offset.start(), offset.length() as usize)?),
            _ => Err(CoreError::not_found(key)),
        }
    }

    /// Marks the entry under `key` as deleted.
    pub fn mark_deleted(&self, key: &str) -> CoreResult<()> {
        let inner = self.inner.write();

        match inner.items.get(key) {
            Some(offset) => {
                offset.set_deleted(true);
                Ok(())
            }
            None => Err(CoreError::not_found(key)),
        }
    }

    /// Clears the deleted mark on the entry under `key`.
    ///
    /// Fails with [`CoreError::AlreadyEvicted`] when the key is gone,
    /// which after a compaction is how a stale restore shows up.
    pub fn unmark_deleted(&self, key: &str) -> CoreResult<()> {
        let inner = self.inner.write();

        match inner.items.get(key) {
            Some(offset) => {
                offset.set_deleted(false);
                Ok(())
            }
            None => Err(CoreError::already_evicted(key)),
        }
    }

    /// Collects live payloads for a fingerprint in ascending ordinal
    /// order, up to `limit` total results in `results`.
    ///
    /// Stops early at the first missing ordinal (the dense prefix ended).
    pub fn collect_by_key(
        &self,
        field: &str,
        data: &str,
        limit: usize,
        results: &mut Vec<Vec<u8>>,
    ) -> CoreResult<()> {
        let inner = self.inner.read();
        let group = fingerprint(field, data);
        let bound = inner.capacity.get(&group).copied().unwrap_or(0);

        for ordinal in 0..bound {
            match inner.items.get(&ordinal_key(ordinal, &group)) {
                Some(offset) => {
                    if offset.is_deleted() {
                        continue;
                    }
                    let payload = inner
                        .backend
                        .read_at(offset.start(), offset.length() as usize)?;
                    results.push(payload);
                    if results.len() == limit {
                        break;
                    }
                }
                None => break,
            }
        }

        Ok(())
    }

    /// Marks live entries for a fingerprint as deleted, scanning ordinals
    /// downward from the capacity bound, until `deleted` holds `limit`
    /// keys in total.
    ///
    /// The fully-qualified keys flipped by this call are appended to
    /// `deleted` so the caller can restore them later.
    pub fn delete_by_key(&self, field: &str, data: &str, limit: usize, deleted: &mut Vec<String>) {
        let inner = self.inner.write();
        let group = fingerprint(field, data);
        let bound = inner.capacity.get(&group).copied().unwrap_or(0);

        for ordinal in (0..bound).rev() {
            let key = ordinal_key(ordinal, &group);
            match inner.items.get(&key) {
                Some(offset) => {
                    if offset.is_deleted() {
                        continue;
                    }
                    offset.set_deleted(true);
                    deleted.push(key);
                    if deleted.len() == limit {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    /// Clears the deleted mark on tombstoned entries for a fingerprint,
    /// scanning ordinals downward, until `*restored` reaches `limit`.
    pub fn restore_by_key(&self, field: &str, data: &str, limit: usize, restored: &mut usize) {
        let inner = self.inner.write();
        let group = fingerprint(field, data);
        let bound = inner.capacity.get(&group).copied().unwrap_or(0);

        for ordinal in (0..bound).rev() {
            match inner.items.get(&ordinal_key(ordinal, &group)) {
                Some(offset) => {
                    if !offset.is_deleted() {
                        continue;
                    }
                    offset.set_deleted(false);
                    *restored += 1;
                    if *restored == limit {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    /// Compacts the shard file, dropping tombstoned blocks and orphaned
    /// bytes and renumbering surviving non-unique ordinals densely.
    ///
    /// Returns the number of bytes reclaimed.
    pub fn optimize(&self) -> CoreResult<u64> {
        let mut inner = self.inner.write();
        let inner = &mut *inner;

        let old_size = inner.backend.size()?;

        // Each live descriptor is copied once, in file order, no matter
        // how many index keys reference it.
        let mut seen: HashSet<*const ShardOffset> = HashSet::new();
        let mut live: Vec<Arc<ShardOffset>> = Vec::new();
        for offset in inner.items.values() {
            if seen.insert(Arc::as_ptr(offset)) && !offset.is_deleted() {
                live.push(Arc::clone(offset));
            }
        }
        live.sort_by_key(|offset| offset.start());

        let mut blocks = Vec::with_capacity(live.len());
        for offset in &live {
            blocks.push(
                inner
                    .backend
                    .read_at(offset.start(), offset.length() as usize)?,
            );
        }

        let new_starts = inner.backend.rewrite(&blocks)?;

        let mut replacement: HashMap<*const ShardOffset, Arc<ShardOffset>> =
            HashMap::with_capacity(live.len());
        for (offset, &start) in live.iter().zip(new_starts.iter()) {
            replacement.insert(
                Arc::as_ptr(offset),
                Arc::new(ShardOffset::new(start, offset.length())),
            );
        }

        let mut new_items: HashMap<String, Arc<ShardOffset>> =
            HashMap::with_capacity(inner.items.len());
        let mut new_capacity: HashMap<String, u64> = HashMap::new();
        let mut non_unique_keys: HashSet<String> = HashSet::new();

        // Renumber each fingerprint's surviving ordinals densely from 0,
        // preserving their relative order.
        for (group, &bound) in &inner.capacity {
            let mut next = 0u64;
            for ordinal in 0..bound {
                let key = ordinal_key(ordinal, group);
                let Some(offset) = inner.items.get(&key) else {
                    break;
                };
                non_unique_keys.insert(key);
                if let Some(new_offset) = replacement.get(&Arc::as_ptr(offset)) {
                    new_items.insert(ordinal_key(next, group), Arc::clone(new_offset));
                    next += 1;
                }
            }
            if next > 0 {
                new_capacity.insert(group.clone(), next);
            }
        }

        // Identity and unique entries keep their keys.
        for (key, offset) in &inner.items {
            if non_unique_keys.contains(key) {
                continue;
            }
            if let Some(new_offset) = replacement.get(&Arc::as_ptr(offset)) {
                new_items.insert(key.clone(), Arc::clone(new_offset));
            }
        }

        inner.items = new_items;
        inner.capacity = new_capacity;

        let new_size = inner.backend.size()?;
        Ok(old_size.saturating_sub(new_size))
    }

    /// Flushes the shard file to disk.
    pub fn sync(&self) -> CoreResult<()> {
        let mut inner = self.inner.write();
        inner.backend.sync()?;
        Ok(())
    }

    /// Closes and reopens the shard file handle.
    pub fn reopen(&self) -> CoreResult<()> {
        let mut inner = self.inner.write();
        inner.backend.reopen()?;
        Ok(())
    }

    /// Copies all index entries into a bounded channel under the read
    /// lock, then closes the channel.
    ///
    /// The channel is sized to the entry count, so the snapshot is
    /// complete by the time this returns and consuming it never blocks.
    pub fn snapshot_channel(&self) -> Receiver<(String, Arc<ShardOffset>)> {
        let inner = self.inner.read();
        let (tx, rx) = bounded(inner.items.len());

        for (key, offset) in &inner.items {
            // Cannot fail: capacity equals the entry count.
            let _ = tx.send((key.clone(), Arc::clone(offset)));
        }

        rx
    }

    /// Exports the offset index and capacity map as a snapshot.
    pub fn export_index(&self) -> CoreResult<IndexSnapshot> {
        let inner = self.inner.read();

        let mut entries: Vec<SnapshotEntry> = inner
            .items
            .iter()
            .map(|(key, offset)| SnapshotEntry {
                key: key.clone(),
                start: offset.start(),
                length: offset.length(),
                deleted: offset.is_deleted(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let mut capacities: Vec<(String, u64)> = inner
            .capacity
            .iter()
            .map(|(group, &count)| (group.clone(), count))
            .collect();
        capacities.sort();

        Ok(IndexSnapshot {
            shard_id: self.id as u32,
            file_size: inner.backend.size()?,
            entries,
            capacities,
        })
    }

    /// Installs a previously exported snapshot, replacing the in-memory
    /// indexes.
    ///
    /// Entries sharing a start offset are re-linked to one descriptor, so
    /// identity and secondary views keep flipping together after a
    /// restart.
    pub fn install_snapshot(&self, snapshot: IndexSnapshot) {
        let mut inner = self.inner.write();

        let mut by_start: HashMap<u64, Arc<ShardOffset>> = HashMap::new();
        let mut items = HashMap::with_capacity(snapshot.entries.len());

        for entry in snapshot.entries {
            let offset = by_start
                .entry(entry.start)
                .or_insert_with(|| {
                    let offset = ShardOffset::new(entry.start, entry.length);
                    offset.set_deleted(entry.deleted);
                    Arc::new(offset)
                })
                .clone();
            items.insert(entry.key, offset);
        }

        inner.items = items;
        inner.capacity = snapshot.capacities.into_iter().collect();
    }

    /// Rebuilds identity entries by scanning the shard file from `from`.
    ///
    /// Every decodable block gains a live `id:<id>` entry pointing at it.
    /// Returns the number of blocks recovered. See the module docs for
    /// the recovery policy on torn and corrupt blocks.
    pub fn scan_file(&self, from: u64) -> CoreResult<usize> {
        let mut inner = self.inner.write();
        let inner = &mut *inner;

        let size = inner.backend.size()?;
        let mut offset = from;
        let mut recovered = 0usize;

        while offset < size {
            if size - offset < LEN_PREFIX_SIZE as u64 {
                // Torn length prefix at the tail.
                break;
            }

            let prefix = inner.backend.read_at(offset, LEN_PREFIX_SIZE)?;
            let block_len = Block::frame_len(&prefix)? as u64;

            if offset + block_len > size {
                // Torn block at the tail.
                break;
            }

            let data = inner.backend.read_at(offset, block_len as usize)?;
            let block = Block::decode(&data)?;

            inner.items.insert(
                id_key(&block.id),
                Arc::new(ShardOffset::new(offset, block_len as u32)),
            );
            recovered += 1;
            offset += block_len;
        }

        Ok(recovered)
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Shard")
            .field("id", &self.id)
            .field("entries", &inner.items.len())
            .field("fingerprints", &inner.capacity.len())
            .finish_non_exhaustive()
    }
}
