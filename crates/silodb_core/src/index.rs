//! Shard index snapshot persistence.
//!
//! Each shard's offset index and capacity map can be exported as a
//! snapshot and written to a sidecar file (`shard_<i>.idx`) during sync.
//! On open, a valid snapshot restores the shard's indexes - including
//! logical deletion state, which the shard file alone does not record -
//! and the shard file is only scanned for blocks appended after the
//! snapshot was taken.
//!
//! ## Format
//!
//! All integers little-endian:
//!
//! ```text
//! | magic "SLIX" (4) | version (1) | shard_id (4) | file_size (8)
//! | entry_count (8)
//! | entries: key_len (4) | key | start (8) | length (4) | deleted (1)
//! | cap_count (8) | caps: group_len (4) | group | count (8)
//! | crc32 (4) |
//! ```
//!
//! ## Invariants
//!
//! - Record payloads are never stored here; the shard file stays the
//!   source of truth for bytes.
//! - A snapshot that fails to decode, or that disagrees with the shard
//!   file it describes, triggers a rebuild scan - never a failed open.

use crate::error::{CoreError, CoreResult};
use silodb_codec::crc32;

/// Magic bytes for snapshot files: "SLIX".
const SNAPSHOT_MAGIC: [u8; 4] = [0x53, 0x4C, 0x49, 0x58];

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

/// One offset-index entry in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// The index key.
    pub key: String,
    /// Block offset within the shard file.
    pub start: u64,
    /// Block length in bytes.
    pub length: u32,
    /// Logical deletion state at snapshot time.
    pub deleted: bool,
}

/// A point-in-time export of one shard's in-memory indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSnapshot {
    /// Shard the snapshot belongs to.
    pub shard_id: u32,
    /// Size of the shard file when the snapshot was taken.
    pub file_size: u64,
    /// All offset-index entries.
    pub entries: Vec<SnapshotEntry>,
    /// Capacity map: fingerprint to assigned ordinal count.
    pub capacities: Vec<(String, u64)>,
}

impl IndexSnapshot {
    /// Serializes the snapshot to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&SNAPSHOT_MAGIC);
        buf.push(SNAPSHOT_VERSION);
        buf.extend_from_slice(&self.shard_id.to_le_bytes());
        buf.extend_from_slice(&self.file_size.to_le_bytes());

        buf.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            let key = entry.key.as_bytes();
            buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
            buf.extend_from_slice(key);
            buf.extend_from_slice(&entry.start.to_le_bytes());
            buf.extend_from_slice(&entry.length.to_le_bytes());
            buf.push(u8::from(entry.deleted));
        }

        buf.extend_from_slice(&(self.capacities.len() as u64).to_le_bytes());
        for (group, count) in &self.capacities {
            let group = group.as_bytes();
            buf.extend_from_slice(&(group.len() as u32).to_le_bytes());
            buf.extend_from_slice(group);
            buf.extend_from_slice(&count.to_le_bytes());
        }

        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Deserializes a snapshot from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexCorruption`] on any structural problem;
    /// callers are expected to fall back to a shard file scan.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < SNAPSHOT_MAGIC.len() + 1 + 4 + 8 + 8 + 8 + 4 {
            return Err(CoreError::index_corruption("snapshot file too small"));
        }

        let (body, crc_bytes) = data.split_at(data.len() - 4);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed_crc = crc32(body);
        if stored_crc != computed_crc {
            return Err(CoreError::index_corruption(format!(
                "snapshot checksum mismatch: expected {stored_crc:08x}, got {computed_crc:08x}"
            )));
        }

        if body[..4] != SNAPSHOT_MAGIC {
            return Err(CoreError::index_corruption("invalid snapshot magic"));
        }

        let mut cursor = Cursor::new(&body[4..]);

        let version = cursor.read_u8()?;
        if version != SNAPSHOT_VERSION {
            return Err(CoreError::index_corruption(format!(
                "unsupported snapshot version: {version}"
            )));
        }

        let shard_id = cursor.read_u32()?;
        let file_size = cursor.read_u64()?;

        let entry_count = cursor.read_u64()?;
        let mut entries = Vec::with_capacity(entry_count.min(1 << 20) as usize);
        for _ in 0..entry_count {
            let key = cursor.read_string()?;
            let start = cursor.read_u64()?;
            let length = cursor.read_u32()?;
            let deleted = cursor.read_u8()? != 0;
            entries.push(SnapshotEntry {
                key,
                start,
                length,
                deleted,
            });
        }

        let cap_count = cursor.read_u64()?;
        let mut capacities = Vec::with_capacity(cap_count.min(1 << 20) as usize);
        for _ in 0..cap_count {
            let group = cursor.read_string()?;
            let count = cursor.read_u64()?;
            capacities.push((group, count));
        }

        if !cursor.is_at_end() {
            return Err(CoreError::index_corruption("trailing bytes in snapshot"));
        }

        Ok(Self {
            shard_id,
            file_size,
            entries,
            capacities,
        })
    }
}

/// Bounds-checked reader over a snapshot body.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        if self.data.len() - self.pos < len {
            return Err(CoreError::index_corruption("truncated snapshot"));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> CoreResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> CoreResult<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    fn read_string(&mut self) -> CoreResult<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::index_corruption("invalid UTF-8 in snapshot key"))
    }

    fn is_at_end(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IndexSnapshot {
        IndexSnapshot {
            shard_id: 7,
            file_size: 1234,
            entries: vec![
                SnapshotEntry {
                    key: "0:tag:red".to_string(),
                    start: 0,
                    length: 32,
                    deleted: false,
                },
                SnapshotEntry {
                    key: "id:abc".to_string(),
                    start: 0,
                    length: 32,
                    deleted: false,
                },
                SnapshotEntry {
                    key: "id:def".to_string(),
                    start: 32,
                    length: 40,
                    deleted: true,
                },
            ],
            capacities: vec![("tag:red".to_string(), 1)],
        }
    }

    #[test]
    fn roundtrip() {
        let snapshot = sample();
        let bytes = snapshot.encode();
        let decoded = IndexSnapshot::decode(&bytes).unwrap();
        assert_eq!(snapshot, decoded);
    }

    #[test]
    fn empty_roundtrip() {
        let snapshot = IndexSnapshot {
            shard_id: 0,
            file_size: 0,
            entries: Vec::new(),
            capacities: Vec::new(),
        };
        let decoded = IndexSnapshot::decode(&snapshot.encode()).unwrap();
        assert_eq!(snapshot, decoded);
    }

    #[test]
    fn detect_corruption() {
        let mut bytes = sample().encode();
        bytes[20] ^= 0xFF;

        let result = IndexSnapshot::decode(&bytes);
        assert!(matches!(result, Err(CoreError::IndexCorruption { .. })));
    }

    #[test]
    fn detect_truncation() {
        let bytes = sample().encode();
        let result = IndexSnapshot::decode(&bytes[..bytes.len() - 6]);
        assert!(matches!(result, Err(CoreError::IndexCorruption { .. })));
    }

    #[test]
    fn reject_bad_magic() {
        let mut bytes = sample().encode();
        bytes[0] = 0x00;
        // Fix up the checksum so only the magic is wrong.
        let body_len = bytes.len() - 4;
        let crc = crc32(&bytes[..body_len]).to_le_bytes();
        bytes[body_len..].copy_from_slice(&crc);

        let result = IndexSnapshot::decode(&bytes);
        assert!(matches!(result, Err(CoreError::IndexCorruption { .. })));
    }
}
