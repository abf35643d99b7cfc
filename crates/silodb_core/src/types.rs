//! Index descriptors, key composition, and shard routing.
//!
//! The engine never interprets the host's `field` or `data` strings; it
//! only composes index keys from them:
//!
//! - unique entry: `"<field>:<data>"`
//! - non-unique entry: `"<ordinal>:<field>:<data>"`, ordinals dense from 0
//! - identity entry: `"id:<id>"`, installed for every record

/// A secondary index descriptor supplied by the host alongside a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    /// Index field name.
    pub field: String,
    /// Indexed value.
    pub data: String,
    /// Whether the composed key must be unique within its shard.
    pub unique: bool,
}

impl IndexDescriptor {
    /// Creates a unique index descriptor.
    #[must_use]
    pub fn unique(field: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            data: data.into(),
            unique: true,
        }
    }

    /// Creates a non-unique (multi-valued) index descriptor.
    #[must_use]
    pub fn multi(field: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            data: data.into(),
            unique: false,
        }
    }
}

/// Composes a unique index key.
#[must_use]
pub fn unique_key(field: &str, data: &str) -> String {
    format!("{field}:{data}")
}

/// Composes the fingerprint identifying a non-unique index group.
///
/// Textually identical to [`unique_key`]; kept separate so call sites say
/// which schema they mean.
#[must_use]
pub fn fingerprint(field: &str, data: &str) -> String {
    format!("{field}:{data}")
}

/// Composes a non-unique index key from an ordinal and a fingerprint.
#[must_use]
pub fn ordinal_key(ordinal: u64, fingerprint: &str) -> String {
    format!("{ordinal}:{fingerprint}")
}

/// Composes the identity key for a record id.
#[must_use]
pub fn id_key(id: &str) -> String {
    format!("id:{id}")
}

/// FNV-1a 32-bit hash over the UTF-8 bytes of a key.
///
/// Routing must be stable across sessions, so the constants are fixed:
/// seed 2166136261, prime 16777619.
#[must_use]
pub fn fnv32(key: &str) -> u32 {
    const PRIME: u32 = 16777619;

    let mut hash: u32 = 2166136261;
    for byte in key.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Returns the shard index owning a key under hash routing.
#[must_use]
pub fn shard_for_key(key: &str, shard_count: usize) -> usize {
    fnv32(key) as usize % shard_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_composition() {
        assert_eq!(unique_key("email", "a@x"), "email:a@x");
        assert_eq!(fingerprint("tag", "red"), "tag:red");
        assert_eq!(ordinal_key(3, "tag:red"), "3:tag:red");
        assert_eq!(id_key("abc"), "id:abc");
    }

    #[test]
    fn fnv32_reference_vectors() {
        // Published FNV-1a test vectors.
        assert_eq!(fnv32(""), 2166136261);
        assert_eq!(fnv32("a"), 0xe40c_292c);
        assert_eq!(fnv32("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn shard_routing_is_stable() {
        let shard = shard_for_key("email:a@x", 32);
        assert_eq!(shard, shard_for_key("email:a@x", 32));
        assert!(shard < 32);
    }

    #[test]
    fn descriptors() {
        let u = IndexDescriptor::unique("email", "a@x");
        assert!(u.unique);

        let m = IndexDescriptor::multi("tag", "red");
        assert!(!m.unique);
        assert_eq!(m.field, "tag");
        assert_eq!(m.data, "red");
    }
}
