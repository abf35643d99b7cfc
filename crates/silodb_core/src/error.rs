//! Error types for the SiloDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SiloDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] silodb_storage::StorageError),

    /// Block codec error.
    #[error("codec error: {0}")]
    Codec(#[from] silodb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No live record under the given key.
    #[error("not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: String,
    },

    /// A restore targeted a key whose record was already compacted away.
    #[error("already evicted: {key}")]
    AlreadyEvicted {
        /// The key that was targeted.
        key: String,
    },

    /// A unique index insert collided with an existing entry.
    #[error("duplicate unique key {key:?} in shard {shard}")]
    DuplicateKey {
        /// The colliding index key.
        key: String,
        /// The shard that owns the existing entry.
        shard: usize,
    },

    /// An invalid argument was passed to an API.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument issue.
        message: String,
    },

    /// A persisted index structure is unreadable.
    #[error("index corruption: {message}")]
    IndexCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the store directory lock.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates an already-evicted error.
    pub fn already_evicted(key: impl Into<String>) -> Self {
        Self::AlreadyEvicted { key: key.into() }
    }

    /// Creates a duplicate-key error.
    pub fn duplicate_key(key: impl Into<String>, shard: usize) -> Self {
        Self::DuplicateKey {
            key: key.into(),
            shard,
        }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an index-corruption error.
    pub fn index_corruption(message: impl Into<String>) -> Self {
        Self::IndexCorruption {
            message: message.into(),
        }
    }
}
