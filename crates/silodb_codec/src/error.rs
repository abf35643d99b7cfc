//! Error types for the block codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding blocks.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The record id does not fit the 16-bit length field.
    #[error("record id too long: {len} bytes")]
    IdTooLong {
        /// Byte length of the offending id.
        len: usize,
    },

    /// The encoded block would exceed the 32-bit length field.
    #[error("block too large: {size} bytes")]
    BlockTooLarge {
        /// Total size the block would have had.
        size: usize,
    },

    /// Fewer bytes available than the block requires.
    #[error("truncated block: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes the block header claims.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The internal lengths of the block disagree.
    #[error("block length mismatch: {message}")]
    LengthMismatch {
        /// Description of the inconsistency.
        message: String,
    },

    /// Stored checksum doesn't match the computed one.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the block.
        expected: u32,
        /// Checksum computed over the block contents.
        actual: u32,
    },

    /// The record id is not valid UTF-8.
    #[error("record id is not valid UTF-8")]
    InvalidId,
}

impl CodecError {
    /// Creates a length mismatch error.
    pub fn length_mismatch(message: impl Into<String>) -> Self {
        Self::LengthMismatch {
            message: message.into(),
        }
    }
}
