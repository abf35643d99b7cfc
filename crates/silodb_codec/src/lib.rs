//! # SiloDB Codec
//!
//! Deterministic record block encoding for SiloDB.
//!
//! A record `{id, payload}` is serialized into a self-delimiting byte
//! block. Blocks are concatenated in shard files; because every block
//! carries its own length prefix, a shard file can be re-scanned from the
//! start after a restart even when no in-memory index survives.
//!
//! ## Block Format
//!
//! All integers little-endian:
//!
//! ```text
//! | block_len (4) | id_len (2) | id (UTF-8) | payload (N) | crc32 (4) |
//! ```
//!
//! `block_len` counts the entire block, including itself and the trailing
//! CRC. The CRC is computed over everything before it.
//!
//! ## Usage
//!
//! ```
//! use silodb_codec::Block;
//!
//! let block = Block::new("rec-1".to_string(), b"payload".to_vec());
//! let bytes = block.encode().unwrap();
//! let decoded = Block::decode(&bytes).unwrap();
//! assert_eq!(block, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod error;

pub use block::{Block, LEN_PREFIX_SIZE};
pub use error::{CodecError, CodecResult};

/// Computes CRC32 checksum for data.
pub fn crc32(data: &[u8]) -> u32 {
    // CRC32, IEEE polynomial.
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
