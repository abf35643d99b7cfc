//! Record block encoding and decoding.

use crate::crc32;
use crate::error::{CodecError, CodecResult};

/// Size of the `block_len` prefix at the start of every block.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Header size: block_len (4) + id_len (2).
const HEADER_SIZE: usize = 6;
/// CRC size.
const CRC_SIZE: usize = 4;

/// A record block: the unit written to a shard file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Record identifier.
    pub id: String,
    /// Opaque payload supplied by the host.
    pub payload: Vec<u8>,
}

impl Block {
    /// Creates a new block.
    #[must_use]
    pub fn new(id: String, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Returns the encoded size of this block.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.id.len() + self.payload.len() + CRC_SIZE
    }

    /// Encodes the block to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::IdTooLong`] if the id exceeds the 16-bit
    /// length field, or [`CodecError::BlockTooLarge`] if the total block
    /// exceeds the 32-bit length field.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let id_bytes = self.id.as_bytes();
        if id_bytes.len() > usize::from(u16::MAX) {
            return Err(CodecError::IdTooLong {
                len: id_bytes.len(),
            });
        }

        let block_len = self.encoded_size();
        if u32::try_from(block_len).is_err() {
            return Err(CodecError::BlockTooLarge { size: block_len });
        }

        let mut buf = Vec::with_capacity(block_len);
        buf.extend_from_slice(&(block_len as u32).to_le_bytes());
        buf.extend_from_slice(&(id_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(id_bytes);
        buf.extend_from_slice(&self.payload);

        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        Ok(buf)
    }

    /// Reads the total block length from a length prefix.
    ///
    /// `prefix` must hold at least [`LEN_PREFIX_SIZE`] bytes. Used when
    /// forward-scanning a shard file block by block.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is short or the declared length is
    /// smaller than the smallest possible block.
    pub fn frame_len(prefix: &[u8]) -> CodecResult<usize> {
        if prefix.len() < LEN_PREFIX_SIZE {
            return Err(CodecError::Truncated {
                needed: LEN_PREFIX_SIZE,
                available: prefix.len(),
            });
        }

        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if len < HEADER_SIZE + CRC_SIZE {
            return Err(CodecError::length_mismatch(format!(
                "declared block length {len} below minimum"
            )));
        }

        Ok(len)
    }

    /// Decodes a block from bytes.
    ///
    /// `data` must start at a block boundary and contain the whole block;
    /// trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error on truncation, inconsistent lengths, checksum
    /// mismatch, or a non-UTF-8 id.
    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        let block_len = Self::frame_len(data)?;

        if data.len() < block_len {
            return Err(CodecError::Truncated {
                needed: block_len,
                available: data.len(),
            });
        }

        let stored_crc = u32::from_le_bytes([
            data[block_len - 4],
            data[block_len - 3],
            data[block_len - 2],
            data[block_len - 1],
        ]);
        let computed_crc = crc32(&data[..block_len - CRC_SIZE]);
        if stored_crc != computed_crc {
            return Err(CodecError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let id_len = usize::from(u16::from_le_bytes([data[4], data[5]]));
        if HEADER_SIZE + id_len + CRC_SIZE > block_len {
            return Err(CodecError::length_mismatch(format!(
                "id length {id_len} exceeds block length {block_len}"
            )));
        }

        let id = std::str::from_utf8(&data[HEADER_SIZE..HEADER_SIZE + id_len])
            .map_err(|_| CodecError::InvalidId)?
            .to_string();

        let payload = data[HEADER_SIZE + id_len..block_len - CRC_SIZE].to_vec();

        Ok(Self { id, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_roundtrip() {
        let block = Block::new("rec-42".to_string(), vec![0xCA, 0xFE, 0xBA, 0xBE]);

        let encoded = block.encode().unwrap();
        let decoded = Block::decode(&encoded).unwrap();

        assert_eq!(block, decoded);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let block = Block::new("only-id".to_string(), Vec::new());

        let encoded = block.encode().unwrap();
        let decoded = Block::decode(&encoded).unwrap();

        assert_eq!(decoded.id, "only-id");
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn encoded_size_matches() {
        let block = Block::new("abc".to_string(), vec![1, 2, 3, 4, 5]);
        assert_eq!(block.encoded_size(), block.encode().unwrap().len());
    }

    #[test]
    fn frame_len_reads_prefix() {
        let block = Block::new("abc".to_string(), vec![9; 10]);
        let encoded = block.encode().unwrap();

        assert_eq!(Block::frame_len(&encoded).unwrap(), encoded.len());
    }

    #[test]
    fn trailing_bytes_ignored() {
        let block = Block::new("x".to_string(), vec![7; 3]);
        let mut encoded = block.encode().unwrap();
        encoded.extend_from_slice(b"next block starts here");

        let decoded = Block::decode(&encoded).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn detect_corruption() {
        let block = Block::new("rec".to_string(), vec![1, 2, 3]);
        let mut encoded = block.encode().unwrap();
        encoded[8] ^= 0xFF;

        let result = Block::decode(&encoded);
        assert!(matches!(result, Err(CodecError::ChecksumMismatch { .. })));
    }

    #[test]
    fn detect_truncation() {
        let block = Block::new("rec".to_string(), vec![1, 2, 3]);
        let encoded = block.encode().unwrap();

        let result = Block::decode(&encoded[..encoded.len() - 2]);
        assert!(matches!(result, Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn reject_oversized_id() {
        let block = Block::new("i".repeat(usize::from(u16::MAX) + 1), Vec::new());
        let result = block.encode();
        assert!(matches!(result, Err(CodecError::IdTooLong { .. })));
    }

    #[test]
    fn reject_undersized_frame() {
        // A declared length below header + crc can never be a block.
        let data = [3u8, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let result = Block::decode(&data);
        assert!(matches!(result, Err(CodecError::LengthMismatch { .. })));
    }

    #[test]
    fn payload_is_opaque() {
        // Arbitrary bytes survive, including ones that look like framing.
        let payload = vec![0, 0, 0, 0, 255, 10, 13, 0];
        let block = Block::new("bin".to_string(), payload.clone());

        let decoded = Block::decode(&block.encode().unwrap()).unwrap();
        assert_eq!(decoded.payload, payload);
    }
}
