use byteorder::{ByteOrder, LittleEndian};
use packstore_common::{Result, error::Error};

/// Maximum payload length of a single chunk (24-bit length field).
pub const MAX_CHUNK_DATA_LEN: usize = (1 << 24) - 1;

/// Size of the serialized [`ChunkMeta`] header.
pub const CHUNK_META_SIZE: usize = 4;

const LENGTH_MASK: u32 = MAX_CHUNK_DATA_LEN as u32;
const ENCODED_FLAG: u32 = 1 << 31;
const RESERVED_MASK: u32 = !(LENGTH_MASK | ENCODED_FLAG);

/// Fixed-size chunk header: payload length and the encoded flag.
///
/// The encoded flag is reserved for a compressed chunk variant; writers in this
/// crate always emit `false` and decoders reject chunks that carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMeta {
    length: u32,
    is_encoded: bool,
}

impl ChunkMeta {
    /// Creates a header for a plain (non-encoded) payload of `length` bytes.
    pub fn new(length: usize) -> Result<ChunkMeta> {
        if length > MAX_CHUNK_DATA_LEN {
            return Err(Error::capacity(
                "chunk payload",
                length as u64,
                MAX_CHUNK_DATA_LEN as u64,
            ));
        }
        Ok(ChunkMeta {
            length: length as u32,
            is_encoded: false,
        })
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length as usize
    }

    #[inline]
    pub fn is_encoded(&self) -> bool {
        self.is_encoded
    }

    pub fn to_bytes(&self) -> [u8; CHUNK_META_SIZE] {
        let mut word = self.length & LENGTH_MASK;
        if self.is_encoded {
            word |= ENCODED_FLAG;
        }
        let mut buf = [0u8; CHUNK_META_SIZE];
        LittleEndian::write_u32(&mut buf, word);
        buf
    }

    /// Parses a header from the first [`CHUNK_META_SIZE`] bytes of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<ChunkMeta> {
        if buf.len() < CHUNK_META_SIZE {
            return Err(Error::invalid_format(
                "chunk meta",
                format!("truncated header: {} bytes", buf.len()),
            ));
        }
        let word = LittleEndian::read_u32(&buf[..CHUNK_META_SIZE]);
        if word & RESERVED_MASK != 0 {
            return Err(Error::invalid_format(
                "chunk meta",
                format!("reserved bits set: {word:#010x}"),
            ));
        }
        Ok(ChunkMeta {
            length: word & LENGTH_MASK,
            is_encoded: word & ENCODED_FLAG != 0,
        })
    }

    /// Fails for chunks this crate cannot decode.
    pub(crate) fn ensure_plain(&self) -> Result<()> {
        if self.is_encoded {
            return Err(Error::not_implemented("encoded chunk payloads"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use packstore_common::error::ErrorKind;

    use super::*;

    #[test]
    fn test_meta_roundtrip() {
        for len in [0, 1, 4096, MAX_CHUNK_DATA_LEN] {
            let meta = ChunkMeta::new(len).unwrap();
            let parsed = ChunkMeta::from_bytes(&meta.to_bytes()).unwrap();
            assert_eq!(parsed, meta);
            assert_eq!(parsed.length(), len);
            assert!(!parsed.is_encoded());
        }
    }

    #[test]
    fn test_meta_rejects_oversize() {
        let err = ChunkMeta::new(MAX_CHUNK_DATA_LEN + 1).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::CapacityExceeded { .. }));
    }

    #[test]
    fn test_meta_encoded_flag() {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, ENCODED_FLAG | 17);
        let meta = ChunkMeta::from_bytes(&buf).unwrap();
        assert!(meta.is_encoded());
        assert_eq!(meta.length(), 17);
        assert!(matches!(
            meta.ensure_plain().unwrap_err().kind(),
            ErrorKind::NotImplemented { .. }
        ));
    }

    #[test]
    fn test_meta_rejects_reserved_bits() {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, 1 << 24);
        assert!(ChunkMeta::from_bytes(&buf).unwrap_err().is_data_corruption());
        assert!(ChunkMeta::from_bytes(&buf[..2]).unwrap_err().is_data_corruption());
    }
}
