//! On-disk layout of a dumped pack attribute column.
//!
//! A column consists of two files:
//! - data: a sequence of chunks (see `packstore_chunk`), each holding one or more
//!   packed values back to back;
//! - offsets: one [`OffsetEntry`] per document followed by a [`SegmentFooter`].

use byteorder::{ByteOrder, LittleEndian};
use packstore_common::{Result, error::Error};

pub const OFFSET_ENTRY_SIZE: usize = 16;
pub const SEGMENT_FOOTER_SIZE: usize = 8;

/// Location of one document's packed value in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffsetEntry {
    /// Offset of the chunk header in the data file.
    pub chunk_offset: u64,
    /// Offset of the value within the chunk payload.
    pub in_chunk_offset: u32,
    pub len: u32,
}

impl OffsetEntry {
    pub fn to_bytes(&self) -> [u8; OFFSET_ENTRY_SIZE] {
        let mut buf = [0u8; OFFSET_ENTRY_SIZE];
        LittleEndian::write_u64(&mut buf[0..8], self.chunk_offset);
        LittleEndian::write_u32(&mut buf[8..12], self.in_chunk_offset);
        LittleEndian::write_u32(&mut buf[12..16], self.len);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<OffsetEntry> {
        let buf = buf.get(..OFFSET_ENTRY_SIZE).ok_or_else(|| {
            Error::invalid_format("offset entry", format!("truncated: {} bytes", buf.len()))
        })?;
        Ok(OffsetEntry {
            chunk_offset: LittleEndian::read_u64(&buf[0..8]),
            in_chunk_offset: LittleEndian::read_u32(&buf[8..12]),
            len: LittleEndian::read_u32(&buf[12..16]),
        })
    }
}

/// Trailer of the offsets file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentFooter {
    pub doc_count: u32,
    pub max_value_len: u32,
}

impl SegmentFooter {
    pub fn to_bytes(&self) -> [u8; SEGMENT_FOOTER_SIZE] {
        let mut buf = [0u8; SEGMENT_FOOTER_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.doc_count);
        LittleEndian::write_u32(&mut buf[4..8], self.max_value_len);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<SegmentFooter> {
        let buf = buf.get(..SEGMENT_FOOTER_SIZE).ok_or_else(|| {
            Error::invalid_format("segment footer", format!("truncated: {} bytes", buf.len()))
        })?;
        Ok(SegmentFooter {
            doc_count: LittleEndian::read_u32(&buf[0..4]),
            max_value_len: LittleEndian::read_u32(&buf[4..8]),
        })
    }

    /// Expected size of an offsets file ending with this footer.
    pub fn offsets_file_size(&self) -> u64 {
        self.doc_count as u64 * OFFSET_ENTRY_SIZE as u64 + SEGMENT_FOOTER_SIZE as u64
    }
}

/// Summary of a dumped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DumpStats {
    pub doc_count: u32,
    pub chunk_count: usize,
    /// Total size of the data file.
    pub data_bytes: u64,
    pub max_value_len: u32,
    /// Values that were stored as a reference to an identical earlier value.
    pub uniq_hits: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_entry_layout() {
        let entry = OffsetEntry {
            chunk_offset: 0x0102_0304_0506_0708,
            in_chunk_offset: 17,
            len: 300,
        };
        let bytes = entry.to_bytes();
        assert_eq!(&bytes[..8], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(OffsetEntry::from_bytes(&bytes).unwrap(), entry);
        assert!(OffsetEntry::from_bytes(&bytes[..15]).unwrap_err().is_data_corruption());
    }

    #[test]
    fn test_footer() {
        let footer = SegmentFooter {
            doc_count: 3,
            max_value_len: 99,
        };
        assert_eq!(SegmentFooter::from_bytes(&footer.to_bytes()).unwrap(), footer);
        assert_eq!(footer.offsets_file_size(), 3 * 16 + 8);
    }
}
