use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use packstore_attribute::DocId;
use packstore_common::{Result, error::Error, verify_data};
use packstore_io::SealingWrite;

/// Fixed-capacity set of the documents of a segment that received updates.
///
/// Bits can be set concurrently through a shared reference.
///
/// Serialized form: `[capacity: u32 LE][words: u64 LE]*`.
pub struct SegmentUpdateBitmap {
    words: Vec<AtomicU64>,
    capacity: u32,
}

impl SegmentUpdateBitmap {
    pub fn new(capacity: u32) -> SegmentUpdateBitmap {
        let words = (0..Self::word_count(capacity))
            .map(|_| AtomicU64::new(0))
            .collect();
        SegmentUpdateBitmap { words, capacity }
    }

    /// Number of documents covered.
    pub fn len(&self) -> u32 {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.capacity == 0
    }

    /// Marks `doc_id` as updated. Returns whether the bit was previously unset.
    pub fn set(&self, doc_id: DocId) -> Result<bool> {
        if doc_id >= self.capacity {
            return Err(Error::invalid_arg(
                "doc_id",
                format!(
                    "document {doc_id} is outside the update bitmap of {} documents",
                    self.capacity
                ),
            ));
        }
        let mask = 1u64 << (doc_id % 64);
        let prev = self.words[(doc_id / 64) as usize].fetch_or(mask, Ordering::Relaxed);
        Ok(prev & mask == 0)
    }

    pub fn get(&self, doc_id: DocId) -> bool {
        if doc_id >= self.capacity {
            return false;
        }
        let word = self.words[(doc_id / 64) as usize].load(Ordering::Relaxed);
        word & (1u64 << (doc_id % 64)) != 0
    }

    pub fn count_set(&self) -> u32 {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones())
            .sum()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 4 + self.words.len() * 8];
        LittleEndian::write_u32(&mut buf[0..4], self.capacity);
        for (word, dst) in self.words.iter().zip(buf[4..].chunks_exact_mut(8)) {
            LittleEndian::write_u64(dst, word.load(Ordering::Relaxed));
        }
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<SegmentUpdateBitmap> {
        verify_data!(update_bitmap, buf.len() >= 4);
        let capacity = LittleEndian::read_u32(&buf[0..4]);
        let expected = 4 + Self::word_count(capacity) * 8;
        if buf.len() != expected {
            return Err(Error::invalid_format(
                "update bitmap",
                format!(
                    "{} bytes for {capacity} documents, expected {expected}",
                    buf.len()
                ),
            ));
        }
        let words = buf[4..]
            .chunks_exact(8)
            .map(|w| AtomicU64::new(LittleEndian::read_u64(w)))
            .collect::<Vec<_>>();
        if capacity % 64 != 0 {
            let tail = words.last().map_or(0, |w| w.load(Ordering::Relaxed));
            if tail >> (capacity % 64) != 0 {
                return Err(Error::invalid_format(
                    "update bitmap",
                    "bits set beyond capacity",
                ));
            }
        }
        Ok(SegmentUpdateBitmap { words, capacity })
    }

    /// Writes the serialized bitmap and seals the sink.
    pub fn write_to(&self, sink: &mut dyn SealingWrite) -> Result<()> {
        sink.write_all(&self.to_bytes())
            .map_err(|e| Error::io("update bitmap", e))?;
        sink.seal().map_err(|e| Error::io("update bitmap", e))
    }

    fn word_count(capacity: u32) -> usize {
        (capacity as usize).div_ceil(64)
    }
}

impl std::fmt::Debug for SegmentUpdateBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentUpdateBitmap")
            .field("capacity", &self.capacity)
            .field("set", &self.count_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use packstore_common::error::ErrorKind;

    use super::*;

    #[test]
    fn test_set_get() {
        let bitmap = SegmentUpdateBitmap::new(130);
        assert!(bitmap.set(0).unwrap());
        assert!(bitmap.set(129).unwrap());
        assert!(!bitmap.set(129).unwrap());
        assert!(bitmap.get(129));
        assert!(!bitmap.get(64));
        assert!(!bitmap.get(1000));
        assert_eq!(bitmap.count_set(), 2);

        let err = bitmap.set(130).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn test_serialization() {
        let bitmap = SegmentUpdateBitmap::new(70);
        for doc in [3, 64, 69] {
            bitmap.set(doc).unwrap();
        }
        let bytes = bitmap.to_bytes();
        assert_eq!(bytes.len(), 4 + 2 * 8);
        let copy = SegmentUpdateBitmap::from_bytes(&bytes).unwrap();
        assert_eq!(copy.len(), 70);
        assert_eq!(copy.count_set(), 3);
        assert!(copy.get(69));

        let mut sink = Vec::new();
        bitmap.write_to(&mut sink).unwrap();
        assert_eq!(sink, bytes);

        assert!(SegmentUpdateBitmap::from_bytes(&bytes[..10]).is_err());
        let mut overflow = bytes.clone();
        overflow[4 + 8 + 7] = 0x80;
        assert!(
            SegmentUpdateBitmap::from_bytes(&overflow)
                .unwrap_err()
                .is_data_corruption()
        );
    }

    #[test]
    fn test_concurrent_set() {
        let bitmap = Arc::new(SegmentUpdateBitmap::new(4096));
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let bitmap = bitmap.clone();
                s.spawn(move || {
                    for doc in (t..4096).step_by(4) {
                        bitmap.set(doc).unwrap();
                    }
                });
            }
        });
        assert_eq!(bitmap.count_set(), 4096);
    }
}
