use packstore_common::{Result, error::Error};
use packstore_io::SealingWrite;

use crate::meta::{CHUNK_META_SIZE, ChunkMeta};

/// Appends length-framed chunks to a sequential sink.
pub struct ChunkWriter<W> {
    inner: W,
    pos: u64,
    chunk_count: usize,
    staging: Vec<u8>,
}

impl<W: SealingWrite> ChunkWriter<W> {
    pub fn new(inner: W) -> ChunkWriter<W> {
        ChunkWriter {
            inner,
            pos: 0,
            chunk_count: 0,
            staging: Vec::new(),
        }
    }

    /// Writes `payload` as one chunk and returns the offset of its header.
    ///
    /// Header and payload reach the sink in a single `write_all`. An oversize
    /// payload is rejected before anything reaches the sink. After an I/O error
    /// the sink content is undefined and must be discarded.
    pub fn write(&mut self, payload: &[u8]) -> Result<u64> {
        let meta = ChunkMeta::new(payload.len()).inspect_err(|_| {
            log::warn!(
                "ChunkWriter: rejecting oversize payload of {} bytes",
                payload.len()
            );
        })?;
        let offset = self.pos;
        self.staging.clear();
        self.staging.extend_from_slice(&meta.to_bytes());
        self.staging.extend_from_slice(payload);
        self.inner
            .write_all(&self.staging)
            .map_err(|e| Error::io("chunk", e))?;
        self.pos += (CHUNK_META_SIZE + payload.len()) as u64;
        self.chunk_count += 1;
        Ok(offset)
    }

    /// Total number of bytes written so far.
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Seals the underlying sink and returns it.
    pub fn seal(mut self) -> Result<W> {
        self.inner.seal().map_err(|e| Error::io("chunk seal", e))?;
        Ok(self.inner)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use packstore_common::error::ErrorKind;

    use super::*;
    use crate::{MAX_CHUNK_DATA_LEN, decode_from_memory};

    #[test]
    fn test_write_chunks() {
        let mut writer = ChunkWriter::new(Vec::<u8>::new());
        let first = writer.write(b"hello").unwrap();
        let second = writer.write(b"").unwrap();
        let third = writer.write(b"world!").unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 9);
        assert_eq!(third, 13);
        assert_eq!(writer.chunk_count(), 3);
        let buf = writer.seal().unwrap();
        assert_eq!(buf.len(), 23);
        assert_eq!(decode_from_memory(&buf, first).unwrap(), b"hello");
        assert_eq!(decode_from_memory(&buf, second).unwrap(), b"");
        assert_eq!(decode_from_memory(&buf, third).unwrap(), b"world!");
    }

    #[test]
    fn test_oversize_payload_leaves_sink_untouched() {
        let mut writer = ChunkWriter::new(Vec::<u8>::new());
        writer.write(b"abc").unwrap();
        let payload = vec![0u8; MAX_CHUNK_DATA_LEN + 1];
        let err = writer.write(&payload).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::CapacityExceeded { .. }));
        assert_eq!(writer.position(), 7);
        assert_eq!(writer.into_inner().len(), 7);
    }

    struct FailingSink;

    impl SealingWrite for FailingSink {
        fn write_all(&mut self, _buf: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }

        fn seal(&mut self) -> std::io::Result<()> {
            Ok(())
        }

        fn storage_profile(&self) -> packstore_io::StorageProfile {
            Default::default()
        }
    }

    #[derive(Default)]
    struct CountingSink {
        writes: Vec<Vec<u8>>,
    }

    impl SealingWrite for CountingSink {
        fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
            self.writes.push(buf.to_vec());
            Ok(())
        }

        fn seal(&mut self) -> std::io::Result<()> {
            Ok(())
        }

        fn storage_profile(&self) -> packstore_io::StorageProfile {
            Default::default()
        }
    }

    #[test]
    fn test_chunk_is_one_write() {
        let mut writer = ChunkWriter::new(CountingSink::default());
        writer.write(b"hello").unwrap();
        writer.write(b"").unwrap();
        let sink = writer.into_inner();
        assert_eq!(sink.writes.len(), 2);
        assert_eq!(sink.writes[0].len(), CHUNK_META_SIZE + 5);
        assert_eq!(decode_from_memory(&sink.writes[0], 0).unwrap(), b"hello");
        assert_eq!(sink.writes[1].len(), CHUNK_META_SIZE);
    }

    #[test]
    fn test_sink_failure_is_io_error() {
        let mut writer = ChunkWriter::new(FailingSink);
        let err = writer.write(b"x").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io { .. }));
    }
}
