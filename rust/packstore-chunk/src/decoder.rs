use std::{ops::Range, sync::Arc};

use bytes::Bytes;
use packstore_common::{Result, async_runtime, error::Error};
use packstore_io::{AsyncReadAt, ReadAt};

use crate::meta::{CHUNK_META_SIZE, ChunkMeta};

/// Obtains the payload of the chunk whose header starts at `offset`.
///
/// Implementations differ only in where the bytes come from; all of them return
/// exactly the payload that [`ChunkWriter::write`](crate::ChunkWriter::write) was
/// given.
pub trait ChunkDecoder: Send + Sync {
    fn decode(&self, offset: u64) -> Result<Bytes>;
}

impl<T: ChunkDecoder + ?Sized> ChunkDecoder for Arc<T> {
    fn decode(&self, offset: u64) -> Result<Bytes> {
        self.as_ref().decode(offset)
    }
}

/// Returns the payload of the chunk at `offset` within `base`, without copying.
///
/// The returned slice borrows from `base`.
pub fn decode_from_memory(base: &[u8], offset: u64) -> Result<&[u8]> {
    let header = usize::try_from(offset)
        .ok()
        .and_then(|start| base.get(start..))
        .ok_or_else(|| {
            Error::invalid_format(
                "chunk",
                format!("header offset {offset} is beyond the buffer end {}", base.len()),
            )
        })?;
    let meta = ChunkMeta::from_bytes(header)?;
    meta.ensure_plain()?;
    header
        .get(CHUNK_META_SIZE..CHUNK_META_SIZE + meta.length())
        .ok_or_else(|| truncated_chunk(offset, meta.length(), header.len() - CHUNK_META_SIZE))
}

/// Reads the chunk at `offset` from a positional reader, blocking the calling thread.
pub fn decode_from_file(reader: &dyn ReadAt, offset: u64) -> Result<Bytes> {
    let header = reader
        .read_at(offset_range(offset, 0, CHUNK_META_SIZE)?)
        .map_err(|e| Error::io("chunk meta", e))?;
    let meta = ChunkMeta::from_bytes(&header)?;
    meta.ensure_plain()?;
    let payload = reader
        .read_at(offset_range(offset, CHUNK_META_SIZE, meta.length())?)
        .map_err(|e| Error::io("chunk payload", e))?;
    if payload.len() != meta.length() {
        return Err(truncated_chunk(offset, meta.length(), payload.len()));
    }
    Ok(payload)
}

/// Reads the chunk at `offset` through an async reader.
///
/// The calling task suspends on both the header and the payload read.
pub async fn decode_from_file_async(reader: &dyn AsyncReadAt, offset: u64) -> Result<Bytes> {
    let header = reader
        .read_at(offset_range(offset, 0, CHUNK_META_SIZE)?)
        .await
        .map_err(|e| Error::io("chunk meta", e))?;
    let meta = ChunkMeta::from_bytes(&header)?;
    meta.ensure_plain()?;
    let payload = reader
        .read_at(offset_range(offset, CHUNK_META_SIZE, meta.length())?)
        .await
        .map_err(|e| Error::io("chunk payload", e))?;
    if payload.len() != meta.length() {
        return Err(truncated_chunk(offset, meta.length(), payload.len()));
    }
    Ok(payload)
}

/// Byte range `offset + skip .. offset + skip + len`, or a format error when a
/// corrupt offset would push it past `u64::MAX`.
fn offset_range(offset: u64, skip: usize, len: usize) -> Result<Range<u64>> {
    offset
        .checked_add(skip as u64)
        .and_then(|start| Some(start..start.checked_add(len as u64)?))
        .ok_or_else(|| {
            Error::invalid_format(
                "chunk",
                format!("chunk at {offset} of {len} bytes overflows the address space"),
            )
        })
}

fn truncated_chunk(offset: u64, expected: usize, actual: usize) -> Error {
    Error::invalid_format(
        "chunk",
        format!("truncated chunk at {offset}: expected {expected} payload bytes, found {actual}"),
    )
}

/// Zero-copy decoder over a fully resident buffer.
#[derive(Clone)]
pub struct MemoryChunkDecoder {
    base: Bytes,
}

impl MemoryChunkDecoder {
    pub fn new(base: Bytes) -> MemoryChunkDecoder {
        MemoryChunkDecoder { base }
    }

    /// Loads the entire content of `reader` into memory.
    pub fn load(reader: &dyn ReadAt) -> Result<MemoryChunkDecoder> {
        let size = reader.size().map_err(|e| Error::io("chunk file size", e))?;
        let base = packstore_io::utils::read_exact_at(reader, 0, size as usize)
            .map_err(|e| Error::io("chunk file load", e))?;
        Ok(MemoryChunkDecoder { base })
    }

    pub fn base(&self) -> &Bytes {
        &self.base
    }
}

impl ChunkDecoder for MemoryChunkDecoder {
    fn decode(&self, offset: u64) -> Result<Bytes> {
        let payload = decode_from_memory(&self.base, offset)?;
        Ok(self.base.slice_ref(payload))
    }
}

/// Decoder that reads each chunk from a positional reader into a fresh buffer.
#[derive(Clone)]
pub struct FileChunkDecoder {
    reader: Arc<dyn ReadAt>,
}

impl FileChunkDecoder {
    pub fn new(reader: Arc<dyn ReadAt>) -> FileChunkDecoder {
        FileChunkDecoder { reader }
    }

    pub fn reader(&self) -> &Arc<dyn ReadAt> {
        &self.reader
    }

    /// Reads the chunk at `offset`, blocking the calling thread.
    pub fn decode_blocking(&self, offset: u64) -> Result<Bytes> {
        decode_from_file(self.reader.as_ref(), offset)
    }
}

impl ChunkDecoder for FileChunkDecoder {
    fn decode(&self, offset: u64) -> Result<Bytes> {
        self.decode_blocking(offset)
    }
}

/// Decoder over an [`AsyncReadAt`].
///
/// [`decode`](AsyncFileChunkDecoder::decode) suspends the calling task; the
/// [`ChunkDecoder`] implementation drives the same operation to completion on the
/// calling thread and must not be used from within an async task.
#[derive(Clone)]
pub struct AsyncFileChunkDecoder {
    reader: Arc<dyn AsyncReadAt>,
}

impl AsyncFileChunkDecoder {
    pub fn new(reader: Arc<dyn AsyncReadAt>) -> AsyncFileChunkDecoder {
        AsyncFileChunkDecoder { reader }
    }

    pub async fn decode(&self, offset: u64) -> Result<Bytes> {
        decode_from_file_async(self.reader.as_ref(), offset).await
    }
}

impl ChunkDecoder for AsyncFileChunkDecoder {
    fn decode(&self, offset: u64) -> Result<Bytes> {
        async_runtime::block_on(decode_from_file_async(self.reader.as_ref(), offset))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use packstore_common::error::ErrorKind;
    use packstore_io::{
        BlockingReadAdapter, ReadAt, SealingWrite,
        file::{FileReader, FileWriter},
    };

    use super::*;
    use crate::ChunkWriter;

    fn build_chunks(payloads: &[&[u8]]) -> (Vec<u8>, Vec<u64>) {
        let mut writer = ChunkWriter::new(Vec::<u8>::new());
        let offsets = payloads
            .iter()
            .map(|p| writer.write(p).unwrap())
            .collect::<Vec<_>>();
        (writer.seal().unwrap(), offsets)
    }

    #[test]
    fn test_memory_decoder_zero_copy() {
        let (buf, offsets) = build_chunks(&[b"alpha", b"beta", b""]);
        let base = Bytes::from(buf);
        let decoder = MemoryChunkDecoder::new(base.clone());
        let beta = decoder.decode(offsets[1]).unwrap();
        assert_eq!(beta.as_ref(), b"beta");
        let expected_ptr = base[offsets[1] as usize + CHUNK_META_SIZE..].as_ptr();
        assert_eq!(beta.as_ptr(), expected_ptr);
        assert!(decoder.decode(offsets[2]).unwrap().is_empty());
    }

    #[test]
    fn test_memory_decoder_bounds() {
        let (buf, offsets) = build_chunks(&[b"alpha"]);
        assert!(decode_from_memory(&buf, 100).unwrap_err().is_data_corruption());
        let truncated = &buf[..buf.len() - 1];
        assert!(
            decode_from_memory(truncated, offsets[0])
                .unwrap_err()
                .is_data_corruption()
        );
    }

    #[test]
    fn test_file_decoder() {
        let payloads: Vec<Vec<u8>> = (0..20)
            .map(|i| (0..i * 37).map(|b| b as u8).collect())
            .collect();
        let refs = payloads.iter().map(|p| p.as_slice()).collect::<Vec<_>>();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.bin");
        let mut writer = ChunkWriter::new(FileWriter::create(&path).unwrap());
        let offsets = refs
            .iter()
            .map(|p| writer.write(p).unwrap())
            .collect::<Vec<_>>();
        writer.seal().unwrap();

        let decoder = FileChunkDecoder::new(Arc::new(FileReader::open(&path).unwrap()));
        for (offset, payload) in offsets.iter().zip(&payloads) {
            assert_eq!(decoder.decode(*offset).unwrap().as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn test_file_decoder_short_read() {
        let (mut buf, offsets) = build_chunks(&[b"0123456789"]);
        buf.truncate(buf.len() - 3);
        let decoder = FileChunkDecoder::new(Arc::new(buf));
        let err = decoder.decode(offsets[0]).unwrap_err();
        assert!(err.is_data_corruption());
    }

    #[test]
    fn test_encoded_chunk_is_not_supported() {
        let mut buf = Vec::new();
        buf.write_all(&(0x8000_0003u32).to_le_bytes()).unwrap();
        buf.write_all(b"abc").unwrap();
        let decoder = FileChunkDecoder::new(Arc::new(buf));
        assert!(matches!(
            decoder.decode(0).unwrap_err().kind(),
            ErrorKind::NotImplemented { .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_decoder() {
        let (buf, offsets) = build_chunks(&[b"first", b"second"]);
        let reader: Arc<dyn ReadAt> = Arc::new(buf);
        let decoder = AsyncFileChunkDecoder::new(Arc::new(BlockingReadAdapter::new(reader)));
        assert_eq!(decoder.decode(offsets[0]).await.unwrap().as_ref(), b"first");
        assert_eq!(decoder.decode(offsets[1]).await.unwrap().as_ref(), b"second");
    }

    #[test]
    fn test_offset_near_u64_max_is_corruption() {
        let (buf, _) = build_chunks(&[b"abc"]);
        let decoder = FileChunkDecoder::new(Arc::new(buf.clone()));
        assert!(decoder.decode(u64::MAX - 1).unwrap_err().is_data_corruption());
        assert!(decoder.decode(u64::MAX).unwrap_err().is_data_corruption());

        let reader = BlockingReadAdapter::new(Arc::new(buf));
        let err = async_runtime::block_on(decode_from_file_async(&reader, u64::MAX - 1)).unwrap_err();
        assert!(err.is_data_corruption());
    }

    #[test]
    fn test_async_decoder_blocking_path() {
        let (buf, offsets) = build_chunks(&[b"first", b"second"]);
        let reader: Arc<dyn ReadAt> = Arc::new(buf);
        let decoder = AsyncFileChunkDecoder::new(Arc::new(BlockingReadAdapter::new(reader)));
        let decoded = ChunkDecoder::decode(&decoder, offsets[1]).unwrap();
        assert_eq!(decoded.as_ref(), b"second");
    }

    #[test]
    fn test_all_strategies_agree() {
        let mut rng = fastrand::Rng::with_seed(7);
        let payloads: Vec<Vec<u8>> = (0..50)
            .map(|_| {
                let len = rng.usize(0..300);
                (0..len).map(|_| rng.u8(..)).collect()
            })
            .collect();
        let refs = payloads.iter().map(|p| p.as_slice()).collect::<Vec<_>>();
        let (buf, offsets) = build_chunks(&refs);
        let reader: Arc<dyn ReadAt> = Arc::new(Bytes::from(buf));

        let memory = MemoryChunkDecoder::load(reader.as_ref()).unwrap();
        let file = FileChunkDecoder::new(reader.clone());
        for (offset, payload) in offsets.iter().zip(&payloads) {
            assert_eq!(memory.decode(*offset).unwrap().as_ref(), payload.as_slice());
            assert_eq!(file.decode(*offset).unwrap().as_ref(), payload.as_slice());
        }
    }
}
