use ahash::AHashMap;
use packstore_chunk::{ChunkWriter, MAX_CHUNK_DATA_LEN};
use packstore_common::{Result, error::Error};
use packstore_io::SealingWrite;

use crate::segment::{DumpStats, OffsetEntry, SegmentFooter};

/// Streams packed values into a data file of chunks and the matching offsets file.
///
/// Small values are batched into a shared chunk until it reaches the payload target;
/// a value at least as large as the target is stored in a chunk of its own.
pub struct SegmentDataWriter<D, O> {
    data: ChunkWriter<D>,
    offsets: O,
    pending: Vec<u8>,
    pending_values: usize,
    chunk_payload_target: usize,
    dedup: Option<AHashMap<Vec<u8>, OffsetEntry>>,
    doc_count: u32,
    max_value_len: u32,
    uniq_hits: u32,
}

impl<D: SealingWrite, O: SealingWrite> SegmentDataWriter<D, O> {
    pub fn new(data: D, offsets: O, chunk_payload_target: usize, uniq_encode: bool) -> Self {
        let chunk_payload_target = chunk_payload_target.clamp(1, MAX_CHUNK_DATA_LEN);
        SegmentDataWriter {
            data: ChunkWriter::new(data),
            offsets,
            pending: Vec::with_capacity(chunk_payload_target),
            pending_values: 0,
            chunk_payload_target,
            dedup: uniq_encode.then(AHashMap::new),
            doc_count: 0,
            max_value_len: 0,
            uniq_hits: 0,
        }
    }

    /// Appends the value of the next document.
    pub fn push(&mut self, value: &[u8]) -> Result<OffsetEntry> {
        if self.doc_count == u32::MAX {
            return Err(Error::capacity(
                "segment document count",
                self.doc_count as u64 + 1,
                u32::MAX as u64,
            ));
        }
        if value.len() > MAX_CHUNK_DATA_LEN {
            log::warn!(
                "SegmentDataWriter: packed value of {} bytes does not fit a chunk",
                value.len()
            );
            return Err(Error::capacity(
                "packed value",
                value.len() as u64,
                MAX_CHUNK_DATA_LEN as u64,
            ));
        }

        let reused = self
            .dedup
            .as_ref()
            .and_then(|dedup| dedup.get(value).copied());
        let entry = match reused {
            Some(entry) => {
                self.uniq_hits += 1;
                entry
            }
            None => self.store(value)?,
        };

        self.offsets
            .write_all(&entry.to_bytes())
            .map_err(|e| Error::io("segment offsets", e))?;
        self.doc_count += 1;
        self.max_value_len = self.max_value_len.max(value.len() as u32);
        Ok(entry)
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Flushes the last chunk, writes the offsets footer and seals both files.
    pub fn finish(mut self) -> Result<DumpStats> {
        self.flush_pending()?;
        let footer = SegmentFooter {
            doc_count: self.doc_count,
            max_value_len: self.max_value_len,
        };
        self.offsets
            .write_all(&footer.to_bytes())
            .map_err(|e| Error::io("segment offsets", e))?;
        self.offsets
            .seal()
            .map_err(|e| Error::io("segment offsets", e))?;

        let stats = DumpStats {
            doc_count: self.doc_count,
            chunk_count: self.data.chunk_count(),
            data_bytes: self.data.position(),
            max_value_len: self.max_value_len,
            uniq_hits: self.uniq_hits,
        };
        self.data.seal()?;
        Ok(stats)
    }

    fn store(&mut self, value: &[u8]) -> Result<OffsetEntry> {
        let entry = if value.len() >= self.chunk_payload_target {
            self.flush_pending()?;
            OffsetEntry {
                chunk_offset: self.data.write(value)?,
                in_chunk_offset: 0,
                len: value.len() as u32,
            }
        } else {
            if self.pending.len() + value.len() > self.chunk_payload_target {
                self.flush_pending()?;
            }
            // The pending chunk is always the next one written.
            let entry = OffsetEntry {
                chunk_offset: self.data.position(),
                in_chunk_offset: self.pending.len() as u32,
                len: value.len() as u32,
            };
            self.pending.extend_from_slice(value);
            self.pending_values += 1;
            entry
        };
        if let Some(dedup) = self.dedup.as_mut() {
            dedup.insert(value.to_vec(), entry);
        }
        Ok(entry)
    }

    fn flush_pending(&mut self) -> Result<()> {
        if self.pending_values > 0 {
            self.data.write(&self.pending)?;
            self.pending.clear();
            self.pending_values = 0;
        }
        Ok(())
    }
}
