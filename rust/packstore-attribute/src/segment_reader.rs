use std::sync::{Arc, Mutex};

use bytes::Bytes;
use packstore_chunk::ChunkDecoder;
use packstore_common::{Result, error::Error};
use packstore_io::{ReadAt, utils::read_exact_at};

use crate::{
    DocId,
    formatter::PackAttributeFormatter,
    segment::{OFFSET_ENTRY_SIZE, OffsetEntry, SEGMENT_FOOTER_SIZE, SegmentFooter},
};

/// Random access to the packed values of a dumped segment.
///
/// The offsets file is loaded at open time; chunks are fetched through the supplied
/// decoder, with the most recently used chunk kept for subsequent reads.
pub struct PackAttributeSegmentReader {
    formatter: Arc<PackAttributeFormatter>,
    offsets: Bytes,
    footer: SegmentFooter,
    decoder: Arc<dyn ChunkDecoder>,
    last_chunk: Mutex<Option<(u64, Bytes)>>,
}

impl PackAttributeSegmentReader {
    pub fn open(
        formatter: Arc<PackAttributeFormatter>,
        offsets: &dyn ReadAt,
        decoder: Arc<dyn ChunkDecoder>,
    ) -> Result<PackAttributeSegmentReader> {
        let size = offsets.size().map_err(|e| Error::io("segment offsets", e))?;
        if size < SEGMENT_FOOTER_SIZE as u64 {
            return Err(Error::invalid_format(
                "segment offsets",
                format!("file of {size} bytes has no footer"),
            ));
        }
        let offsets = read_exact_at(offsets, 0, size as usize)
            .map_err(|e| Error::io("segment offsets", e))?;
        let footer = SegmentFooter::from_bytes(&offsets[offsets.len() - SEGMENT_FOOTER_SIZE..])?;
        if footer.offsets_file_size() != size {
            return Err(Error::invalid_format(
                "segment offsets",
                format!(
                    "footer declares {} documents, file size is {size}",
                    footer.doc_count
                ),
            ));
        }
        Ok(PackAttributeSegmentReader {
            formatter,
            offsets,
            footer,
            decoder,
            last_chunk: Mutex::new(None),
        })
    }

    pub fn formatter(&self) -> &Arc<PackAttributeFormatter> {
        &self.formatter
    }

    pub fn doc_count(&self) -> u32 {
        self.footer.doc_count
    }

    /// Length of the longest packed value in the segment.
    pub fn max_value_len(&self) -> u32 {
        self.footer.max_value_len
    }

    /// Size of the loaded offsets file.
    pub fn offsets_bytes(&self) -> usize {
        self.offsets.len()
    }

    pub fn offset_entry(&self, doc_id: DocId) -> Result<OffsetEntry> {
        if doc_id >= self.footer.doc_count {
            return Err(Error::invalid_arg(
                "doc_id",
                format!(
                    "document {doc_id} is out of range, segment has {}",
                    self.footer.doc_count
                ),
            ));
        }
        let pos = doc_id as usize * OFFSET_ENTRY_SIZE;
        OffsetEntry::from_bytes(&self.offsets[pos..pos + OFFSET_ENTRY_SIZE])
    }

    /// Returns the packed value of `doc_id`.
    pub fn read(&self, doc_id: DocId) -> Result<Bytes> {
        let entry = self.offset_entry(doc_id)?;
        let chunk = self.chunk(entry.chunk_offset)?;
        let start = entry.in_chunk_offset as usize;
        let end = start + entry.len as usize;
        if end > chunk.len() {
            return Err(Error::invalid_format(
                "segment data",
                format!(
                    "document {doc_id} spans {start}..{end}, chunk at {} holds {} bytes",
                    entry.chunk_offset,
                    chunk.len()
                ),
            ));
        }
        Ok(chunk.slice(start..end))
    }

    /// Returns the value of `attr_id` for `doc_id`, or an empty buffer if the id is
    /// not declared.
    pub fn read_field(&self, doc_id: DocId, attr_id: u32) -> Result<Bytes> {
        let packed = self.read(doc_id)?;
        let value = self
            .formatter
            .get_field_value_from_packed_value(&packed, attr_id)?;
        Ok(packed.slice_ref(value))
    }

    fn chunk(&self, chunk_offset: u64) -> Result<Bytes> {
        if let Some((offset, chunk)) = self.last_chunk.lock().expect("chunk lock").as_ref() {
            if *offset == chunk_offset {
                return Ok(chunk.clone());
            }
        }
        let chunk = self.decoder.decode(chunk_offset)?;
        *self.last_chunk.lock().expect("chunk lock") = Some((chunk_offset, chunk.clone()));
        Ok(chunk)
    }
}
