use std::sync::Arc;

use packstore_common::{Result, error::Error};
use packstore_io::SealingWrite;
use serde::{Deserialize, Serialize};

use crate::{
    DocId,
    formatter::{PackAttributeFormatter, PatchField},
    segment::DumpStats,
    segment_writer::SegmentDataWriter,
};

/// Build-time settings of a [`PackAttributeWriter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Initial capacity of the value arena.
    pub scratch_reserve: usize,
    /// Payload size at which a data chunk is closed.
    pub chunk_payload_target: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            scratch_reserve: 256 * 1024,
            chunk_payload_target: 64 * 1024,
        }
    }
}

/// Buffers the packed values of a segment under construction.
///
/// Values live in an append-only arena. An update re-formats the document's value,
/// appends the result and repoints the document, leaving the old bytes behind as
/// stale space; the arena is compacted only by [`dump`](Self::dump).
pub struct PackAttributeWriter {
    formatter: Arc<PackAttributeFormatter>,
    options: WriterOptions,
    arena: Vec<u8>,
    index: Vec<ValueSpan>,
    scratch: Vec<u8>,
    stale_bytes: usize,
}

#[derive(Debug, Clone, Copy)]
struct ValueSpan {
    offset: usize,
    len: usize,
}

impl PackAttributeWriter {
    pub fn new(formatter: Arc<PackAttributeFormatter>, options: WriterOptions) -> Self {
        PackAttributeWriter {
            arena: Vec::with_capacity(options.scratch_reserve),
            formatter,
            options,
            index: Vec::new(),
            scratch: Vec::new(),
            stale_bytes: 0,
        }
    }

    pub fn formatter(&self) -> &Arc<PackAttributeFormatter> {
        &self.formatter
    }

    /// Formats and buffers the next document, returning its id.
    pub fn add_document(&mut self, fields: &[&[u8]]) -> Result<DocId> {
        let doc_id = self.next_doc_id()?;
        let offset = self.arena.len();
        if let Err(e) = self.formatter.format_into(fields, &mut self.arena) {
            self.arena.truncate(offset);
            return Err(e);
        }
        self.index.push(ValueSpan {
            offset,
            len: self.arena.len() - offset,
        });
        Ok(doc_id)
    }

    /// Buffers an already packed value as the next document.
    pub fn add_packed(&mut self, packed: &[u8]) -> Result<DocId> {
        self.formatter.unpack(packed)?;
        let doc_id = self.next_doc_id()?;
        let offset = self.arena.len();
        self.arena.extend_from_slice(packed);
        self.index.push(ValueSpan {
            offset,
            len: packed.len(),
        });
        Ok(doc_id)
    }

    /// Replaces the fields in `patch` within the buffered value of `doc_id`.
    pub fn update_encode_fields(&mut self, doc_id: DocId, patch: &[PatchField]) -> Result<()> {
        let span = self.span(doc_id)?;
        self.scratch.clear();
        self.formatter.merge_and_format_update_fields_into(
            &self.arena[span.offset..span.offset + span.len],
            patch,
            false,
            &mut self.scratch,
        )?;

        let offset = self.arena.len();
        self.arena.extend_from_slice(&self.scratch);
        self.index[doc_id as usize] = ValueSpan {
            offset,
            len: self.scratch.len(),
        };
        self.stale_bytes += span.len;
        Ok(())
    }

    /// Applies a patch buffer produced by
    /// [`encode_patch_values`](PackAttributeFormatter::encode_patch_values).
    pub fn update_encode_fields_from_patch(&mut self, doc_id: DocId, encoded: &[u8]) -> Result<()> {
        let formatter = self.formatter.clone();
        let patch = formatter.decode_patch_values(encoded)?;
        self.update_encode_fields(doc_id, &patch)
    }

    pub fn get_value(&self, doc_id: DocId) -> Option<&[u8]> {
        let span = self.index.get(doc_id as usize)?;
        self.arena.get(span.offset..span.offset + span.len)
    }

    pub fn doc_count(&self) -> u32 {
        self.index.len() as u32
    }

    /// Bytes held by the arena, including stale values.
    pub fn arena_bytes(&self) -> usize {
        self.arena.len()
    }

    /// Bytes of superseded values that a dump leaves behind.
    pub fn stale_bytes(&self) -> usize {
        self.stale_bytes
    }

    /// Writes every buffered document, in id order, as segment data.
    ///
    /// Both sinks are sealed on success.
    pub fn dump(
        &self,
        data: &mut dyn SealingWrite,
        offsets: &mut dyn SealingWrite,
    ) -> Result<DumpStats> {
        let mut segment = SegmentDataWriter::new(
            data,
            offsets,
            self.options.chunk_payload_target,
            self.formatter.uniq_encode(),
        );
        for span in &self.index {
            segment.push(&self.arena[span.offset..span.offset + span.len])?;
        }
        let stats = segment.finish()?;
        log::info!(
            "PackAttributeWriter {}: dumped {} docs in {} chunks ({} bytes, {} uniq hits)",
            self.formatter.name(),
            stats.doc_count,
            stats.chunk_count,
            stats.data_bytes,
            stats.uniq_hits
        );
        Ok(stats)
    }

    fn span(&self, doc_id: DocId) -> Result<ValueSpan> {
        self.index.get(doc_id as usize).copied().ok_or_else(|| {
            Error::invalid_arg(
                "doc_id",
                format!(
                    "document {doc_id} has no buffered value in '{}'",
                    self.formatter.name()
                ),
            )
        })
    }

    fn next_doc_id(&self) -> Result<DocId> {
        DocId::try_from(self.index.len())
            .ok()
            .filter(|id| *id < DocId::MAX)
            .ok_or_else(|| {
                Error::capacity(
                    "buffered documents",
                    self.index.len() as u64 + 1,
                    DocId::MAX as u64,
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use packstore_common::error::ErrorKind;

    use super::*;
    use crate::formatter::tests::{abc_formatter, mixed_formatter, random_fields};

    fn abc_writer() -> PackAttributeWriter {
        PackAttributeWriter::new(Arc::new(abc_formatter()), WriterOptions::default())
    }

    #[test]
    fn test_add_and_update() {
        let mut writer = abc_writer();
        let doc = writer
            .add_document(&[&5u32.to_le_bytes(), &9u32.to_le_bytes(), b"hi"])
            .unwrap();
        assert_eq!(doc, 0);
        let before = writer.arena_bytes();

        let b = 42u32.to_le_bytes();
        writer
            .update_encode_fields(doc, &[PatchField::new(1, &b)])
            .unwrap();
        let formatter = writer.formatter().clone();
        let value = writer.get_value(doc).unwrap();
        assert_eq!(
            formatter.get_field_value_from_packed_value(value, 1).unwrap(),
            42u32.to_le_bytes()
        );
        assert_eq!(
            formatter.get_field_value_from_packed_value(value, 2).unwrap(),
            b"hi"
        );
        assert_eq!(writer.stale_bytes(), before);
        assert_eq!(writer.arena_bytes(), 2 * before);
    }

    #[test]
    fn test_update_matches_full_format() {
        let formatter = Arc::new(mixed_formatter());
        let mut writer = PackAttributeWriter::new(formatter.clone(), WriterOptions::default());
        let mut rng = fastrand::Rng::with_seed(5);
        let base = random_fields(&formatter, &mut rng);
        let update = random_fields(&formatter, &mut rng);
        let base_slices = base.iter().map(|v| v.as_slice()).collect::<Vec<_>>();
        let doc = writer.add_document(&base_slices).unwrap();

        let title_id = formatter.descriptors()[0].attr_id;
        let mut encoded = Vec::new();
        formatter
            .encode_patch_values_to_vec(&[PatchField::new(title_id, &update[0])], &mut encoded)
            .unwrap();
        writer.update_encode_fields_from_patch(doc, &encoded).unwrap();

        let mut expected = base_slices.clone();
        expected[0] = update[0].as_slice();
        assert_eq!(writer.get_value(doc).unwrap(), formatter.format(&expected).unwrap());
    }

    #[test]
    fn test_update_before_write_fails() {
        let mut writer = abc_writer();
        let err = writer
            .update_encode_fields(3, &[PatchField::new(2, b"x")])
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
        assert_eq!(writer.arena_bytes(), 0);
    }

    #[test]
    fn test_failed_add_leaves_arena_intact() {
        let mut writer = abc_writer();
        writer.add_document(&[&[0; 4], &[0; 4], b"ok"]).unwrap();
        let len = writer.arena_bytes();
        assert!(writer.add_document(&[&[0; 3], &[0; 4], b"bad"]).is_err());
        assert_eq!(writer.arena_bytes(), len);
        assert_eq!(writer.doc_count(), 1);
    }

    #[test]
    fn test_add_packed_validates() {
        let mut writer = abc_writer();
        let packed = abc_formatter().format(&[&[1; 4], &[2; 4], b"p"]).unwrap();
        assert_eq!(writer.add_packed(&packed).unwrap(), 0);
        assert_eq!(writer.get_value(0).unwrap(), packed.as_slice());
        assert!(writer.add_packed(&packed[..5]).is_err());
    }

    #[test]
    fn test_dump_compacts_stale_values() {
        let mut writer = abc_writer();
        for i in 0..10u32 {
            writer
                .add_document(&[&i.to_le_bytes(), &[0; 4], format!("doc {i}").as_bytes()])
                .unwrap();
        }
        for i in (0..10).step_by(2) {
            writer
                .update_encode_fields(i, &[PatchField::new(2, b"updated")])
                .unwrap();
        }
        let mut data = Vec::new();
        let mut offsets = Vec::new();
        let stats = writer.dump(&mut data, &mut offsets).unwrap();
        assert_eq!(stats.doc_count, 10);
        let live = (0..10)
            .map(|i| writer.get_value(i).unwrap().len())
            .sum::<usize>();
        assert!(stats.data_bytes < (writer.arena_bytes() as u64));
        assert!(stats.data_bytes >= live as u64);
    }

    #[test]
    fn test_options_from_json() {
        let options: WriterOptions =
            serde_json::from_str(r#"{ "chunk_payload_target": 4096 }"#).unwrap();
        assert_eq!(options.chunk_payload_target, 4096);
        assert_eq!(options.scratch_reserve, 256 * 1024);
    }
}
