use std::sync::Arc;

use packstore_attribute::{
    DocId, DumpStats, PackAttributeFormatter, PackAttributeSegmentReader, SegmentDataWriter,
};
use packstore_common::{
    Result,
    error::{Error, ErrorKind},
};
use packstore_io::SealingWrite;
use roaring::RoaringBitmap;

use crate::{
    SegmentId,
    doc_mapper::{DocMapper, SourceDocs},
    memory::{MemoryQuota, MergeShape, QuotaAllocation},
    options::MergeOptions,
    patch_file::PatchFooter,
    patch_merger::PatchMerger,
    patch_reader::{MultiSourcePatchReader, PatchSource, SourcedPatch},
    patch_sink::PatchSink,
    update_bitmap::SegmentUpdateBitmap,
};

/// A segment taking part in a merge.
pub struct MergeSource {
    pub segment_id: SegmentId,
    pub reader: PackAttributeSegmentReader,
    /// Local ids of documents dropped by the merge.
    pub deleted: RoaringBitmap,
    /// Pending patch files targeting this segment, keyed by local document id.
    pub patches: Vec<PatchSource>,
}

impl MergeSource {
    pub fn new(segment_id: SegmentId, reader: PackAttributeSegmentReader) -> MergeSource {
        MergeSource {
            segment_id,
            reader,
            deleted: RoaringBitmap::new(),
            patches: Vec::new(),
        }
    }

    pub fn with_deleted(mut self, deleted: RoaringBitmap) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn with_patches(mut self, patches: Vec<PatchSource>) -> Self {
        self.patches = patches;
        self
    }
}

/// Destination of one output segment.
pub struct MergeOutput {
    pub segment_id: SegmentId,
    pub data: Box<dyn SealingWrite>,
    pub offsets: Box<dyn SealingWrite>,
    /// Receives the new ids of documents that had patches applied.
    pub update_bitmap: Option<Arc<SegmentUpdateBitmap>>,
}

pub struct MergePlan {
    pub sources: Vec<MergeSource>,
    /// One entry per output of the document mapping, in order.
    pub outputs: Vec<MergeOutput>,
    pub max_docs_per_output: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub docs_merged: u64,
    pub docs_deleted: u64,
    pub docs_patched: u64,
    pub outputs: Vec<DumpStats>,
}

/// Result of [`PackAttributeMerger::read_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadDataOutcome {
    /// Bytes written to the output buffer.
    pub len: usize,
    /// Whether patches were applied over the base value.
    pub patched: bool,
}

/// Patch files held by the merged sources for a segment outside the merge.
pub struct PatchGroup {
    pub target_segment: SegmentId,
    pub sources: Vec<PatchSource>,
    pub update_bitmap: Option<Arc<SegmentUpdateBitmap>>,
}

/// Scratch memory of one merge pass.
///
/// The merge buffer receives the value written to the output, the patch buffer holds
/// the re-formatted value of a patched document. Memory taken from a quota is given
/// back when the buffers drop.
pub struct MergeBuffers {
    merge_buf: Vec<u8>,
    patch_buf: Vec<u8>,
    allocation: Option<QuotaAllocation>,
}

impl MergeBuffers {
    fn new(merge_len: usize, quota: Option<&MemoryQuota>) -> Result<MergeBuffers> {
        let allocation = quota
            .map(|quota| quota.allocate(2 * merge_len as u64))
            .transpose()?;
        Ok(MergeBuffers {
            merge_buf: vec![0; merge_len],
            patch_buf: Vec::with_capacity(merge_len),
            allocation,
        })
    }

    pub fn merge_buf_len(&self) -> usize {
        self.merge_buf.len()
    }

    /// Bytes charged to the quota, zero without one.
    pub fn charged_bytes(&self) -> u64 {
        self.allocation.as_ref().map_or(0, |a| a.amount())
    }

    /// Returns the merge buffer and the patch buffer.
    pub fn split_mut(&mut self) -> (&mut [u8], &mut Vec<u8>) {
        (&mut self.merge_buf, &mut self.patch_buf)
    }

    /// Enlarges both buffers to hold a value of `required` bytes.
    fn grow(&mut self, required: usize) -> Result<()> {
        let additional = required.saturating_sub(self.merge_buf.len());
        if additional == 0 {
            return Err(Error::dest_buffer_too_small(required, self.merge_buf.len()));
        }
        if let Some(allocation) = self.allocation.as_mut() {
            allocation.grow(2 * additional as u64)?;
        }
        self.merge_buf.resize(required, 0);
        self.patch_buf
            .reserve(required.saturating_sub(self.patch_buf.len()));
        Ok(())
    }
}

/// Folds source segments and their pending patches into new segments.
pub struct PackAttributeMerger {
    formatter: Arc<PackAttributeFormatter>,
    options: MergeOptions,
    quota: Option<MemoryQuota>,
}

impl PackAttributeMerger {
    pub fn new(formatter: Arc<PackAttributeFormatter>, options: MergeOptions) -> Self {
        PackAttributeMerger {
            formatter,
            options,
            quota: None,
        }
    }

    /// Charges the scratch buffers of every merge pass to `quota`.
    pub fn with_quota(mut self, quota: MemoryQuota) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn formatter(&self) -> &Arc<PackAttributeFormatter> {
        &self.formatter
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Writes the value of `doc_id` as it enters the merge stream into `out_buf`.
    ///
    /// Pending patches of the document, taken from `patch_reader`, are applied over the
    /// base value in stream order. `scratch` receives the re-formatted value of a
    /// patched document. Fails with `DestBufferTooSmall` if `out_buf` is too short.
    pub fn read_data(
        &self,
        doc_id: DocId,
        segment_reader: &PackAttributeSegmentReader,
        patch_reader: Option<&mut MultiSourcePatchReader>,
        scratch: &mut Vec<u8>,
        out_buf: &mut [u8],
    ) -> Result<ReadDataOutcome> {
        let patches = patch_reader
            .map(|reader| reader.take_doc(doc_id))
            .unwrap_or_default();
        self.compose(doc_id, segment_reader, &patches, scratch, out_buf)
    }

    /// Runs `plan`, sealing every output.
    ///
    /// On error the outputs are incomplete and must be discarded.
    pub fn merge(&self, plan: MergePlan) -> Result<MergeStats> {
        let MergePlan {
            sources,
            outputs,
            max_docs_per_output,
        } = plan;
        for source in &sources {
            if source.reader.formatter().name() != self.formatter.name() {
                return Err(Error::invalid_arg(
                    "sources",
                    format!(
                        "segment {} holds '{}', merging '{}'",
                        source.segment_id,
                        source.reader.formatter().name(),
                        self.formatter.name()
                    ),
                ));
            }
        }
        let source_docs = sources
            .iter()
            .map(|s| SourceDocs::new(s.reader.doc_count(), s.deleted.clone()))
            .collect::<Vec<_>>();
        let mapper = DocMapper::new(&source_docs, max_docs_per_output)?;
        if outputs.len() != mapper.output_count() {
            return Err(Error::invalid_arg(
                "outputs",
                format!(
                    "{} live documents need {} outputs, plan has {}",
                    mapper.total_docs(),
                    mapper.output_count(),
                    outputs.len()
                ),
            ));
        }

        let mut buffers = self.reserve_mem_buffers(&sources)?;
        let mut bitmaps = Vec::with_capacity(outputs.len());
        let mut writers = Vec::with_capacity(outputs.len());
        let mut output_ids = Vec::with_capacity(outputs.len());
        for output in outputs {
            output_ids.push(output.segment_id);
            bitmaps.push(output.update_bitmap);
            writers.push(SegmentDataWriter::new(
                output.data,
                output.offsets,
                self.options.chunk_payload_target,
                self.formatter.uniq_encode(),
            ));
        }

        let mut stats = MergeStats::default();
        for (source_idx, source) in sources.iter().enumerate() {
            let mut patch_reader = MultiSourcePatchReader::open(&source.patches)?;
            for doc_id in 0..source.reader.doc_count() {
                let patches = patch_reader.take_doc(doc_id);
                let Some((output, new_doc)) = mapper.map(source_idx, doc_id) else {
                    stats.docs_deleted += 1;
                    continue;
                };
                let outcome =
                    self.compose_growing(doc_id, &source.reader, &patches, &mut buffers)?;
                let writer = &mut writers[output];
                debug_assert_eq!(writer.doc_count(), new_doc);
                writer.push(&buffers.merge_buf[..outcome.len])?;
                if outcome.patched {
                    stats.docs_patched += 1;
                    if let Some(bitmap) = &bitmaps[output] {
                        bitmap.set(new_doc)?;
                    }
                }
                stats.docs_merged += 1;
            }
            log::debug!(
                "PackAttributeMerger {}: folded segment {} ({} docs)",
                self.formatter.name(),
                source.segment_id,
                source.reader.doc_count()
            );
        }

        for (writer, segment_id) in writers.into_iter().zip(output_ids) {
            let dump = writer.finish()?;
            log::info!(
                "PackAttributeMerger {}: output segment {segment_id} has {} docs in {} chunks",
                self.formatter.name(),
                dump.doc_count,
                dump.chunk_count
            );
            stats.outputs.push(dump);
        }
        self.release_mem_buffers(buffers);
        log::info!(
            "PackAttributeMerger {}: merged {} docs ({} patched, {} deleted)",
            self.formatter.name(),
            stats.docs_merged,
            stats.docs_patched,
            stats.docs_deleted
        );
        Ok(stats)
    }

    /// Consolidates the patch files that the merged sources hold for segments outside
    /// the merge.
    ///
    /// Each group becomes one patch file created through `sink` and attributed to
    /// `output_segment`. Returns the footers in group order.
    pub fn merge_patches(
        &self,
        groups: &[PatchGroup],
        output_segment: SegmentId,
        sink: &mut dyn PatchSink,
    ) -> Result<Vec<PatchFooter>> {
        let merger = PatchMerger::new(self.options.clone());
        let mut footers = Vec::with_capacity(groups.len());
        for group in groups {
            let mut dest = sink.create(output_segment, group.target_segment)?;
            let footer = merger.merge(
                &group.sources,
                dest.as_mut(),
                group.update_bitmap.as_deref(),
            )?;
            log::debug!(
                "PackAttributeMerger {}: patches {output_segment} -> {}: {} records",
                self.formatter.name(),
                group.target_segment,
                footer.patch_count
            );
            footers.push(footer);
        }
        Ok(footers)
    }

    /// Allocates the scratch buffers of a merge over `sources`.
    ///
    /// They are sized for the longest base value plus, over all sources, the largest
    /// sum of the patch file maxima of a source.
    pub fn reserve_mem_buffers(&self, sources: &[MergeSource]) -> Result<MergeBuffers> {
        let mut max_value_len = 0usize;
        let mut max_patch_sum = 0usize;
        for source in sources {
            max_value_len = max_value_len.max(source.reader.max_value_len() as usize);
            let mut patch_sum = 0usize;
            for patch in &source.patches {
                let footer = PatchFooter::read_from(patch.reader.as_ref())?;
                patch_sum = patch_sum.saturating_add(footer.max_patch_len as usize);
            }
            max_patch_sum = max_patch_sum.max(patch_sum);
        }
        let merge_len = max_value_len.saturating_add(max_patch_sum);
        let buffers = MergeBuffers::new(merge_len, self.quota.as_ref())?;
        log::debug!(
            "PackAttributeMerger {}: reserved {merge_len} byte merge buffers",
            self.formatter.name()
        );
        Ok(buffers)
    }

    /// Returns the scratch buffers and their quota charge.
    pub fn release_mem_buffers(&self, buffers: MergeBuffers) {
        log::debug!(
            "PackAttributeMerger {}: released {} byte merge buffers",
            self.formatter.name(),
            buffers.merge_buf_len()
        );
        drop(buffers);
    }

    /// Upper bound of the memory a merge of `shape` holds. Performs no allocation.
    pub fn estimate_memory_use(&self, shape: &MergeShape) -> u64 {
        shape.estimate(self.options.chunk_payload_target)
    }

    fn compose_growing(
        &self,
        doc_id: DocId,
        segment_reader: &PackAttributeSegmentReader,
        patches: &[SourcedPatch],
        buffers: &mut MergeBuffers,
    ) -> Result<ReadDataOutcome> {
        loop {
            let (out_buf, scratch) = buffers.split_mut();
            let err = match self.compose(doc_id, segment_reader, patches, scratch, out_buf) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            };
            match err.into_kind() {
                ErrorKind::DestBufferTooSmall { required, .. } => {
                    log::debug!(
                        "PackAttributeMerger {}: document {doc_id} needs {required} bytes",
                        self.formatter.name()
                    );
                    buffers.grow(required)?;
                }
                kind => return Err(kind.into()),
            }
        }
    }

    fn compose(
        &self,
        doc_id: DocId,
        segment_reader: &PackAttributeSegmentReader,
        patches: &[SourcedPatch],
        scratch: &mut Vec<u8>,
        out_buf: &mut [u8],
    ) -> Result<ReadDataOutcome> {
        let base = segment_reader.read(doc_id)?;
        let value: &[u8] = if patches.is_empty() {
            &base
        } else {
            let mut fields = Vec::new();
            for patch in patches {
                fields.extend(self.formatter.decode_patch_values(&patch.value)?);
            }
            scratch.clear();
            self.formatter
                .merge_and_format_update_fields_into(&base, &fields, false, scratch)?;
            scratch.as_slice()
        };

        let available = out_buf.len();
        out_buf
            .get_mut(..value.len())
            .ok_or_else(|| Error::dest_buffer_too_small(value.len(), available))?
            .copy_from_slice(value);
        Ok(ReadDataOutcome {
            len: value.len(),
            patched: !patches.is_empty(),
        })
    }
}
