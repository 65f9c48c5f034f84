use std::{cmp::Reverse, collections::BinaryHeap, sync::Arc};

use bytes::Bytes;
use packstore_attribute::DocId;
use packstore_common::Result;
use packstore_io::ReadAt;

use crate::{
    SegmentId,
    patch_file::{PatchFileReader, PatchRecord},
};

/// A patch file together with the segment that produced it.
#[derive(Clone)]
pub struct PatchSource {
    pub src_segment: SegmentId,
    pub reader: Arc<dyn ReadAt>,
}

impl PatchSource {
    pub fn new(src_segment: SegmentId, reader: Arc<dyn ReadAt>) -> PatchSource {
        PatchSource {
            src_segment,
            reader,
        }
    }
}

impl std::fmt::Debug for PatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchSource")
            .field("src_segment", &self.src_segment)
            .finish_non_exhaustive()
    }
}

/// A patch record tagged with the segment it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedPatch {
    pub src_segment: SegmentId,
    pub doc_id: DocId,
    pub value: Bytes,
}

struct Cursor {
    src_segment: SegmentId,
    records: Vec<PatchRecord>,
    pos: usize,
}

/// Reads several patch files as one stream ordered by document id.
///
/// Records of the same document are yielded by ascending source segment; within one
/// file, the file order is kept.
pub struct MultiSourcePatchReader {
    cursors: Vec<Cursor>,
    // (doc_id, src_segment, cursor index)
    heap: BinaryHeap<Reverse<(DocId, SegmentId, usize)>>,
    max_patch_len: u32,
    total_patch_count: u64,
}

impl MultiSourcePatchReader {
    pub fn open(sources: &[PatchSource]) -> Result<MultiSourcePatchReader> {
        let mut cursors = Vec::with_capacity(sources.len());
        let mut max_patch_len = 0;
        let mut total_patch_count = 0;
        for source in sources {
            let file = PatchFileReader::open(source.reader.as_ref())?;
            max_patch_len = max_patch_len.max(file.footer().max_patch_len);
            total_patch_count += file.footer().patch_count as u64;
            cursors.push(Cursor {
                src_segment: source.src_segment,
                records: file.into_records(),
                pos: 0,
            });
        }

        let heap = cursors
            .iter()
            .enumerate()
            .filter_map(|(idx, cursor)| {
                cursor
                    .records
                    .first()
                    .map(|r| Reverse((r.doc_id, cursor.src_segment, idx)))
            })
            .collect();
        Ok(MultiSourcePatchReader {
            cursors,
            heap,
            max_patch_len,
            total_patch_count,
        })
    }

    /// Longest record value over all inputs.
    pub fn max_patch_len(&self) -> u32 {
        self.max_patch_len
    }

    pub fn total_patch_count(&self) -> u64 {
        self.total_patch_count
    }

    pub fn peek_doc(&self) -> Option<DocId> {
        self.heap.peek().map(|Reverse((doc_id, _, _))| *doc_id)
    }

    pub fn next(&mut self) -> Option<SourcedPatch> {
        let Reverse((_, _, idx)) = self.heap.pop()?;
        let cursor = &mut self.cursors[idx];
        let record = cursor.records[cursor.pos].clone();
        cursor.pos += 1;
        if let Some(next) = cursor.records.get(cursor.pos) {
            self.heap
                .push(Reverse((next.doc_id, cursor.src_segment, idx)));
        }
        Some(SourcedPatch {
            src_segment: cursor.src_segment,
            doc_id: record.doc_id,
            value: record.value,
        })
    }

    /// Returns every record of `doc_id` in stream order.
    ///
    /// The reader only moves forward: records of smaller documents still pending are
    /// dropped.
    pub fn take_doc(&mut self, doc_id: DocId) -> Vec<SourcedPatch> {
        let mut taken = Vec::new();
        while let Some(next) = self.peek_doc() {
            if next > doc_id {
                break;
            }
            let Some(patch) = self.next() else {
                break;
            };
            if next == doc_id {
                taken.push(patch);
            }
        }
        taken
    }
}
