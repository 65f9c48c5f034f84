use packstore_attribute::DocId;
use packstore_common::{Result, verify_arg};
use roaring::RoaringBitmap;

/// Documents of one merge source.
#[derive(Debug, Clone, Default)]
pub struct SourceDocs {
    pub doc_count: u32,
    /// Local ids of deleted documents. Ids at or above `doc_count` are ignored.
    pub deleted: RoaringBitmap,
}

impl SourceDocs {
    pub fn new(doc_count: u32, deleted: RoaringBitmap) -> SourceDocs {
        SourceDocs { doc_count, deleted }
    }

    pub fn deleted_count(&self) -> u32 {
        if self.doc_count == 0 {
            0
        } else {
            self.deleted.rank(self.doc_count - 1) as u32
        }
    }

    pub fn live_count(&self) -> u32 {
        self.doc_count - self.deleted_count()
    }
}

/// Assigns new ids to the live documents of the merged sources.
///
/// Sources are concatenated in order with deleted documents removed, and the result
/// is cut into output segments of at most `max_docs_per_output` documents. A merge
/// always has at least one output, which is empty when no document survives.
#[derive(Debug, Clone)]
pub struct DocMapper {
    sources: Vec<SourceDocs>,
    // Global position of each source's first live document.
    bases: Vec<u64>,
    total_docs: u64,
    max_docs_per_output: u32,
}

impl DocMapper {
    pub fn new(sources: &[SourceDocs], max_docs_per_output: u32) -> Result<DocMapper> {
        verify_arg!(max_docs_per_output, max_docs_per_output > 0);
        let mut bases = Vec::with_capacity(sources.len());
        let mut total_docs = 0u64;
        for source in sources {
            bases.push(total_docs);
            total_docs += source.live_count() as u64;
        }
        Ok(DocMapper {
            sources: sources.to_vec(),
            bases,
            total_docs,
            max_docs_per_output,
        })
    }

    /// Live documents over all sources.
    pub fn total_docs(&self) -> u64 {
        self.total_docs
    }

    pub fn output_count(&self) -> usize {
        (self.total_docs.div_ceil(self.max_docs_per_output as u64) as usize).max(1)
    }

    pub fn output_doc_count(&self, output: usize) -> u32 {
        let start = output as u64 * self.max_docs_per_output as u64;
        self.total_docs
            .saturating_sub(start)
            .min(self.max_docs_per_output as u64) as u32
    }

    /// Returns the output index and new id of a source document, or `None` if the
    /// document is deleted or does not exist.
    pub fn map(&self, source: usize, doc_id: DocId) -> Option<(usize, DocId)> {
        let docs = self.sources.get(source)?;
        if doc_id >= docs.doc_count || docs.deleted.contains(doc_id) {
            return None;
        }
        let global = self.bases[source] + doc_id as u64 - docs.deleted.rank(doc_id);
        let max = self.max_docs_per_output as u64;
        Some(((global / max) as usize, (global % max) as DocId))
    }
}
