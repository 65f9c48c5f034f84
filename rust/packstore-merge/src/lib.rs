//! Offline merge of pack attribute segments and their patch files.
//!
//! - [`PatchMerger`] consolidates the patch files that several source segments hold
//!   for one target segment into a single ordered stream.
//! - [`PackAttributeMerger`] folds source segments and their pending patches into the
//!   output segments of a merge plan.

pub mod doc_mapper;
pub mod memory;
pub mod options;
pub mod pack_merger;
pub mod patch_file;
pub mod patch_merger;
pub mod patch_reader;
pub mod patch_sink;
pub mod update_bitmap;

pub use doc_mapper::{DocMapper, SourceDocs};
pub use memory::{MemoryQuota, MergeShape, QuotaAllocation, SegmentShape};
pub use options::MergeOptions;
pub use pack_merger::{
    MergeBuffers, MergeOutput, MergePlan, MergeSource, MergeStats, PackAttributeMerger,
    PatchGroup, ReadDataOutcome,
};
pub use patch_file::{PatchFileReader, PatchFileWriter, PatchFooter, PatchRecord};
pub use patch_merger::{MergeStrategy, PatchMerger};
pub use patch_reader::{MultiSourcePatchReader, PatchSource, SourcedPatch};
pub use patch_sink::{DirPatchSink, PatchSink};
pub use update_bitmap::SegmentUpdateBitmap;

/// Identifier of a segment within an index.
pub type SegmentId = u32;
