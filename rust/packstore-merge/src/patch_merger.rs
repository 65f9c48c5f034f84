use packstore_common::{Result, error::Error};
use packstore_io::{SealingWrite, utils::copy_all};

use crate::{
    options::MergeOptions,
    patch_file::{PatchFileWriter, PatchFooter},
    patch_reader::{MultiSourcePatchReader, PatchSource},
    update_bitmap::SegmentUpdateBitmap,
};

/// How a set of patch files is consolidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The single input is copied byte for byte.
    FastCopy,
    /// All inputs are decoded and re-encoded as one ordered stream.
    FoldMerge,
}

impl MergeStrategy {
    pub fn select(input_count: usize, bitmap_required: bool) -> MergeStrategy {
        if input_count == 1 && !bitmap_required {
            MergeStrategy::FastCopy
        } else {
            MergeStrategy::FoldMerge
        }
    }
}

/// Consolidates patch files targeting one segment into a single patch file.
#[derive(Debug, Clone, Default)]
pub struct PatchMerger {
    options: MergeOptions,
}

impl PatchMerger {
    pub fn new(options: MergeOptions) -> PatchMerger {
        PatchMerger { options }
    }

    /// Writes the consolidation of `sources` to `dest` and seals it.
    ///
    /// When `bitmap` is given, the bit of every patched document is set. On error the
    /// destination holds an incomplete file and must be discarded.
    pub fn merge(
        &self,
        sources: &[PatchSource],
        dest: &mut dyn SealingWrite,
        bitmap: Option<&SegmentUpdateBitmap>,
    ) -> Result<PatchFooter> {
        let strategy = MergeStrategy::select(sources.len(), bitmap.is_some());
        log::debug!(
            "PatchMerger: {} input(s), strategy {strategy:?}",
            sources.len()
        );
        let footer = match strategy {
            MergeStrategy::FastCopy => self.fast_copy(&sources[0], dest)?,
            MergeStrategy::FoldMerge => Self::fold_merge(sources, dest, bitmap)?,
        };
        log::info!(
            "PatchMerger: wrote {} patches, max length {}",
            footer.patch_count,
            footer.max_patch_len
        );
        Ok(footer)
    }

    fn fast_copy(&self, source: &PatchSource, dest: &mut dyn SealingWrite) -> Result<PatchFooter> {
        let footer = PatchFooter::read_from(source.reader.as_ref())?;
        copy_all(source.reader.as_ref(), dest, self.options.io_copy_size)
            .map_err(|e| Error::io("patch copy", e))?;
        dest.seal().map_err(|e| Error::io("patch file", e))?;
        Ok(footer)
    }

    fn fold_merge(
        sources: &[PatchSource],
        dest: &mut dyn SealingWrite,
        bitmap: Option<&SegmentUpdateBitmap>,
    ) -> Result<PatchFooter> {
        let mut reader = MultiSourcePatchReader::open(sources)?;
        let mut writer = PatchFileWriter::new(dest);
        while let Some(patch) = reader.next() {
            writer.write(patch.doc_id, &patch.value)?;
            if let Some(bitmap) = bitmap {
                bitmap.set(patch.doc_id)?;
            }
        }
        writer.finish()
    }
}
