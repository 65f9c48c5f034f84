use std::path::{Path, PathBuf};

use packstore_common::{Result, error::Error};
use packstore_io::{SealingWrite, file::FileWriter};

use crate::SegmentId;

/// Creates the destination of a consolidated patch stream.
pub trait PatchSink {
    /// Opens a new patch file holding patches produced by `src_segment` for
    /// `target_segment`.
    fn create(
        &mut self,
        src_segment: SegmentId,
        target_segment: SegmentId,
    ) -> Result<Box<dyn SealingWrite>>;
}

/// Writes patch files as `{src}_{target}.patch` under a directory.
#[derive(Debug, Clone)]
pub struct DirPatchSink {
    dir: PathBuf,
}

impl DirPatchSink {
    pub fn new(dir: impl Into<PathBuf>) -> DirPatchSink {
        DirPatchSink { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn patch_path(&self, src_segment: SegmentId, target_segment: SegmentId) -> PathBuf {
        self.dir
            .join(format!("{src_segment}_{target_segment}.patch"))
    }
}

impl PatchSink for DirPatchSink {
    fn create(
        &mut self,
        src_segment: SegmentId,
        target_segment: SegmentId,
    ) -> Result<Box<dyn SealingWrite>> {
        let path = self.patch_path(src_segment, target_segment);
        let writer = FileWriter::create(&path)
            .map_err(|e| Error::io(format!("create {}", path.display()), e))?;
        Ok(Box::new(writer))
    }
}
