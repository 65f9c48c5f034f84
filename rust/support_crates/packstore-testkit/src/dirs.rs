//! Directory and path helpers for on-disk test artifacts.

use std::path::{Path, PathBuf};

/// Data and offsets file of one dumped segment.
#[derive(Debug, Clone)]
pub struct SegmentPaths {
    pub data: PathBuf,
    pub offsets: PathBuf,
}

/// Creates a fresh temporary directory, removed when the returned handle drops.
pub fn scratch_dir(label: &str) -> anyhow::Result<tempfile::TempDir> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("packstore-{label}-"))
        .tempdir()?;
    Ok(dir)
}

/// Returns the file paths of segment `segment_id` under `dir` (`{id}.data`, `{id}.offsets`).
pub fn segment_paths(dir: &Path, segment_id: u32) -> SegmentPaths {
    SegmentPaths {
        data: dir.join(format!("{segment_id}.data")),
        offsets: dir.join(format!("{segment_id}.offsets")),
    }
}

/// Returns the path of the patch file written by `src_segment` for `target_segment`.
pub fn patch_path(dir: &Path, src_segment: u32, target_segment: u32) -> PathBuf {
    dir.join(format!("{src_segment}_{target_segment}.patch"))
}

/// Returns the size of an existing file.
pub fn file_len(path: &Path) -> anyhow::Result<u64> {
    if !path.is_file() {
        anyhow::bail!("{} not found", path.display());
    }
    Ok(std::fs::metadata(path)?.len())
}
