use serde::{Deserialize, Serialize};

/// Tuning knobs of the merge path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Payload size at which an output data chunk is closed.
    pub chunk_payload_target: usize,
    /// Slice size used when a patch file is copied verbatim.
    pub io_copy_size: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            chunk_payload_target: 64 * 1024,
            io_copy_size: 1024 * 1024,
        }
    }
}
