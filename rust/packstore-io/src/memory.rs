//! In-memory backends, used for freshly encoded segments and in tests.

use std::ops::Range;

use bytes::Bytes;

use crate::{ReadAt, SealingWrite, StorageProfile, utils::clip_read_range};

fn memory_profile(len: usize) -> StorageProfile {
    StorageProfile {
        min_io_size: 1,
        max_io_size: len.clamp(1, StorageProfile::default().max_io_size),
    }
}

/// Slices share the underlying buffer.
impl ReadAt for Bytes {
    fn size(&self) -> std::io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_at(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        Ok(match clip_read_range(range, self.len() as u64)? {
            Some(r) => self.slice(r.start as usize..r.end as usize),
            None => Bytes::new(),
        })
    }

    fn storage_profile(&self) -> StorageProfile {
        memory_profile(self.len())
    }
}

/// Slices are copied out.
impl ReadAt for Vec<u8> {
    fn size(&self) -> std::io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_at(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        Ok(match clip_read_range(range, self.len() as u64)? {
            Some(r) => Bytes::copy_from_slice(&self[r.start as usize..r.end as usize]),
            None => Bytes::new(),
        })
    }

    fn storage_profile(&self) -> StorageProfile {
        memory_profile(self.len())
    }
}

/// Sealing a vector is a no-op; it can keep growing afterwards.
impl SealingWrite for Vec<u8> {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.extend_from_slice(buf);
        Ok(())
    }

    fn seal(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn storage_profile(&self) -> StorageProfile {
        StorageProfile {
            min_io_size: 1,
            ..Default::default()
        }
    }
}
