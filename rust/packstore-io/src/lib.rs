//! Storage access for packstore segments.
//!
//! Chunk decoders and mergers never touch files directly. They read through
//! [`ReadAt`] (or [`AsyncReadAt`] on async paths) and emit through
//! [`SealingWrite`], so the same code serves local files, in-memory buffers and
//! anything else a host plugs in.

use std::{ops::Range, sync::Arc};

use bytes::Bytes;
use futures::future::BoxFuture;

pub mod async_read;
pub mod file;
pub mod memory;
pub mod utils;

pub use async_read::BlockingReadAdapter;

/// Random-access view of an immutable blob (segment data, offsets table, patch file).
pub trait ReadAt: Send + Sync + 'static {
    /// Total length of the blob in bytes.
    fn size(&self) -> std::io::Result<u64>;

    /// Returns the bytes of `range`.
    ///
    /// The part of the range past the end of the blob is dropped, so the result
    /// is shorter than requested only at end-of-blob. A range with `end < start`
    /// is an `InvalidInput` error.
    fn read_at(&self, range: Range<u64>) -> std::io::Result<Bytes>;

    fn storage_profile(&self) -> StorageProfile;
}

/// Suspending counterpart of [`ReadAt`] with the same clipping rules.
///
/// Blocking callers drive the futures with
/// [`packstore_common::async_runtime::block_on`].
pub trait AsyncReadAt: Send + Sync + 'static {
    fn size(&self) -> BoxFuture<'_, std::io::Result<u64>>;

    fn read_at(&self, range: Range<u64>) -> BoxFuture<'_, std::io::Result<Bytes>>;
}

/// Append-only destination for a segment or patch file.
///
/// The output counts as complete only after [`seal`](SealingWrite::seal)
/// succeeds. Whoever owns a writer that failed before sealing discards the
/// partial output.
pub trait SealingWrite: Send {
    /// Appends all of `buf` or fails.
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Flushes and commits everything written so far.
    fn seal(&mut self) -> std::io::Result<()>;

    fn storage_profile(&self) -> StorageProfile;
}

/// Preferred request sizes of a storage backend.
#[derive(Debug, Clone)]
pub struct StorageProfile {
    /// Requests below this size are dominated by per-request latency.
    pub min_io_size: usize,
    /// Requests above this size gain nothing.
    pub max_io_size: usize,
}

impl StorageProfile {
    /// Fits `size` into `[min_io_size, max_io_size]`, treating a zero bound as 1.
    pub fn clamp_io_size(&self, size: usize) -> usize {
        let min = self.min_io_size.max(1).min(self.max_io_size);
        let max = self.max_io_size.max(1).max(min);
        size.clamp(min, max)
    }
}

impl Default for StorageProfile {
    fn default() -> StorageProfile {
        Self {
            min_io_size: 4 * 1024,
            max_io_size: 4 * 1024 * 1024,
        }
    }
}

impl<T> ReadAt for Arc<T>
where
    T: ReadAt + ?Sized,
{
    fn size(&self) -> std::io::Result<u64> {
        self.as_ref().size()
    }

    fn read_at(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        self.as_ref().read_at(range)
    }

    fn storage_profile(&self) -> StorageProfile {
        self.as_ref().storage_profile()
    }
}

impl<T> AsyncReadAt for Arc<T>
where
    T: AsyncReadAt + ?Sized,
{
    fn size(&self) -> BoxFuture<'_, std::io::Result<u64>> {
        self.as_ref().size()
    }

    fn read_at(&self, range: Range<u64>) -> BoxFuture<'_, std::io::Result<Bytes>> {
        self.as_ref().read_at(range)
    }
}

impl<T> SealingWrite for Box<T>
where
    T: SealingWrite + ?Sized,
{
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.as_mut().write_all(buf)
    }

    fn seal(&mut self) -> std::io::Result<()> {
        self.as_mut().seal()
    }

    fn storage_profile(&self) -> StorageProfile {
        self.as_ref().storage_profile()
    }
}

impl<T> SealingWrite for &mut T
where
    T: SealingWrite + ?Sized,
{
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        (**self).write_all(buf)
    }

    fn seal(&mut self) -> std::io::Result<()> {
        (**self).seal()
    }

    fn storage_profile(&self) -> StorageProfile {
        (**self).storage_profile()
    }
}
