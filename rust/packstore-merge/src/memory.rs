//! Memory accounting of the merge path.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use packstore_common::{Result, error::Error};

/// A shared memory limit that merge tasks allocate their scratch buffers from.
#[derive(Clone)]
pub struct MemoryQuota(Arc<QuotaInner>);

struct QuotaInner {
    limit: u64,
    remaining: AtomicU64,
}

impl MemoryQuota {
    pub fn new(limit: u64) -> MemoryQuota {
        MemoryQuota(Arc::new(QuotaInner {
            limit,
            remaining: AtomicU64::new(limit),
        }))
    }

    pub fn limit(&self) -> u64 {
        self.0.limit
    }

    /// Amount still available. The value may be stale by the time it is observed.
    pub fn remaining(&self) -> u64 {
        self.0.remaining.load(Ordering::Relaxed)
    }

    pub fn used(&self) -> u64 {
        self.0.limit - self.remaining()
    }

    /// Takes `amount` bytes from the quota. They are given back when the returned
    /// allocation is dropped.
    pub fn allocate(&self, amount: u64) -> Result<QuotaAllocation> {
        self.0.withdraw(amount)?;
        Ok(QuotaAllocation {
            quota: self.0.clone(),
            amount,
        })
    }
}

impl std::fmt::Debug for MemoryQuota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQuota")
            .field("limit", &self.0.limit)
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl QuotaInner {
    fn withdraw(&self, amount: u64) -> Result<()> {
        let mut current = self.remaining.load(Ordering::Relaxed);
        while current >= amount {
            match self.remaining.compare_exchange_weak(
                current,
                current - amount,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(updated) => current = updated,
            }
        }
        Err(Error::capacity(
            "merge memory",
            (self.limit - current).saturating_add(amount),
            self.limit,
        ))
    }

    fn release(&self, amount: u64) {
        self.remaining.fetch_add(amount, Ordering::Release);
    }
}

/// Memory taken from a [`MemoryQuota`].
pub struct QuotaAllocation {
    quota: Arc<QuotaInner>,
    amount: u64,
}

impl QuotaAllocation {
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn grow(&mut self, additional: u64) -> Result<()> {
        self.quota.withdraw(additional)?;
        self.amount += additional;
        Ok(())
    }
}

impl Drop for QuotaAllocation {
    fn drop(&mut self) {
        if self.amount != 0 {
            self.quota.release(self.amount);
        }
    }
}

impl std::fmt::Debug for QuotaAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaAllocation")
            .field("amount", &self.amount)
            .finish()
    }
}

/// Size figures of one merge source, as known before the merge is admitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentShape {
    pub doc_count: u32,
    /// Longest packed value of the segment.
    pub max_value_len: u32,
    /// Size of the offsets file.
    pub offsets_bytes: u64,
    /// Total size of the segment's pending patch files.
    pub patch_bytes: u64,
    /// Sum of `max_patch_len` over the segment's patch files.
    pub max_patch_len_sum: u64,
}

/// The shape of a merge: its sources and the number of outputs.
#[derive(Debug, Clone, Copy)]
pub struct MergeShape<'a> {
    pub segments: &'a [SegmentShape],
    pub output_count: usize,
}

impl MergeShape<'_> {
    /// Longest value a merge can produce: a base value with every patch applied.
    pub fn max_merged_value_len(&self) -> u64 {
        let base = self.segments.iter().map(|s| s.max_value_len as u64).max();
        let patch = self.segments.iter().map(|s| s.max_patch_len_sum).max();
        base.unwrap_or(0).saturating_add(patch.unwrap_or(0))
    }

    pub fn max_patch_len_sum(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.max_patch_len_sum)
            .max()
            .unwrap_or(0)
    }

    /// Upper bound of the memory held while the merge runs.
    ///
    /// Covers the merge and patch scratch buffers, the loaded offsets and patch files,
    /// one decoded chunk per source, and a pending chunk plus an update bitmap per
    /// output.
    pub fn estimate(&self, chunk_payload_target: usize) -> u64 {
        let chunk_target = chunk_payload_target as u64;
        let buffers = self
            .max_merged_value_len()
            .saturating_add(self.max_patch_len_sum());

        let mut sources = 0u64;
        let mut total_docs = 0u64;
        for segment in self.segments {
            let chunk = chunk_target.max(segment.max_value_len as u64);
            sources = sources
                .saturating_add(segment.offsets_bytes)
                .saturating_add(segment.patch_bytes)
                .saturating_add(chunk);
            total_docs = total_docs.saturating_add(segment.doc_count as u64);
        }

        let outputs = (self.output_count as u64)
            .saturating_mul(chunk_target.saturating_add(self.max_merged_value_len()))
            .saturating_add(total_docs.div_ceil(8))
            .saturating_add((self.output_count as u64).saturating_mul(8));

        buffers.saturating_add(sources).saturating_add(outputs)
    }
}
