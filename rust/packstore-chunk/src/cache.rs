//! Shared read-through cache of decoded chunks.

use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicU64, Ordering},
};

use ahash::AHashMap;
use bytes::Bytes;
use packstore_common::Result;
use packstore_io::ReadAt;

use crate::decoder::{ChunkDecoder, decode_from_file};

/// A positional reader paired with a stable identity used to build cache keys.
#[derive(Clone)]
pub struct NamedReader {
    name: Arc<str>,
    reader: Arc<dyn ReadAt>,
}

impl NamedReader {
    pub fn new(name: impl Into<Arc<str>>, reader: Arc<dyn ReadAt>) -> NamedReader {
        NamedReader {
            name: name.into(),
            reader,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reader(&self) -> &Arc<dyn ReadAt> {
        &self.reader
    }
}

/// A cached chunk payload.
///
/// The entry lock guards the buffer handle so that a concurrent [`ChunkCache::reset`]
/// can release it without racing a lookup. Views handed out to callers are
/// reference-counted clones and stay valid after the entry has been released.
struct CacheEntry {
    buffer: Mutex<Option<Bytes>>,
}

impl CacheEntry {
    fn new(buffer: Bytes) -> CacheEntry {
        CacheEntry {
            buffer: Mutex::new(Some(buffer)),
        }
    }

    fn get(&self) -> Option<Bytes> {
        self.buffer.lock().expect("entry lock").clone()
    }

    fn release(&self) {
        self.buffer.lock().expect("entry lock").take();
    }
}

/// Read-through cache of decoded chunks keyed by `(reader name, offset)`.
///
/// Locking is two-level: the map is guarded by a reader/writer lock that is held only
/// while the map shape changes or a handle is looked up, and every entry carries its
/// own lock for its buffer. Chunk decoding itself runs outside of both locks, so
/// lookups for different keys never wait on each other's I/O. Concurrent misses on
/// the same key may decode twice; the first insertion wins and the others reuse it.
#[derive(Default)]
pub struct ChunkCache {
    entries: RwLock<AHashMap<String, Arc<CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ChunkCache {
    pub fn new() -> ChunkCache {
        Default::default()
    }

    /// Returns the payload of the chunk at `offset` in `reader`, decoding and caching
    /// it on a miss.
    pub fn decode(&self, reader: &NamedReader, offset: u64) -> Result<Bytes> {
        let key = Self::cache_key(reader.name(), offset);
        if let Some(buffer) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("ChunkCache: hit {key}");
            return Ok(buffer);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        log::trace!("ChunkCache: miss {key}");
        let payload = decode_from_file(reader.reader().as_ref(), offset)?;
        Ok(self.insert(key, payload))
    }

    /// Drops every cached entry.
    ///
    /// Buffers already returned by [`decode`](Self::decode) remain valid until their
    /// holders drop them.
    pub fn reset(&self) {
        let drained = {
            let mut entries = self.entries.write().expect("write lock");
            entries.drain().map(|(_, entry)| entry).collect::<Vec<_>>()
        };
        log::debug!("ChunkCache: reset, released {} entries", drained.len());
        for entry in drained {
            entry.release();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("read lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn cache_key(name: &str, offset: u64) -> String {
        format!("{name}@{offset}")
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        let entry = self.entries.read().expect("read lock").get(key).cloned()?;
        entry.get()
    }

    fn insert(&self, key: String, payload: Bytes) -> Bytes {
        let mut entries = self.entries.write().expect("write lock");
        if let Some(existing) = entries.get(&key).and_then(|entry| entry.get()) {
            return existing;
        }
        entries.insert(key, Arc::new(CacheEntry::new(payload.clone())));
        payload
    }
}

/// [`ChunkDecoder`] that routes every decode through a shared [`ChunkCache`].
#[derive(Clone)]
pub struct CachedChunkDecoder {
    reader: NamedReader,
    cache: Arc<ChunkCache>,
}

impl CachedChunkDecoder {
    pub fn new(reader: NamedReader, cache: Arc<ChunkCache>) -> CachedChunkDecoder {
        CachedChunkDecoder { reader, cache }
    }

    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }
}

impl ChunkDecoder for CachedChunkDecoder {
    fn decode(&self, offset: u64) -> Result<Bytes> {
        self.cache.decode(&self.reader, offset)
    }
}
