//! Length-framed chunk container used as the unit of attribute I/O.
//!
//! On-disk shape of a chunk: `[ChunkMeta][payload bytes]`, where the meta is a single
//! little-endian `u32` carrying the payload length (24 bits) and the encoded flag.
//!
//! Three interchangeable ways to obtain a chunk payload are provided, all behind the
//! [`ChunkDecoder`] trait:
//! - [`MemoryChunkDecoder`]: zero-copy view into an already resident buffer.
//! - [`FileChunkDecoder`]: positional read from a [`ReadAt`](packstore_io::ReadAt)
//!   (with an async counterpart, [`decode_from_file_async`]).
//! - [`CachedChunkDecoder`]: read-through [`ChunkCache`] shared between readers.

pub mod cache;
pub mod decoder;
pub mod meta;
pub mod writer;

pub use cache::{CachedChunkDecoder, ChunkCache, NamedReader};
pub use decoder::{
    AsyncFileChunkDecoder, ChunkDecoder, FileChunkDecoder, MemoryChunkDecoder,
    decode_from_file, decode_from_file_async, decode_from_memory,
};
pub use meta::{CHUNK_META_SIZE, ChunkMeta, MAX_CHUNK_DATA_LEN};
pub use writer::ChunkWriter;
