//! Pack attributes: several logically distinct columns stored together as one
//! packed blob per document.
//!
//! - [`PackAttributeFormatter`] owns the layout and the blob and patch codecs.
//! - [`PackAttributeWriter`] buffers documents at build time, applies field updates
//!   and dumps the column as chunked segment data.
//! - [`PackAttributeSegmentReader`] reads packed values back from dumped segment data.

pub mod descriptor;
pub mod formatter;
pub mod patch_codec;
pub mod reference;
pub mod segment;
pub mod segment_reader;
pub mod segment_writer;
pub mod varint;
pub mod writer;

pub use descriptor::{CompressMode, FieldType, PackAttributeConfig, SubAttributeDescriptor};
pub use formatter::{PackAttributeFormatter, PatchField, ROUTING_FIELD_LEN};
pub use reference::{AttributeReference, FieldOffset, VarSlot};
pub use segment::{DumpStats, OffsetEntry, SegmentFooter};
pub use segment_reader::PackAttributeSegmentReader;
pub use segment_writer::SegmentDataWriter;
pub use writer::{PackAttributeWriter, WriterOptions};

/// Document id local to a segment.
pub type DocId = u32;
