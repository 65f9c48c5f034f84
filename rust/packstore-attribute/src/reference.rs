//! Per-field recipes for locating a sub-attribute inside a packed value.

use byteorder::{ByteOrder, LittleEndian};
use packstore_common::{Result, error::Error};

use crate::varint;

/// Size of a variable field's offset slot in the fixed prefix.
pub const VAR_SLOT_SIZE: usize = 4;

/// Byte offset relative to the start of a packed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldOffset(pub usize);

/// Ordinal of a variable-length field among the variable fields of a pack attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarSlot(pub usize);

/// Locates one sub-attribute's bytes within a packed value.
///
/// Fixed fields live at a constant offset in the fixed prefix. Variable fields own a
/// `u32` offset slot in the prefix that points at a `LEB128 length | bytes` record in
/// the variable region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeReference {
    Fixed {
        offset: FieldOffset,
        width: usize,
    },
    Variable {
        slot: VarSlot,
        slot_offset: FieldOffset,
        element_width: usize,
    },
}

impl AttributeReference {
    pub fn is_fixed(&self) -> bool {
        matches!(self, AttributeReference::Fixed { .. })
    }

    /// Returns the field's bytes within `packed`.
    pub fn read<'a>(&self, packed: &'a [u8]) -> Result<&'a [u8]> {
        match *self {
            AttributeReference::Fixed {
                offset: FieldOffset(offset),
                width,
            } => packed
                .get(offset..offset + width)
                .ok_or_else(|| truncated(offset + width, packed.len())),
            AttributeReference::Variable {
                slot: VarSlot(slot),
                slot_offset: FieldOffset(slot_offset),
                ..
            } => {
                let slot_bytes = packed
                    .get(slot_offset..slot_offset + VAR_SLOT_SIZE)
                    .ok_or_else(|| truncated(slot_offset + VAR_SLOT_SIZE, packed.len()))?;
                let pos = LittleEndian::read_u32(slot_bytes) as usize;
                let record = packed.get(pos..).ok_or_else(|| {
                    Error::invalid_format(
                        "packed value",
                        format!(
                            "variable slot {slot} points at {pos}, past the end {}",
                            packed.len()
                        ),
                    )
                })?;
                let (len, prefix) = varint::decode(record).ok_or_else(|| {
                    Error::invalid_format(
                        "packed value",
                        format!("malformed length of variable slot {slot} at {pos}"),
                    )
                })?;
                let start = pos + prefix;
                usize::try_from(len)
                    .ok()
                    .and_then(|len| packed.get(start..start.checked_add(len)?))
                    .ok_or_else(|| truncated(start.saturating_add(len as usize), packed.len()))
            }
        }
    }

    /// Returns `true` if `len` is a valid length for this field.
    pub fn check_length(&self, len: usize, max_value_len: usize) -> bool {
        match *self {
            AttributeReference::Fixed { width, .. } => len == width,
            AttributeReference::Variable { element_width, .. } => {
                len % element_width == 0 && len <= max_value_len
            }
        }
    }
}

fn truncated(required: usize, actual: usize) -> Error {
    Error::invalid_format(
        "packed value",
        format!("truncated: field ends at {required}, value length is {actual}"),
    )
}
