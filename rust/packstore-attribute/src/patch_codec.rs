//! Wire encoding of field-level patches.
//!
//! A patch buffer is a sequence of records, one per [`PatchField`]:
//! `LEB128 attr_id | LEB128 length (variable fields only) | value bytes`.
//! Fixed fields carry no length since their width is implied by the layout.

use packstore_common::{Result, error::Error};

use crate::{
    formatter::{PackAttributeFormatter, PatchField},
    reference::AttributeReference,
    varint,
};

impl PackAttributeFormatter {
    /// Exact size of the buffer [`encode_patch_values`](Self::encode_patch_values)
    /// needs for `fields`.
    pub fn get_encode_patch_value_len(&self, fields: &[PatchField]) -> Result<usize> {
        fields.iter().try_fold(0usize, |total, field| {
            Ok(total + self.patch_record_len(field)?)
        })
    }

    /// Encodes `fields` into `buf` and returns the number of bytes written.
    ///
    /// Fails with `DestBufferTooSmall` when `buf` is shorter than
    /// [`get_encode_patch_value_len`](Self::get_encode_patch_value_len); the content
    /// of `buf` is unspecified after a failure.
    pub fn encode_patch_values(&self, fields: &[PatchField], buf: &mut [u8]) -> Result<usize> {
        let required = self.get_encode_patch_value_len(fields)?;
        if buf.len() < required {
            return Err(Error::dest_buffer_too_small(required, buf.len()));
        }

        let mut pos = 0;
        for field in fields {
            pos += put_varint(field.attr_id as u64, &mut buf[pos..])?;
            if let Some(AttributeReference::Variable { .. }) = self.reference(field.attr_id) {
                pos += put_varint(field.value.len() as u64, &mut buf[pos..])?;
            }
            buf[pos..pos + field.value.len()].copy_from_slice(field.value);
            pos += field.value.len();
        }
        debug_assert_eq!(pos, required);
        Ok(pos)
    }

    /// Appends the encoding of `fields` to `out`, growing it as needed.
    pub fn encode_patch_values_to_vec(
        &self,
        fields: &[PatchField],
        out: &mut Vec<u8>,
    ) -> Result<usize> {
        let required = self.get_encode_patch_value_len(fields)?;
        let start = out.len();
        out.resize(start + required, 0);
        self.encode_patch_values(fields, &mut out[start..])
    }

    /// Decodes a patch buffer. The returned values borrow from `buf`.
    pub fn decode_patch_values<'a>(&self, buf: &'a [u8]) -> Result<Vec<PatchField<'a>>> {
        let mut fields = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let (attr_id, n) = varint::decode(&buf[pos..])
                .filter(|(id, _)| *id <= u32::MAX as u64)
                .ok_or_else(|| corrupt_patch(pos, "malformed attribute id"))?;
            pos += n;
            let attr_id = attr_id as u32;
            let len = match self.reference(attr_id) {
                Some(AttributeReference::Fixed { width, .. }) => *width,
                Some(AttributeReference::Variable { .. }) => {
                    let (len, n) = varint::decode(&buf[pos..])
                        .ok_or_else(|| corrupt_patch(pos, "malformed value length"))?;
                    pos += n;
                    usize::try_from(len)
                        .map_err(|_| corrupt_patch(pos, "value length overflow"))?
                }
                None => {
                    return Err(corrupt_patch(
                        pos,
                        &format!("unknown attribute id {attr_id}"),
                    ));
                }
            };
            let value = pos
                .checked_add(len)
                .and_then(|end| buf.get(pos..end))
                .ok_or_else(|| corrupt_patch(pos, &format!("truncated value of {len} bytes")))?;
            pos += len;
            fields.push(PatchField { attr_id, value });
        }
        Ok(fields)
    }

    fn patch_record_len(&self, field: &PatchField) -> Result<usize> {
        let index = self.field_index(field.attr_id).ok_or_else(|| {
            Error::invalid_arg(
                "patch",
                format!("unknown attribute id {} in '{}'", field.attr_id, self.name()),
            )
        })?;
        let reference = &self.references()[index];
        if !reference.check_length(field.value.len(), self.max_value_len()) {
            return Err(self.length_mismatch(index, field.value.len()));
        }
        let len_prefix = if reference.is_fixed() {
            0
        } else {
            varint::encoded_len(field.value.len() as u64)
        };
        Ok(varint::encoded_len(field.attr_id as u64) + len_prefix + field.value.len())
    }
}

fn put_varint(value: u64, buf: &mut [u8]) -> Result<usize> {
    let available = buf.len();
    varint::encode(value, buf)
        .ok_or_else(|| Error::dest_buffer_too_small(varint::encoded_len(value), available))
}

fn corrupt_patch(pos: usize, message: &str) -> Error {
    Error::invalid_format("patch values", format!("{message} at {pos}"))
}
