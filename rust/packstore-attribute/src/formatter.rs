//! Layout engine and value codec of a pack attribute.

use ahash::AHashMap;
use byteorder::{ByteOrder, LittleEndian};
use packstore_chunk::MAX_CHUNK_DATA_LEN;
use packstore_common::{Result, error::Error};

use crate::{
    descriptor::{PackAttributeConfig, SubAttributeDescriptor},
    reference::{AttributeReference, FieldOffset, VAR_SLOT_SIZE, VarSlot},
    varint,
};

/// Length of the opaque routing key that may precede a packed value.
pub const ROUTING_FIELD_LEN: usize = 8;

/// New value of one sub-attribute for one document.
///
/// `value` borrows from the buffer the patch was built or decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchField<'a> {
    pub attr_id: u32,
    pub value: &'a [u8],
}

impl<'a> PatchField<'a> {
    pub fn new(attr_id: u32, value: &'a [u8]) -> PatchField<'a> {
        PatchField { attr_id, value }
    }
}

/// Builds and reads packed values for a fixed, ordered list of sub-attributes.
///
/// Packed value layout:
/// ```text
/// [fixed prefix: fixed fields at their offsets | u32 offset slot per variable field]
/// [variable region: per variable field, in declared order: LEB128 length | bytes]
/// ```
/// Offsets stored in the slots are relative to the start of the packed value.
/// The formatter is immutable after construction and can be shared across threads.
#[derive(Debug)]
pub struct PackAttributeFormatter {
    name: String,
    descriptors: Vec<SubAttributeDescriptor>,
    references: Vec<AttributeReference>,
    name_index: AHashMap<String, usize>,
    id_index: AHashMap<u32, usize>,
    fixed_attr_size: usize,
    var_field_count: usize,
    max_value_len: usize,
    uniq_encode: bool,
}

impl PackAttributeFormatter {
    pub fn new(
        name: impl Into<String>,
        descriptors: Vec<SubAttributeDescriptor>,
    ) -> Result<PackAttributeFormatter> {
        let name = name.into();
        if descriptors.is_empty() {
            return Err(Error::config(name, "pack attribute has no sub attributes"));
        }

        let mut name_index = AHashMap::with_capacity(descriptors.len());
        let mut id_index = AHashMap::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.iter().enumerate() {
            descriptor.validate()?;
            if name_index.insert(descriptor.name.clone(), i).is_some() {
                return Err(Error::config(
                    &name,
                    format!("duplicate sub attribute name '{}'", descriptor.name),
                ));
            }
            if id_index.insert(descriptor.attr_id, i).is_some() {
                return Err(Error::config(
                    &name,
                    format!("duplicate attribute id {}", descriptor.attr_id),
                ));
            }
        }

        let fixed_fields_size = descriptors
            .iter()
            .filter_map(|d| d.fixed_width())
            .sum::<usize>();
        let mut fixed_offset = 0;
        let mut var_slot = 0;
        let references = descriptors
            .iter()
            .map(|descriptor| match descriptor.fixed_width() {
                Some(width) => {
                    let offset = FieldOffset(fixed_offset);
                    fixed_offset += width;
                    AttributeReference::Fixed { offset, width }
                }
                None => {
                    let slot = VarSlot(var_slot);
                    var_slot += 1;
                    AttributeReference::Variable {
                        slot,
                        slot_offset: FieldOffset(fixed_fields_size + slot.0 * VAR_SLOT_SIZE),
                        element_width: descriptor.element_width(),
                    }
                }
            })
            .collect::<Vec<_>>();
        let fixed_attr_size = fixed_fields_size + var_slot * VAR_SLOT_SIZE;

        log::debug!(
            "PackAttributeFormatter {name}: {} fields ({} variable), fixed prefix {} bytes",
            descriptors.len(),
            var_slot,
            fixed_attr_size
        );

        Ok(PackAttributeFormatter {
            name,
            descriptors,
            references,
            name_index,
            id_index,
            fixed_attr_size,
            var_field_count: var_slot,
            max_value_len: MAX_CHUNK_DATA_LEN,
            uniq_encode: false,
        })
    }

    pub fn from_config(config: &PackAttributeConfig) -> Result<PackAttributeFormatter> {
        let mut formatter = Self::new(config.name.clone(), config.sub_attributes.clone())?;
        if let Some(max_value_len) = config.max_value_len {
            formatter.max_value_len = max_value_len as usize;
        }
        formatter.uniq_encode = config.uniq_encode;
        Ok(formatter)
    }

    /// Overrides the bound on a single variable-length field value.
    pub fn with_max_value_len(mut self, max_value_len: usize) -> Self {
        self.max_value_len = max_value_len;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptors(&self) -> &[SubAttributeDescriptor] {
        &self.descriptors
    }

    pub fn references(&self) -> &[AttributeReference] {
        &self.references
    }

    pub fn field_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Size of the fixed prefix of every packed value.
    pub fn fixed_attr_size(&self) -> usize {
        self.fixed_attr_size
    }

    pub fn var_field_count(&self) -> usize {
        self.var_field_count
    }

    pub fn max_value_len(&self) -> usize {
        self.max_value_len
    }

    pub fn uniq_encode(&self) -> bool {
        self.uniq_encode
    }

    /// Declared position of the field with `attr_id`.
    pub fn field_index(&self, attr_id: u32) -> Option<usize> {
        self.id_index.get(&attr_id).copied()
    }

    pub fn field_index_by_name(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    pub fn reference(&self, attr_id: u32) -> Option<&AttributeReference> {
        self.field_index(attr_id).map(|i| &self.references[i])
    }

    /// Validates `value` against the declared length constraints of `attr_id`.
    ///
    /// Returns `false` for an unknown id.
    pub fn check_length(&self, attr_id: u32, value: &[u8]) -> bool {
        self.reference(attr_id)
            .is_some_and(|r| r.check_length(value.len(), self.max_value_len))
    }

    /// Builds the packed value of a document.
    ///
    /// `fields` holds one value per sub-attribute, in declared order.
    pub fn format(&self, fields: &[&[u8]]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.estimate_len(fields));
        self.format_into(fields, &mut out)?;
        Ok(out)
    }

    /// Appends the packed value of a document to `out`.
    ///
    /// On error, `out` may hold a partially written value past its original length.
    pub fn format_into(&self, fields: &[&[u8]], out: &mut Vec<u8>) -> Result<()> {
        if fields.len() != self.references.len() {
            return Err(Error::invalid_arg(
                "fields",
                format!(
                    "expected {} field values for '{}', got {}",
                    self.references.len(),
                    self.name,
                    fields.len()
                ),
            ));
        }
        for (i, (reference, value)) in self.references.iter().zip(fields).enumerate() {
            if !reference.check_length(value.len(), self.max_value_len) {
                return Err(self.length_mismatch(i, value.len()));
            }
        }

        let start = out.len();
        out.resize(start + self.fixed_attr_size, 0);
        for (reference, value) in self.references.iter().zip(fields) {
            match *reference {
                AttributeReference::Fixed {
                    offset: FieldOffset(offset),
                    width,
                } => {
                    out[start + offset..start + offset + width].copy_from_slice(value);
                }
                AttributeReference::Variable {
                    slot_offset: FieldOffset(slot_offset),
                    ..
                } => {
                    let pos = out.len() - start;
                    let pos = u32::try_from(pos).map_err(|_| {
                        Error::capacity("packed value", pos as u64, u32::MAX as u64)
                    })?;
                    let slot = start + slot_offset;
                    LittleEndian::write_u32(&mut out[slot..slot + VAR_SLOT_SIZE], pos);
                    varint::encode_to_vec(value.len() as u64, out);
                    out.extend_from_slice(value);
                }
            }
        }
        Ok(())
    }

    /// Returns the value of `attr_id` within a packed value, or an empty slice if the
    /// id is not declared.
    pub fn get_field_value_from_packed_value<'a>(
        &self,
        packed: &'a [u8],
        attr_id: u32,
    ) -> Result<&'a [u8]> {
        match self.reference(attr_id) {
            Some(reference) => reference.read(packed),
            None => Ok(&[]),
        }
    }

    pub fn get_field_value_by_name<'a>(&self, packed: &'a [u8], name: &str) -> Result<&'a [u8]> {
        match self.field_index_by_name(name) {
            Some(i) => self.references[i].read(packed),
            None => Ok(&[]),
        }
    }

    /// Splits a packed value into its field values, in declared order.
    pub fn unpack<'a>(&self, packed: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        if packed.len() < self.fixed_attr_size {
            return Err(Error::invalid_format(
                "packed value",
                format!(
                    "length {} is shorter than the fixed prefix {}",
                    packed.len(),
                    self.fixed_attr_size
                ),
            ));
        }
        self.references.iter().map(|r| r.read(packed)).collect()
    }

    /// Builds a new packed value from `base` with the fields in `patch` replaced.
    ///
    /// When the same id appears more than once in `patch`, the last entry wins. With
    /// `has_leading_routing_field`, the first [`ROUTING_FIELD_LEN`] bytes of `base` are
    /// copied to the result unchanged. The result is byte-identical to
    /// [`format`](Self::format) of the final field values.
    pub fn merge_and_format_update_fields(
        &self,
        base: &[u8],
        patch: &[PatchField],
        has_leading_routing_field: bool,
    ) -> Result<Vec<u8>> {
        let patch_len = patch.iter().map(|f| f.value.len()).sum::<usize>();
        let mut out = Vec::with_capacity(base.len() + patch_len);
        self.merge_and_format_update_fields_into(
            base,
            patch,
            has_leading_routing_field,
            &mut out,
        )?;
        Ok(out)
    }

    pub fn merge_and_format_update_fields_into(
        &self,
        base: &[u8],
        patch: &[PatchField],
        has_leading_routing_field: bool,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let (routing, packed) = if has_leading_routing_field {
            if base.len() < ROUTING_FIELD_LEN {
                return Err(Error::invalid_format(
                    "packed value",
                    format!("missing routing field, value length is {}", base.len()),
                ));
            }
            base.split_at(ROUTING_FIELD_LEN)
        } else {
            (&base[..0], base)
        };

        let mut values = self.unpack(packed)?;
        for field in patch {
            let index = self.field_index(field.attr_id).ok_or_else(|| {
                Error::invalid_arg(
                    "patch",
                    format!("unknown attribute id {} in '{}'", field.attr_id, self.name),
                )
            })?;
            values[index] = field.value;
        }

        out.extend_from_slice(routing);
        self.format_into(&values, out)
    }

    pub(crate) fn length_mismatch(&self, index: usize, len: usize) -> Error {
        let descriptor = &self.descriptors[index];
        Error::invalid_arg(
            &descriptor.name,
            match self.references[index] {
                AttributeReference::Fixed { width, .. } => {
                    format!("value length {len} does not match the fixed width {width}")
                }
                AttributeReference::Variable { element_width, .. } => format!(
                    "value length {len} is not a multiple of {element_width} \
                     or exceeds the limit {}",
                    self.max_value_len
                ),
            },
        )
    }

    fn estimate_len(&self, fields: &[&[u8]]) -> usize {
        self.fixed_attr_size
            + self
                .references
                .iter()
                .zip(fields)
                .filter(|(r, _)| !r.is_fixed())
                .map(|(_, v)| v.len() + varint::encoded_len(v.len() as u64))
                .sum::<usize>()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use packstore_common::error::ErrorKind;

    use super::*;
    use crate::descriptor::{CompressMode, FieldType};

    /// Fixed `u32 a`, fixed `u32 b`, variable `string c`.
    pub(crate) fn abc_formatter() -> PackAttributeFormatter {
        PackAttributeFormatter::new(
            "abc",
            vec![
                SubAttributeDescriptor::new("a", 0, FieldType::UInt32),
                SubAttributeDescriptor::new("b", 1, FieldType::UInt32),
                SubAttributeDescriptor::new("c", 2, FieldType::String),
            ],
        )
        .unwrap()
    }

    /// One field of every shape, with sparse attribute ids.
    pub(crate) fn mixed_formatter() -> PackAttributeFormatter {
        PackAttributeFormatter::new(
            "mixed",
            vec![
                SubAttributeDescriptor::new("title", 7, FieldType::String),
                SubAttributeDescriptor::new("price", 1, FieldType::Double),
                SubAttributeDescriptor::new("tags", 3, FieldType::Int32).multi_value(),
                SubAttributeDescriptor::new("flag", 0, FieldType::Int8),
                SubAttributeDescriptor::new("vec", 12, FieldType::Float)
                    .fixed_count(4)
                    .compress(CompressMode::Fp16),
                SubAttributeDescriptor::new("code", 5, FieldType::String).fixed_count(3),
                SubAttributeDescriptor::new("names", 9, FieldType::String).multi_value(),
            ],
        )
        .unwrap()
    }

    pub(crate) fn random_fields(
        formatter: &PackAttributeFormatter,
        rng: &mut fastrand::Rng,
    ) -> Vec<Vec<u8>> {
        formatter
            .references()
            .iter()
            .map(|r| {
                let len = match *r {
                    AttributeReference::Fixed { width, .. } => width,
                    AttributeReference::Variable { element_width, .. } => {
                        element_width * rng.usize(0..20)
                    }
                };
                (0..len).map(|_| rng.u8(..)).collect()
            })
            .collect()
    }

    fn as_slices(fields: &[Vec<u8>]) -> Vec<&[u8]> {
        fields.iter().map(|f| f.as_slice()).collect()
    }

    #[test]
    fn test_layout() {
        let formatter = mixed_formatter();
        // price 8 + flag 1 + vec 8 + code 3 = 20 fixed bytes, 3 variable slots
        assert_eq!(formatter.fixed_attr_size(), 20 + 3 * VAR_SLOT_SIZE);
        assert_eq!(formatter.var_field_count(), 3);
        assert_eq!(
            formatter.reference(1),
            Some(&AttributeReference::Fixed {
                offset: FieldOffset(0),
                width: 8
            })
        );
        assert_eq!(
            formatter.reference(9),
            Some(&AttributeReference::Variable {
                slot: VarSlot(2),
                slot_offset: FieldOffset(28),
                element_width: 1
            })
        );
        assert_eq!(formatter.reference(2), None);
        assert_eq!(formatter.reference(100), None);
        assert_eq!(formatter.field_index_by_name("vec"), Some(4));
    }

    #[test]
    fn test_end_to_end_abc() {
        let formatter = abc_formatter();
        let packed = formatter
            .format(&[&5u32.to_le_bytes(), &9u32.to_le_bytes(), b"hi"])
            .unwrap();
        assert_eq!(
            formatter.get_field_value_from_packed_value(&packed, 2).unwrap(),
            b"hi"
        );

        let b = 42u32.to_le_bytes();
        let updated = formatter
            .merge_and_format_update_fields(&packed, &[PatchField::new(1, &b)], false)
            .unwrap();
        assert_eq!(
            formatter.get_field_value_from_packed_value(&updated, 0).unwrap(),
            5u32.to_le_bytes()
        );
        assert_eq!(
            formatter.get_field_value_from_packed_value(&updated, 1).unwrap(),
            42u32.to_le_bytes()
        );
        assert_eq!(
            formatter.get_field_value_by_name(&updated, "c").unwrap(),
            b"hi"
        );
    }

    #[test]
    fn test_round_trip_and_determinism() {
        let formatter = mixed_formatter();
        let mut rng = fastrand::Rng::with_seed(42);
        for _ in 0..200 {
            let fields = random_fields(&formatter, &mut rng);
            let slices = as_slices(&fields);
            let packed = formatter.format(&slices).unwrap();
            assert_eq!(formatter.format(&slices).unwrap(), packed);
            for (descriptor, expected) in formatter.descriptors().iter().zip(&fields) {
                let value = formatter
                    .get_field_value_from_packed_value(&packed, descriptor.attr_id)
                    .unwrap();
                assert_eq!(value, expected.as_slice());
            }
            assert_eq!(formatter.unpack(&packed).unwrap(), slices);
        }
    }

    #[test]
    fn test_unknown_id_is_empty() {
        let formatter = abc_formatter();
        let packed = formatter
            .format(&[&[0; 4], &[0; 4], b"x"])
            .unwrap();
        assert!(
            formatter
                .get_field_value_from_packed_value(&packed, 77)
                .unwrap()
                .is_empty()
        );
        assert!(formatter.get_field_value_by_name(&packed, "zz").unwrap().is_empty());
    }

    #[test]
    fn test_partial_update_convergence() {
        let formatter = mixed_formatter();
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..50 {
            let base_fields = random_fields(&formatter, &mut rng);
            let new_fields = random_fields(&formatter, &mut rng);
            let base = formatter.format(&as_slices(&base_fields)).unwrap();

            let mut patches = formatter
                .descriptors()
                .iter()
                .zip(&new_fields)
                .filter(|_| rng.bool())
                .map(|(d, v)| PatchField::new(d.attr_id, v))
                .collect::<Vec<_>>();

            let mut expected_fields = as_slices(&base_fields);
            for patch in &patches {
                let i = formatter.field_index(patch.attr_id).unwrap();
                expected_fields[i] = patch.value;
            }
            let expected = formatter.format(&expected_fields).unwrap();

            let mut forward = base.clone();
            for patch in &patches {
                forward = formatter
                    .merge_and_format_update_fields(&forward, &[*patch], false)
                    .unwrap();
            }
            assert_eq!(forward, expected);

            rng.shuffle(&mut patches);
            let mut shuffled = base.clone();
            for patch in &patches {
                shuffled = formatter
                    .merge_and_format_update_fields(&shuffled, &[*patch], false)
                    .unwrap();
            }
            assert_eq!(shuffled, expected);

            let at_once = formatter
                .merge_and_format_update_fields(&base, &patches, false)
                .unwrap();
            assert_eq!(at_once, expected);
        }
    }

    #[test]
    fn test_last_patch_wins() {
        let formatter = abc_formatter();
        let base = formatter.format(&[&[1; 4], &[2; 4], b"old"]).unwrap();
        let merged = formatter
            .merge_and_format_update_fields(
                &base,
                &[PatchField::new(2, b"first"), PatchField::new(2, b"second")],
                false,
            )
            .unwrap();
        assert_eq!(formatter.get_field_value_from_packed_value(&merged, 2).unwrap(), b"second");
    }

    #[test]
    fn test_routing_field_preserved() {
        let formatter = abc_formatter();
        let mut base = b"ROUTE-01".to_vec();
        formatter
            .format_into(&[&[1; 4], &[2; 4], b"body"], &mut base)
            .unwrap();
        let merged = formatter
            .merge_and_format_update_fields(&base, &[PatchField::new(2, b"new body")], true)
            .unwrap();
        assert_eq!(&merged[..ROUTING_FIELD_LEN], b"ROUTE-01");
        let packed = &merged[ROUTING_FIELD_LEN..];
        assert_eq!(formatter.get_field_value_from_packed_value(packed, 2).unwrap(), b"new body");
        assert_eq!(formatter.get_field_value_from_packed_value(packed, 0).unwrap(), [1u8; 4]);

        let err = formatter
            .merge_and_format_update_fields(b"short", &[], true)
            .unwrap_err();
        assert!(err.is_data_corruption());
    }

    #[test]
    fn test_merge_rejects_unknown_id() {
        let formatter = abc_formatter();
        let base = formatter.format(&[&[1; 4], &[2; 4], b""]).unwrap();
        let err = formatter
            .merge_and_format_update_fields(&base, &[PatchField::new(9, b"x")], false)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn test_format_validates_lengths() {
        let formatter = mixed_formatter();
        let mut rng = fastrand::Rng::with_seed(3);
        let mut fields = random_fields(&formatter, &mut rng);
        fields[2] = vec![0; 6];
        let err = formatter.format(&as_slices(&fields)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { name, .. } if name == "tags"));

        let err = formatter.format(&as_slices(&fields[..3])).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));

        let bounded = abc_formatter().with_max_value_len(4);
        assert!(bounded.format(&[&[0; 4], &[0; 4], b"1234"]).is_ok());
        assert!(bounded.format(&[&[0; 4], &[0; 4], b"12345"]).is_err());
        assert!(bounded.check_length(2, b"1234"));
        assert!(!bounded.check_length(0, b"123"));
        assert!(!bounded.check_length(42, b"1234"));
    }

    #[test]
    fn test_corrupt_blob() {
        let formatter = abc_formatter();
        let packed = formatter.format(&[&[1; 4], &[2; 4], b"hello"]).unwrap();
        let truncated = &packed[..packed.len() - 2];
        assert!(
            formatter
                .get_field_value_from_packed_value(truncated, 2)
                .unwrap_err()
                .is_data_corruption()
        );
        assert!(formatter.unpack(&packed[..3]).unwrap_err().is_data_corruption());
    }

    #[test]
    fn test_config_errors() {
        let dup_name = PackAttributeFormatter::new(
            "p",
            vec![
                SubAttributeDescriptor::new("a", 0, FieldType::Int32),
                SubAttributeDescriptor::new("a", 1, FieldType::Int32),
            ],
        );
        assert!(matches!(dup_name.unwrap_err().kind(), ErrorKind::Config { .. }));

        let dup_id = PackAttributeFormatter::new(
            "p",
            vec![
                SubAttributeDescriptor::new("a", 3, FieldType::Int32),
                SubAttributeDescriptor::new("b", 3, FieldType::Int32),
            ],
        );
        assert!(matches!(dup_id.unwrap_err().kind(), ErrorKind::Config { .. }));

        assert!(PackAttributeFormatter::new("p", vec![]).is_err());
    }

    #[test]
    fn test_sparse_attribute_ids() {
        let config = PackAttributeConfig::from_json(
            r#"{
                "name": "sparse",
                "sub_attributes": [
                    { "name": "big", "attr_id": 4294967295, "field_type": "uint32" },
                    { "name": "small", "attr_id": 2, "field_type": "string" }
                ]
            }"#,
        )
        .unwrap();
        let formatter = PackAttributeFormatter::from_config(&config).unwrap();
        assert_eq!(formatter.field_index(u32::MAX), Some(0));
        assert_eq!(formatter.field_index(2), Some(1));
        assert_eq!(formatter.field_index(3), None);

        let seven = 7u32.to_le_bytes();
        let packed = formatter.format(&[&seven[..], &b"hi"[..]]).unwrap();
        assert_eq!(
            formatter
                .get_field_value_from_packed_value(&packed, u32::MAX)
                .unwrap(),
            &seven[..]
        );

        let nine = 9u32.to_le_bytes();

        let patch = [PatchField::new(u32::MAX, &nine[..])];
        let mut encoded = Vec::new();
        formatter
            .encode_patch_values_to_vec(&patch, &mut encoded)
            .unwrap();
        let decoded = formatter.decode_patch_values(&encoded).unwrap();
        assert_eq!(decoded, patch);
    }

    #[test]
    fn test_from_config() {
        let mut config = PackAttributeConfig::new(
            "cfg",
            vec![
                SubAttributeDescriptor::new("id", 0, FieldType::UInt64),
                SubAttributeDescriptor::new("body", 1, FieldType::String),
            ],
        );
        config.uniq_encode = true;
        config.max_value_len = Some(16);
        let formatter = PackAttributeFormatter::from_config(&config).unwrap();
        assert_eq!(formatter.name(), "cfg");
        assert!(formatter.uniq_encode());
        assert_eq!(formatter.max_value_len(), 16);
        assert_eq!(formatter.fixed_attr_size(), 8 + VAR_SLOT_SIZE);
    }
}
