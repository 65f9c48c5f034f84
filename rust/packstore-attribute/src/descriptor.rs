//! Sub-attribute descriptors and the pack attribute configuration.

use packstore_common::{Result, error::Error};
use serde::{Deserialize, Serialize};

/// Declared element type of a sub-attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int8,
    #[serde(rename = "uint8")]
    UInt8,
    Int16,
    #[serde(rename = "uint16")]
    UInt16,
    Int32,
    #[serde(rename = "uint32")]
    UInt32,
    Int64,
    #[serde(rename = "uint64")]
    UInt64,
    Float,
    Double,
    String,
}

impl FieldType {
    /// Uncompressed size of a single element, in bytes.
    ///
    /// A `String` element is one byte of text.
    pub fn scalar_width(&self) -> usize {
        match self {
            FieldType::Int8 | FieldType::UInt8 | FieldType::String => 1,
            FieldType::Int16 | FieldType::UInt16 => 2,
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float => 4,
            FieldType::Int64 | FieldType::UInt64 | FieldType::Double => 8,
        }
    }
}

/// Storage compression applied to a sub-attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressMode {
    #[default]
    None,
    /// Half-precision float, 2 bytes per element.
    Fp16,
    /// Single-byte quantized float.
    Int8Fp,
    /// Values are deduplicated at the column level.
    Uniq,
}

/// Schema-derived description of one field inside a pack attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAttributeDescriptor {
    pub name: String,
    pub attr_id: u32,
    pub field_type: FieldType,
    #[serde(default)]
    pub multi_value: bool,
    /// Statically known element count of a multi-value field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_multi_value_count: Option<u32>,
    #[serde(default)]
    pub compress: CompressMode,
}

impl SubAttributeDescriptor {
    pub fn new(name: impl Into<String>, attr_id: u32, field_type: FieldType) -> Self {
        SubAttributeDescriptor {
            name: name.into(),
            attr_id,
            field_type,
            multi_value: false,
            fixed_multi_value_count: None,
            compress: CompressMode::None,
        }
    }

    pub fn multi_value(mut self) -> Self {
        self.multi_value = true;
        self
    }

    pub fn fixed_count(mut self, count: u32) -> Self {
        self.multi_value = true;
        self.fixed_multi_value_count = Some(count);
        self
    }

    pub fn compress(mut self, compress: CompressMode) -> Self {
        self.compress = compress;
        self
    }

    /// Stored size of a single element, taking float compression into account.
    pub fn element_width(&self) -> usize {
        match (self.field_type, self.compress) {
            (FieldType::Float, CompressMode::Fp16) => 2,
            (FieldType::Float, CompressMode::Int8Fp) => 1,
            (field_type, _) => field_type.scalar_width(),
        }
    }

    /// Width of the field in the fixed prefix, or `None` for a variable-length field.
    pub fn fixed_width(&self) -> Option<usize> {
        match (self.multi_value, self.fixed_multi_value_count) {
            (false, _) if self.field_type != FieldType::String => Some(self.element_width()),
            (true, Some(count)) => Some(count as usize * self.element_width()),
            _ => None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_width().is_some()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("sub attribute", "empty name"));
        }
        if matches!(self.compress, CompressMode::Fp16 | CompressMode::Int8Fp)
            && self.field_type != FieldType::Float
        {
            return Err(Error::config(
                &self.name,
                format!(
                    "compression {:?} requires a float field, found {:?}",
                    self.compress, self.field_type
                ),
            ));
        }
        match (self.multi_value, self.fixed_multi_value_count) {
            (_, Some(0)) => Err(Error::config(
                &self.name,
                "fixed multi-value count must be positive",
            )),
            (false, Some(_)) => Err(Error::config(
                &self.name,
                "fixed multi-value count on a single-value field",
            )),
            _ => Ok(()),
        }
    }
}

/// Configuration of a pack attribute column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackAttributeConfig {
    pub name: String,
    pub sub_attributes: Vec<SubAttributeDescriptor>,
    /// Store byte-identical packed values once per segment.
    #[serde(default)]
    pub uniq_encode: bool,
    /// Upper bound on the length of a single variable-length field value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value_len: Option<u32>,
}

impl PackAttributeConfig {
    pub fn new(name: impl Into<String>, sub_attributes: Vec<SubAttributeDescriptor>) -> Self {
        PackAttributeConfig {
            name: name.into(),
            sub_attributes,
            uniq_encode: false,
            max_value_len: None,
        }
    }

    pub fn from_json(json: &str) -> Result<PackAttributeConfig> {
        serde_json::from_str(json)
            .map_err(|e| Error::config("pack attribute config", e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::config("pack attribute config", e.to_string()))
    }
}
