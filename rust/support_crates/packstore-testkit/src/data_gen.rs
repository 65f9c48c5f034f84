//! Synthetic schemas and documents for pack attribute tests.

use std::sync::Arc;

use packstore_attribute::{
    AttributeReference, DumpStats, PackAttributeConfig, PackAttributeFormatter,
    PackAttributeWriter, WriterOptions,
};
use packstore_io::file::FileWriter;

use crate::dirs::SegmentPaths;

/// A product catalog pack attribute: every fixed and variable field shape, with
/// attribute ids declared out of order.
pub const PRODUCT_CONFIG_JSON: &str = r#"{
    "name": "product",
    "sub_attributes": [
        { "name": "sku", "attr_id": 4, "field_type": "uint64" },
        { "name": "title", "attr_id": 0, "field_type": "string" },
        { "name": "price", "attr_id": 2, "field_type": "double" },
        { "name": "tags", "attr_id": 7, "field_type": "string", "multi_value": true },
        { "name": "sizes", "attr_id": 3, "field_type": "int16", "multi_value": true },
        { "name": "embedding", "attr_id": 9, "field_type": "float",
          "multi_value": true, "fixed_multi_value_count": 4, "compress": "fp16" },
        { "name": "country", "attr_id": 1, "field_type": "string", "fixed_multi_value_count": 2,
          "multi_value": true }
    ]
}"#;

pub fn product_config() -> anyhow::Result<PackAttributeConfig> {
    Ok(PackAttributeConfig::from_json(PRODUCT_CONFIG_JSON)?)
}

pub fn product_formatter() -> anyhow::Result<Arc<PackAttributeFormatter>> {
    let config = product_config()?;
    Ok(Arc::new(PackAttributeFormatter::from_config(&config)?))
}

/// Generates one value per declared field, in declaration order.
///
/// Variable fields get between zero and `max_elements - 1` elements.
pub fn random_fields(
    formatter: &PackAttributeFormatter,
    rng: &mut fastrand::Rng,
    max_elements: usize,
) -> Vec<Vec<u8>> {
    formatter
        .references()
        .iter()
        .map(|reference| {
            let len = match *reference {
                AttributeReference::Fixed { width, .. } => width,
                AttributeReference::Variable { element_width, .. } => {
                    element_width * rng.usize(0..max_elements.max(1))
                }
            };
            (0..len).map(|_| rng.u8(..)).collect()
        })
        .collect()
}

/// Picks a non-empty subset of fields and generates new values for them.
///
/// Returns `(attr_id, value)` pairs in declaration order.
pub fn random_update(
    formatter: &PackAttributeFormatter,
    rng: &mut fastrand::Rng,
) -> Vec<(u32, Vec<u8>)> {
    let values = random_fields(formatter, rng, 12);
    let forced = rng.usize(..formatter.field_count());
    formatter
        .descriptors()
        .iter()
        .zip(values)
        .enumerate()
        .filter(|(index, _)| *index == forced || rng.bool())
        .map(|(_, (descriptor, value))| (descriptor.attr_id, value))
        .collect()
}

/// Documents buffered in a writer, together with their unpacked field values.
pub struct GeneratedDocs {
    pub writer: PackAttributeWriter,
    pub docs: Vec<Vec<Vec<u8>>>,
}

pub fn generate_docs(
    formatter: Arc<PackAttributeFormatter>,
    count: usize,
    seed: u64,
    options: WriterOptions,
) -> anyhow::Result<GeneratedDocs> {
    let mut writer = PackAttributeWriter::new(formatter.clone(), options);
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut docs = Vec::with_capacity(count);
    for _ in 0..count {
        let fields = random_fields(&formatter, &mut rng, 12);
        let slices = fields.iter().map(|f| f.as_slice()).collect::<Vec<_>>();
        writer.add_document(&slices)?;
        docs.push(fields);
    }
    Ok(GeneratedDocs { writer, docs })
}

/// Dumps the writer's documents into new files at `paths`.
pub fn dump_segment(writer: &PackAttributeWriter, paths: &SegmentPaths) -> anyhow::Result<DumpStats> {
    let mut data = FileWriter::create(&paths.data)?;
    let mut offsets = FileWriter::create(&paths.offsets)?;
    Ok(writer.dump(&mut data, &mut offsets)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_schema() {
        let formatter = product_formatter().unwrap();
        assert_eq!(formatter.field_count(), 7);
        assert_eq!(formatter.var_field_count(), 3);

        let mut rng = fastrand::Rng::with_seed(11);
        let fields = random_fields(&formatter, &mut rng, 12);
        let slices = fields.iter().map(|f| f.as_slice()).collect::<Vec<_>>();
        let packed = formatter.format(&slices).unwrap();
        assert_eq!(formatter.unpack(&packed).unwrap(), slices);

        let update = random_update(&formatter, &mut rng);
        assert!(!update.is_empty());
        for (attr_id, value) in &update {
            assert!(formatter.check_length(*attr_id, value));
        }
    }

    #[test]
    fn test_generate_and_dump() {
        let dir = crate::dirs::scratch_dir("data-gen").unwrap();
        let generated =
            generate_docs(product_formatter().unwrap(), 50, 3, WriterOptions::default()).unwrap();
        assert_eq!(generated.writer.doc_count(), 50);
        let paths = crate::dirs::segment_paths(dir.path(), 1);
        let stats = dump_segment(&generated.writer, &paths).unwrap();
        assert_eq!(stats.doc_count, 50);
        assert_eq!(crate::dirs::file_len(&paths.data).unwrap(), stats.data_bytes);
    }
}
