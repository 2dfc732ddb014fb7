use serde_json::{Map, Value};

use blade_core::{CanonicalItem, DataType, IMPORT_TIME_FORMAT, META_IMPORT_TIME};

/// Value of the `dataSource` form field, e.g. `BLADE:sortie`.
pub fn data_source_label(data_type: DataType) -> String {
    format!("BLADE:{}", data_type.as_str())
}

/// Metadata document sent alongside an upload.
///
/// Starts from the catalog's required keys and then overlays the item's own
/// metadata, so the transformer's `source` and `importTime` win.
pub fn build_upload_metadata(item: &CanonicalItem) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("dataType".into(), item.data_type.as_str().into());
    metadata.insert("itemId".into(), item.item_id.clone().into());
    metadata.insert("classification".into(), item.classification.as_str().into());
    metadata.insert(
        META_IMPORT_TIME.into(),
        item.last_modified.format(IMPORT_TIME_FORMAT).to_string().into(),
    );
    for (key, value) in &item.metadata {
        metadata.insert(key.clone(), value.clone());
    }
    metadata
}
