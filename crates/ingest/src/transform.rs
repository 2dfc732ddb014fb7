//! Warehouse row → canonical item.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use blade_core::config::SyncConfig;
use blade_core::{
    CanonicalItem, ClassificationMarking, DataType, ItemMetadata, IMPORT_TIME_FORMAT,
    META_IMPORT_TIME, META_SOURCE,
};
use blade_warehouse::{decode_row, parse_timestamp, ConvertError, RawRow};

const ITEM_ID_COLUMN: &str = "item_id";
const CLASSIFICATION_COLUMN: &str = "classification";
const LAST_MODIFIED_COLUMN: &str = "last_modified";

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("row could not be serialized: {0}")]
    Serialization(#[from] ConvertError),
}

/// Builds canonical items for one sync run.
///
/// Holds the registry of synthesized ids, so a transformer should not outlive
/// the run it was created for.
pub struct Transformer {
    classifications: BTreeMap<DataType, ClassificationMarking>,
    fallback: ClassificationMarking,
    item_source: String,
    synthesized: Mutex<HashMap<(DataType, i64), u32>>,
}

impl Transformer {
    /// Transformer with the built-in per-type classification defaults.
    pub fn new(item_source: impl Into<String>) -> Self {
        Self {
            classifications: DataType::ALL
                .iter()
                .map(|dt| (*dt, dt.default_classification()))
                .collect(),
            fallback: ClassificationMarking::Unclassified,
            item_source: item_source.into(),
            synthesized: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self {
            classifications: cfg.classification_defaults(),
            fallback: cfg.fallback_classification(),
            item_source: cfg.item_source.clone(),
            synthesized: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_classification(mut self, data_type: DataType, marking: ClassificationMarking) -> Self {
        self.classifications.insert(data_type, marking);
        self
    }

    /// Marking applied to `data_type` records without a valid one.
    pub fn default_classification(&self, data_type: DataType) -> ClassificationMarking {
        self.classifications
            .get(&data_type)
            .copied()
            .unwrap_or(self.fallback)
    }

    pub fn transform(&self, data_type: DataType, row: &RawRow) -> Result<CanonicalItem, TransformError> {
        self.transform_at(data_type, row, Utc::now())
    }

    /// Same as [`Self::transform`] with an explicit clock.
    pub fn transform_at(
        &self,
        data_type: DataType,
        row: &RawRow,
        now: DateTime<Utc>,
    ) -> Result<CanonicalItem, TransformError> {
        let payload = decode_row(row)?;

        let item_id = match payload.get(ITEM_ID_COLUMN) {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            _ => self.synthesize_id(data_type, now),
        };

        let classification = match payload.get(CLASSIFICATION_COLUMN) {
            Some(Value::String(raw)) => raw.parse().unwrap_or_else(|_| {
                debug!(
                    item_id = %item_id,
                    marking = %raw,
                    "invalid classification, using type default"
                );
                self.default_classification(data_type)
            }),
            _ => self.default_classification(data_type),
        };

        let last_modified = payload
            .get(LAST_MODIFIED_COLUMN)
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(now);

        let mut metadata = ItemMetadata::new();
        metadata.insert(META_SOURCE.into(), Value::String(self.item_source.clone()));
        metadata.insert(
            META_IMPORT_TIME.into(),
            Value::String(now.format(IMPORT_TIME_FORMAT).to_string()),
        );

        Ok(CanonicalItem {
            item_id,
            data_type,
            payload: Value::Object(payload),
            classification,
            last_modified,
            metadata,
            data_source_id: None,
            ingestion_job_id: None,
            catalog_id: None,
            uploaded_at: None,
        })
    }

    /// `<dataType>-<unixSeconds>`, suffixed `-<n>` for the n-th id issued in
    /// the same second.
    fn synthesize_id(&self, data_type: DataType, now: DateTime<Utc>) -> String {
        let secs = now.timestamp();
        let mut issued = self
            .synthesized
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let n = issued.entry((data_type, secs)).or_insert(0);
        *n += 1;
        if *n == 1 {
            format!("{data_type}-{secs}")
        } else {
            format!("{data_type}-{secs}-{n}")
        }
    }
}
