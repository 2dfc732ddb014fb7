use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BladeError;

/// Metadata key naming the system an item was imported from.
pub const META_SOURCE: &str = "source";

/// Metadata key holding the UTC import instant.
pub const META_IMPORT_TIME: &str = "importTime";

/// Format used for `importTime` and other wire timestamps.
pub const IMPORT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Item metadata: ordered string → JSON map.
pub type ItemMetadata = IndexMap<String, serde_json::Value>;

// ── Data type ─────────────────────────────────────────────────

/// The four BLADE record families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Maintenance,
    Sortie,
    Deployment,
    Logistics,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::Maintenance,
        DataType::Sortie,
        DataType::Deployment,
        DataType::Logistics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Maintenance => "maintenance",
            DataType::Sortie => "sortie",
            DataType::Deployment => "deployment",
            DataType::Logistics => "logistics",
        }
    }

    /// Marking applied when a record carries no valid classification of its own.
    pub fn default_classification(&self) -> ClassificationMarking {
        match self {
            DataType::Maintenance => ClassificationMarking::Unclassified,
            DataType::Sortie => ClassificationMarking::Confidential,
            DataType::Deployment => ClassificationMarking::Secret,
            DataType::Logistics => ClassificationMarking::Unclassified,
        }
    }

    /// Warehouse table used when no explicit mapping is configured.
    pub fn default_table_name(&self) -> String {
        format!("blade_{}_data", self.as_str())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = BladeError;

    /// Accepts the canonical names plus the upstream sub-type aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maintenance" | "engine_maintenance" | "avionics_check" => Ok(DataType::Maintenance),
            "sortie" | "training_mission" | "combat_mission" => Ok(DataType::Sortie),
            "deployment" | "unit_deployment" => Ok(DataType::Deployment),
            "logistics" | "supply_shipment" | "parts_delivery" => Ok(DataType::Logistics),
            other => Err(BladeError::UnknownDataType(other.to_string())),
        }
    }
}

// ── Classification ────────────────────────────────────────────

/// Classification markings accepted by the catalog.
///
/// Matching is exact and case-sensitive on the wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassificationMarking {
    #[serde(rename = "U")]
    U,
    #[serde(rename = "UNCLASSIFIED")]
    Unclassified,
    #[serde(rename = "CUI")]
    Cui,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "CONFIDENTIAL")]
    Confidential,
    #[serde(rename = "S")]
    S,
    #[serde(rename = "SECRET")]
    Secret,
    #[serde(rename = "TS")]
    Ts,
    #[serde(rename = "TOP SECRET")]
    TopSecret,
}

impl ClassificationMarking {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationMarking::U => "U",
            ClassificationMarking::Unclassified => "UNCLASSIFIED",
            ClassificationMarking::Cui => "CUI",
            ClassificationMarking::C => "C",
            ClassificationMarking::Confidential => "CONFIDENTIAL",
            ClassificationMarking::S => "S",
            ClassificationMarking::Secret => "SECRET",
            ClassificationMarking::Ts => "TS",
            ClassificationMarking::TopSecret => "TOP SECRET",
        }
    }

    /// Returns `true` if `marking` is one of the accepted markings.
    pub fn is_valid(marking: &str) -> bool {
        marking.parse::<ClassificationMarking>().is_ok()
    }
}

impl fmt::Display for ClassificationMarking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassificationMarking {
    type Err = BladeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "U" => Ok(ClassificationMarking::U),
            "UNCLASSIFIED" => Ok(ClassificationMarking::Unclassified),
            "CUI" => Ok(ClassificationMarking::Cui),
            "C" => Ok(ClassificationMarking::C),
            "CONFIDENTIAL" => Ok(ClassificationMarking::Confidential),
            "S" => Ok(ClassificationMarking::S),
            "SECRET" => Ok(ClassificationMarking::Secret),
            "TS" => Ok(ClassificationMarking::Ts),
            "TOP SECRET" => Ok(ClassificationMarking::TopSecret),
            other => Err(BladeError::InvalidClassification(other.to_string())),
        }
    }
}

// ── Canonical item ────────────────────────────────────────────

/// A normalized BLADE record, independent of the warehouse schema it came from.
///
/// `payload` is kept opaque: each data type has its own documented schema
/// (see [`crate::schema`]) but the pipeline never depends on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalItem {
    pub item_id: String,
    pub data_type: DataType,
    pub payload: serde_json::Value,
    pub classification: ClassificationMarking,
    pub last_modified: DateTime<Utc>,
    pub metadata: ItemMetadata,
    pub data_source_id: Option<Uuid>,
    pub ingestion_job_id: Option<Uuid>,
    pub catalog_id: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl CanonicalItem {
    /// Attach the owning data source and the sync run that produced this item.
    pub fn with_tracking(mut self, data_source_id: Uuid, ingestion_job_id: Uuid) -> Self {
        self.data_source_id = Some(data_source_id);
        self.ingestion_job_id = Some(ingestion_job_id);
        self
    }

    /// Record a successful catalog upload.
    pub fn mark_uploaded(&mut self, catalog_id: Option<String>, at: DateTime<Utc>) {
        self.catalog_id = catalog_id;
        self.uploaded_at = Some(at);
    }

    /// Structural checks performed before an upload is attempted.
    pub fn validate(&self) -> Result<(), BladeError> {
        if self.item_id.trim().is_empty() {
            return Err(BladeError::Validation("item_id is empty".into()));
        }
        for key in [META_SOURCE, META_IMPORT_TIME] {
            if !self.metadata.contains_key(key) {
                return Err(BladeError::Validation(format!(
                    "item {} is missing metadata key '{}'",
                    self.item_id, key
                )));
            }
        }
        Ok(())
    }

    /// File name used when the payload is shipped as a document.
    pub fn file_name(&self) -> String {
        format!("{}_{}.json", self.data_type, self.item_id)
    }
}
