//! Documented per-type payload schemas.
//!
//! Payloads travel through the pipeline as opaque JSON. These records describe
//! what each data type is expected to carry and can be decoded on demand with
//! [`TypedPayload::decode`]; nothing in the sync path requires them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BladeError;
use crate::item::{CanonicalItem, DataType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub item_id: String,
    pub aircraft_tail: String,
    pub aircraft_type: String,
    pub maintenance_type: String,
    pub maintenance_code: String,
    #[serde(default)]
    pub description: String,
    pub priority: String,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub actual_completion: Option<DateTime<Utc>>,
    #[serde(default)]
    pub technician_assigned: String,
    pub base_location: String,
    #[serde(default)]
    pub work_order: String,
    pub next_scheduled_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortieRecord {
    pub item_id: String,
    pub mission_id: String,
    pub aircraft_tail: String,
    pub aircraft_type: String,
    pub pilot_callsign: String,
    pub mission_type: String,
    pub departure_base: String,
    pub destination_base: String,
    pub scheduled_departure: DateTime<Utc>,
    pub actual_departure: Option<DateTime<Utc>>,
    pub scheduled_arrival: DateTime<Utc>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub flight_hours: Option<f64>,
    pub mission_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub item_id: String,
    pub deployment_id: String,
    pub unit_designation: String,
    pub unit_type: String,
    pub personnel_count: i64,
    pub commanding_officer: String,
    pub deployment_location: String,
    pub origin_base: String,
    pub deployment_start_date: DateTime<Utc>,
    pub deployment_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mission_objective: String,
    pub operational_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticsRecord {
    pub item_id: String,
    pub shipment_id: String,
    pub supply_type: String,
    #[serde(default)]
    pub description: String,
    pub quantity: i64,
    pub unit_of_measure: String,
    #[serde(default)]
    pub vendor: String,
    pub origin_location: String,
    pub destination_location: String,
    pub shipped_date: Option<DateTime<Utc>>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub priority: String,
}

/// A payload decoded into the record type matching its [`DataType`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "dataType", rename_all = "snake_case")]
pub enum TypedPayload {
    Maintenance(MaintenanceRecord),
    Sortie(SortieRecord),
    Deployment(DeploymentRecord),
    Logistics(LogisticsRecord),
}

impl TypedPayload {
    pub fn decode(data_type: DataType, payload: &serde_json::Value) -> Result<Self, BladeError> {
        let typed = match data_type {
            DataType::Maintenance => TypedPayload::Maintenance(serde_json::from_value(payload.clone())?),
            DataType::Sortie => TypedPayload::Sortie(serde_json::from_value(payload.clone())?),
            DataType::Deployment => TypedPayload::Deployment(serde_json::from_value(payload.clone())?),
            DataType::Logistics => TypedPayload::Logistics(serde_json::from_value(payload.clone())?),
        };
        Ok(typed)
    }

    pub fn from_item(item: &CanonicalItem) -> Result<Self, BladeError> {
        Self::decode(item.data_type, &item.payload)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            TypedPayload::Maintenance(_) => DataType::Maintenance,
            TypedPayload::Sortie(_) => DataType::Sortie,
            TypedPayload::Deployment(_) => DataType::Deployment,
            TypedPayload::Logistics(_) => DataType::Logistics,
        }
    }
}
