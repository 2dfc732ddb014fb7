use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BladeError;
use crate::item::DataType;

/// Outcome recorded on a data source by the most recent sync run.
///
/// A source that has never been synced has no status at all (`None` on
/// [`DataSource::last_sync_status`]), which is the idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Success => "success",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Running)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = BladeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SyncStatus::Running),
            "success" => Ok(SyncStatus::Success),
            "partial" => Ok(SyncStatus::Partial),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(BladeError::UnknownSyncStatus(other.to_string())),
        }
    }
}

// ── Data source ───────────────────────────────────────────────

/// A configured upstream table feeding one data type into the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: Uuid,
    pub type_name: String,
    pub display_name: String,
    pub data_type: DataType,
    pub enabled: bool,
    pub sync_enabled: bool,
    /// Cron expression; evaluated by whatever triggers syncs, never here.
    pub schedule: Option<String>,
    pub parameters: serde_json::Value,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncStatus>,
    pub item_count: i64,
    pub last_error_message: Option<String>,
    pub catalog_name: Option<String>,
    pub schema_name: Option<String>,
    pub table_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSource {
    /// A fresh, sync-enabled source with no history.
    pub fn new(type_name: impl Into<String>, data_type: DataType) -> Self {
        let type_name = type_name.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            display_name: type_name.clone(),
            type_name,
            data_type,
            enabled: true,
            sync_enabled: true,
            schedule: None,
            parameters: serde_json::Value::Object(Default::default()),
            last_sync_time: None,
            last_sync_status: None,
            item_count: 0,
            last_error_message: None,
            catalog_name: None,
            schema_name: None,
            table_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.last_sync_status == Some(SyncStatus::Running)
    }

    /// `catalog.schema.table` when both qualifiers are set, otherwise the bare table.
    ///
    /// Returns `None` when no explicit table is configured.
    pub fn full_table_name(&self) -> Option<String> {
        let table = self.table_name.as_deref().filter(|t| !t.is_empty())?;
        match (
            self.catalog_name.as_deref().filter(|c| !c.is_empty()),
            self.schema_name.as_deref().filter(|s| !s.is_empty()),
        ) {
            (Some(catalog), Some(schema)) => Some(format!("{catalog}.{schema}.{table}")),
            _ => Some(table.to_string()),
        }
    }

    /// Decode the recognised keys of `parameters`.
    pub fn sync_parameters(&self) -> Result<SourceParameters, BladeError> {
        if self.parameters.is_null() {
            return Ok(SourceParameters::default());
        }
        serde_json::from_value(self.parameters.clone()).map_err(|e| {
            BladeError::Validation(format!(
                "data source {} has invalid parameters: {e}",
                self.type_name
            ))
        })
    }
}

// ── Parameters ────────────────────────────────────────────────

/// Comparison operator of a source filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterOp {
    #[default]
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl FilterOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
        }
    }
}

/// One `column <op> value` restriction applied when fetching a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub column: String,
    #[serde(default)]
    pub op: FilterOp,
    pub value: serde_json::Value,
}

impl FilterCondition {
    pub fn eq(column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceParameters {
    #[serde(default)]
    pub filter: Vec<FilterCondition>,
    #[serde(default)]
    pub limit: Option<u64>,
}
