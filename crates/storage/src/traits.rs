use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use blade_core::{CanonicalItem, DataSource, DataType, SyncStatus};

use crate::error::Result;

/// Fields accepted when registering a data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDataSource {
    pub type_name: String,
    pub display_name: Option<String>,
    pub data_type: DataType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
    pub schedule: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub catalog_name: Option<String>,
    pub schema_name: Option<String>,
    pub table_name: Option<String>,
}

fn default_true() -> bool {
    true
}

impl NewDataSource {
    pub fn new(type_name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            type_name: type_name.into(),
            display_name: None,
            data_type,
            enabled: true,
            sync_enabled: true,
            schedule: None,
            parameters: serde_json::json!({}),
            catalog_name: None,
            schema_name: None,
            table_name: None,
        }
    }
}

/// Terminal state written when a sync run ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncFinish {
    pub status: SyncStatus,
    pub finished_at: DateTime<Utc>,
    /// Added to the source's running `item_count`.
    pub items_added: u64,
    /// `None` clears any previous error.
    pub error_message: Option<String>,
}

/// Persistence for data sources and their sync statistics.
#[async_trait]
pub trait DataSourceStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<DataSource>>;

    async fn get_by_type_name(&self, type_name: &str) -> Result<Option<DataSource>>;

    /// All sources ordered by `type_name`.
    async fn list(&self) -> Result<Vec<DataSource>>;

    async fn create(&self, req: NewDataSource) -> Result<DataSource>;

    /// Atomically mark `id` as running.
    ///
    /// Returns `false` without changing anything when the source is already
    /// running (or does not exist).
    async fn begin_sync(&self, id: Uuid) -> Result<bool>;

    async fn finish_sync(&self, id: Uuid, finish: &SyncFinish) -> Result<()>;
}

/// Local record of items published to the catalog.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Upsert on `(data_type, item_id)`; returns the number of rows written.
    async fn insert_items(&self, items: &[CanonicalItem]) -> Result<u64>;

    async fn get_item(&self, data_type: DataType, item_id: &str) -> Result<Option<CanonicalItem>>;
}
