//! PostgreSQL-backed stores for `data_sources` and `blade_items`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use blade_core::config::PostgresConfig;
use blade_core::{CanonicalItem, DataSource, DataType, ItemMetadata, SyncStatus};

use crate::error::{Result, StoreError};
use crate::traits::{DataSourceStore, ItemStore, NewDataSource, SyncFinish};

const SOURCE_COLUMNS: &str = "id, type_name, display_name, data_type, enabled, sync_enabled, \
     schedule, parameters, last_sync_time, last_sync_status, item_count, last_error_message, \
     catalog_name, schema_name, table_name, created_at, updated_at";

const ITEM_COLUMNS: &str = "item_id, data_type, payload, classification_marking, last_modified, \
     metadata, data_source_id, ingestion_job_id, catalog_id, uploaded_at";

// ── Rows ─────────────────────────────────────────────────────────────

/// Row from the `data_sources` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DataSourceRow {
    pub id: Uuid,
    pub type_name: String,
    pub display_name: String,
    pub data_type: String,
    pub enabled: bool,
    pub sync_enabled: bool,
    pub schedule: Option<String>,
    pub parameters: serde_json::Value,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_status: Option<String>,
    pub item_count: i64,
    pub last_error_message: Option<String>,
    pub catalog_name: Option<String>,
    pub schema_name: Option<String>,
    pub table_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DataSourceRow> for DataSource {
    type Error = StoreError;

    fn try_from(row: DataSourceRow) -> Result<Self> {
        let data_type = row
            .data_type
            .parse::<DataType>()
            .map_err(|e| StoreError::Decode(format!("data_sources.{}: {e}", row.id)))?;
        let last_sync_status = row
            .last_sync_status
            .as_deref()
            .map(str::parse::<SyncStatus>)
            .transpose()
            .map_err(|e| StoreError::Decode(format!("data_sources.{}: {e}", row.id)))?;
        Ok(DataSource {
            id: row.id,
            type_name: row.type_name,
            display_name: row.display_name,
            data_type,
            enabled: row.enabled,
            sync_enabled: row.sync_enabled,
            schedule: row.schedule,
            parameters: row.parameters,
            last_sync_time: row.last_sync_time,
            last_sync_status,
            item_count: row.item_count,
            last_error_message: row.last_error_message,
            catalog_name: row.catalog_name,
            schema_name: row.schema_name,
            table_name: row.table_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row from the `blade_items` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BladeItemRow {
    pub item_id: String,
    pub data_type: String,
    pub payload: serde_json::Value,
    pub classification_marking: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub data_source_id: Option<Uuid>,
    pub ingestion_job_id: Option<Uuid>,
    pub catalog_id: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl TryFrom<BladeItemRow> for CanonicalItem {
    type Error = StoreError;

    fn try_from(row: BladeItemRow) -> Result<Self> {
        let decode = |e: String| StoreError::Decode(format!("blade_items.{}: {e}", row.item_id));
        let data_type = row.data_type.parse::<DataType>().map_err(|e| decode(e.to_string()))?;
        let classification = row
            .classification_marking
            .parse()
            .map_err(|e: blade_core::BladeError| decode(e.to_string()))?;
        let metadata: ItemMetadata =
            serde_json::from_value(row.metadata.clone()).map_err(|e| decode(e.to_string()))?;
        Ok(CanonicalItem {
            item_id: row.item_id.clone(),
            data_type,
            payload: row.payload,
            classification,
            last_modified: row.last_modified,
            metadata,
            data_source_id: row.data_source_id,
            ingestion_job_id: row.ingestion_job_id,
            catalog_id: row.catalog_id,
            uploaded_at: row.uploaded_at,
        })
    }
}

// ── Store ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `config` and apply pending migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!(host = %config.host, database = %config.database, "PostgreSQL connected");

        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("database migrations applied");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DataSourceStore for PgStore {
    async fn get(&self, id: Uuid) -> Result<Option<DataSource>> {
        let row = sqlx::query_as::<_, DataSourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM data_sources WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DataSource::try_from).transpose()
    }

    async fn get_by_type_name(&self, type_name: &str) -> Result<Option<DataSource>> {
        let row = sqlx::query_as::<_, DataSourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM data_sources WHERE type_name = $1"
        ))
        .bind(type_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DataSource::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<DataSource>> {
        let rows = sqlx::query_as::<_, DataSourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM data_sources ORDER BY type_name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DataSource::try_from).collect()
    }

    async fn create(&self, req: NewDataSource) -> Result<DataSource> {
        let display_name = req.display_name.clone().unwrap_or_else(|| req.type_name.clone());
        let parameters = if req.parameters.is_null() {
            serde_json::json!({})
        } else {
            req.parameters.clone()
        };

        let result = sqlx::query_as::<_, DataSourceRow>(&format!(
            "INSERT INTO data_sources
                (type_name, display_name, data_type, enabled, sync_enabled, schedule,
                 parameters, catalog_name, schema_name, table_name)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {SOURCE_COLUMNS}"
        ))
        .bind(&req.type_name)
        .bind(&display_name)
        .bind(req.data_type.as_str())
        .bind(req.enabled)
        .bind(req.sync_enabled)
        .bind(&req.schedule)
        .bind(&parameters)
        .bind(&req.catalog_name)
        .bind(&req.schema_name)
        .bind(&req.table_name)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => DataSource::try_from(row),
            Err(e) => Err(map_unique_violation(e, &req.type_name)),
        }
    }

    async fn begin_sync(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE data_sources
             SET last_sync_status = 'running', updated_at = now()
             WHERE id = $1 AND last_sync_status IS DISTINCT FROM 'running'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish_sync(&self, id: Uuid, finish: &SyncFinish) -> Result<()> {
        let result = sqlx::query(
            "UPDATE data_sources SET
                last_sync_status = $2,
                last_sync_time = $3,
                item_count = item_count + $4,
                last_error_message = $5,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(finish.status.as_str())
        .bind(finish.finished_at)
        .bind(finish.items_added as i64)
        .bind(&finish.error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl ItemStore for PgStore {
    async fn insert_items(&self, items: &[CanonicalItem]) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for item in items {
            let metadata = serde_json::to_value(&item.metadata)
                .map_err(|e| StoreError::Other(format!("metadata for {}: {e}", item.item_id)))?;
            let result = sqlx::query(
                "INSERT INTO blade_items
                    (item_id, data_type, payload, classification_marking, last_modified,
                     metadata, data_source_id, ingestion_job_id, catalog_id, uploaded_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (data_type, item_id) DO UPDATE SET
                    payload = EXCLUDED.payload,
                    classification_marking = EXCLUDED.classification_marking,
                    last_modified = EXCLUDED.last_modified,
                    metadata = EXCLUDED.metadata,
                    data_source_id = EXCLUDED.data_source_id,
                    ingestion_job_id = EXCLUDED.ingestion_job_id,
                    catalog_id = COALESCE(EXCLUDED.catalog_id, blade_items.catalog_id),
                    uploaded_at = EXCLUDED.uploaded_at,
                    updated_at = now()",
            )
            .bind(&item.item_id)
            .bind(item.data_type.as_str())
            .bind(&item.payload)
            .bind(item.classification.as_str())
            .bind(item.last_modified)
            .bind(&metadata)
            .bind(item.data_source_id)
            .bind(item.ingestion_job_id)
            .bind(&item.catalog_id)
            .bind(item.uploaded_at)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn get_item(&self, data_type: DataType, item_id: &str) -> Result<Option<CanonicalItem>> {
        let row = sqlx::query_as::<_, BladeItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM blade_items WHERE data_type = $1 AND item_id = $2"
        ))
        .bind(data_type.as_str())
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CanonicalItem::try_from).transpose()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Map a PostgreSQL unique violation (23505) to `DuplicateName`.
fn map_unique_violation(e: sqlx::Error, type_name: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::DuplicateName(type_name.to_string());
        }
    }
    error!("data source store database error: {}", e);
    StoreError::Database(e)
}

// ── Tests ────────────────────────────────────────────────────────────
