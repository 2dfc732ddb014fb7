use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use blade_catalog::{CatalogConfig, HttpCatalogClient};
use blade_core::schema::TypedPayload;
use blade_core::{CanonicalItem, Config, DataType, FilterCondition, SyncStatus};
use blade_ingest::{SyncEngine, Transformer};
use blade_storage::{DataSourceStore, PgStore};
use blade_warehouse::{fetch_item, HttpWarehouseClient, QueryPlanner, WarehouseConfig};

use crate::cli::SyncArgs;

/// Print the statement a fetch for `data_type` would run.
pub fn plan(config: &Config, data_type: &str, filters: &[FilterCondition], limit: Option<u64>) -> Result<()> {
    let data_type: DataType = data_type.parse()?;
    let statement = QueryPlanner::from_config(&config.sync)
        .build_query(data_type, filters, limit)
        .context("could not plan query")?;
    println!("{}", serde_json::to_string_pretty(&statement)?);
    Ok(())
}

/// Fetch one row by id, transform it and print the item next to its typed
/// record.
pub async fn item(config: &Config, data_type: &str, item_id: &str) -> Result<()> {
    let data_type: DataType = data_type.parse()?;
    let warehouse_config = WarehouseConfig::from_env_profiled(&config.profile);
    warehouse_config.validate().context("invalid warehouse configuration")?;
    let warehouse = HttpWarehouseClient::new(warehouse_config)?;

    let row = fetch_item(
        &warehouse,
        &QueryPlanner::from_config(&config.sync),
        data_type,
        item_id,
        config.sync.query_timeout(),
    )
    .await?;
    let item = Transformer::from_config(&config.sync).transform(data_type, &row)?;
    println!("{}", serde_json::to_string_pretty(&inspect(&item))?);
    Ok(())
}

/// `{"item": .., "record": ..}`; `record` is null when the payload does not
/// have the documented shape for its type.
fn inspect(item: &CanonicalItem) -> serde_json::Value {
    let record = match TypedPayload::from_item(item) {
        Ok(typed) => serde_json::to_value(typed).unwrap_or_default(),
        Err(e) => {
            warn!(item_id = %item.item_id, error = %e, "payload does not match the typed record");
            serde_json::Value::Null
        }
    };
    serde_json::json!({ "item": item, "record": record })
}

pub async fn sources(config: &Config) -> Result<()> {
    let store = PgStore::connect(&config.postgres)
        .await
        .context("failed to connect to PostgreSQL")?;
    let sources = store.list().await.context("failed to list data sources")?;
    println!(
        "{:<28} {:<12} {:<8} {:<6} {:<9} {:>8}  {}",
        "TYPE_NAME", "DATA_TYPE", "ENABLED", "SYNC", "STATUS", "ITEMS", "LAST_SYNC"
    );
    for s in sources {
        println!(
            "{:<28} {:<12} {:<8} {:<6} {:<9} {:>8}  {}",
            s.type_name,
            s.data_type.as_str(),
            s.enabled,
            s.sync_enabled,
            s.last_sync_status.map(|st| st.as_str()).unwrap_or("idle"),
            s.item_count,
            s.last_sync_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".into()),
        );
    }
    Ok(())
}

/// Run one session and print its outcome as JSON.
///
/// Exits non-zero when the run failed. Ctrl-C stops new uploads and lets
/// in-flight ones finish.
pub async fn sync(config: &Config, target: SyncArgs) -> Result<ExitCode> {
    let warehouse_config = WarehouseConfig::from_env_profiled(&config.profile);
    warehouse_config.validate().context("invalid warehouse configuration")?;
    let catalog_config = CatalogConfig::from_env_profiled(&config.profile);
    catalog_config.validate().context("invalid catalog configuration")?;

    let store = Arc::new(
        PgStore::connect(&config.postgres)
            .await
            .context("failed to connect to PostgreSQL")?,
    );
    let warehouse = Arc::new(HttpWarehouseClient::new(warehouse_config)?);
    let catalog = Arc::new(HttpCatalogClient::new(catalog_config)?);

    let source_id = match (target.source, target.name) {
        (Some(id), _) => id,
        (None, Some(name)) => store
            .get_by_type_name(&name)
            .await?
            .map(|s| s.id)
            .ok_or_else(|| anyhow!("no data source named '{name}'"))?,
        (None, None) => return Err(anyhow!("either --source or --name is required")),
    };

    let engine = SyncEngine::new(config.sync.clone(), store.clone(), warehouse, catalog)
        .with_item_store(store);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight uploads");
            on_signal.cancel();
        }
    });

    let outcome = engine
        .sync_with_cancel(source_id, cancel)
        .await
        .with_context(|| format!("sync of {source_id} did not run"))?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    info!(status = %outcome.status, "done");

    Ok(match outcome.status {
        SyncStatus::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}
