//! Sync session: one run of fetch → transform → dedup → upload → status
//! update for a single data source.
//!
//! [`SyncEngine::sync`] is the only entry point. The data source row doubles
//! as the run lock: a session starts only if the store's conditional
//! `begin_sync` flips it to `running`, and always ends with `finish_sync`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use blade_catalog::{CatalogClient, DedupError, DedupGate};
use blade_core::config::SyncConfig;
use blade_core::{CanonicalItem, DataSource};
use blade_storage::{DataSourceStore, ItemStore, StoreError, SyncFinish};
use blade_warehouse::{QueryPlanner, RawRow, WarehouseClient, WarehouseError};

use crate::outcome::{FailureStage, SyncOutcome};
use crate::retry::RetryPolicy;
use crate::scheduler::{ItemResult, SchedulerConfig, UploadFailure, UploadScheduler};
use crate::transform::Transformer;

/// Reasons a sync never started, or could not record its end.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("data source not found: {0}")]
    SourceNotFound(Uuid),

    #[error("data source '{0}' has sync disabled")]
    SourceDisabled(String),

    #[error("data source '{0}' is already syncing")]
    AlreadyRunning(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct SyncEngine {
    sources: Arc<dyn DataSourceStore>,
    items: Option<Arc<dyn ItemStore>>,
    warehouse: Arc<dyn WarehouseClient>,
    catalog: Arc<dyn CatalogClient>,
    planner: QueryPlanner,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        sources: Arc<dyn DataSourceStore>,
        warehouse: Arc<dyn WarehouseClient>,
        catalog: Arc<dyn CatalogClient>,
    ) -> Self {
        Self {
            planner: QueryPlanner::from_config(&config),
            sources,
            items: None,
            warehouse,
            catalog,
            config,
        }
    }

    /// Record uploaded items locally after each run.
    pub fn with_item_store(mut self, items: Arc<dyn ItemStore>) -> Self {
        self.items = Some(items);
        self
    }

    pub fn with_planner(mut self, planner: QueryPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    pub async fn sync(&self, data_source_id: Uuid) -> Result<SyncOutcome, SyncError> {
        self.sync_with_cancel(data_source_id, CancellationToken::new())
            .await
    }

    /// Run one session. Cancelling `cancel` stops new uploads; in-flight ones
    /// finish and the run ends as `partial` or `failed`.
    pub async fn sync_with_cancel(
        &self,
        data_source_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let source = self.acquire(data_source_id).await?;
        let job_id = Uuid::new_v4();

        info!(
            source = %source.type_name,
            source_id = %source.id,
            job_id = %job_id,
            data_type = %source.data_type,
            "sync started"
        );

        let token = cancel.child_token();
        let watchdog = spawn_watchdog(token.clone(), self.config.processing_timeout(), job_id);

        let mut outcome = self.execute(&source, job_id, &token).await;
        watchdog.abort();
        outcome.finish();

        let finish = SyncFinish {
            status: outcome.status,
            finished_at: outcome.finished_at,
            items_added: outcome.counts.uploaded as u64,
            error_message: outcome.error_message(),
        };
        // The source stays `running` until this lands, so transient store
        // errors are retried before giving up.
        let recorded = RetryPolicy::from_config(&self.config)
            .run(|_| self.sources.finish_sync(source.id, &finish))
            .await;
        if let Err(e) = recorded.result {
            error!(
                source = %source.type_name,
                job_id = %job_id,
                attempts = recorded.attempts,
                error = %e,
                "failed to record sync result"
            );
            return Err(e.into());
        }

        info!(
            source = %source.type_name,
            job_id = %job_id,
            status = %outcome.status,
            fetched = outcome.counts.fetched,
            transformed = outcome.counts.transformed,
            skipped = outcome.counts.skipped_duplicate,
            uploaded = outcome.counts.uploaded,
            failed = outcome.counts.failed,
            not_submitted = outcome.counts.not_submitted,
            retries = outcome.retries,
            duration_ms = outcome.duration_ms(),
            "sync finished"
        );
        Ok(outcome)
    }

    /// Guard checks followed by the conditional flip to `running`.
    async fn acquire(&self, id: Uuid) -> Result<DataSource, SyncError> {
        let source = self
            .sources
            .get(id)
            .await?
            .ok_or(SyncError::SourceNotFound(id))?;
        if !source.enabled || !source.sync_enabled {
            return Err(SyncError::SourceDisabled(source.type_name));
        }
        if source.is_running() {
            return Err(SyncError::AlreadyRunning(source.type_name));
        }
        if !self.sources.begin_sync(id).await? {
            return Err(SyncError::AlreadyRunning(source.type_name));
        }
        Ok(source)
    }

    async fn execute(&self, source: &DataSource, job_id: Uuid, token: &CancellationToken) -> SyncOutcome {
        let mut outcome = SyncOutcome::begin(source.id, job_id);

        let rows = match self.fetch(source, token).await {
            Ok(rows) => rows,
            Err(reason) => {
                warn!(source = %source.type_name, job_id = %job_id, error = %reason, "fetch failed");
                outcome.cancelled = token.is_cancelled();
                outcome.fetch_error = Some(reason);
                return outcome;
            }
        };
        outcome.counts.fetched = rows.len();

        let candidates = self.transform_rows(source, job_id, &rows, &mut outcome);
        let to_upload = self.dedup(candidates, token, &mut outcome).await;

        let scheduler = UploadScheduler::new(
            self.catalog.clone(),
            SchedulerConfig::from_sync(&self.config),
        );
        let report = scheduler
            .run_batch(to_upload.iter().map(|(_, item)| item.clone()).collect(), token)
            .await;

        outcome.retries = report.retries();
        for ((row_index, _), item_outcome) in to_upload.iter().zip(&report.outcomes) {
            let item_id = Some(item_outcome.item.item_id.clone());
            match &item_outcome.result {
                ItemResult::Uploaded { .. } => outcome.counts.uploaded += 1,
                ItemResult::SkippedDuplicate => outcome.counts.skipped_duplicate += 1,
                ItemResult::NotSubmitted => outcome.counts.not_submitted += 1,
                ItemResult::Failed(failure) => {
                    let stage = match failure {
                        UploadFailure::Validation(_) => FailureStage::Validation,
                        _ => FailureStage::Upload,
                    };
                    outcome.record_failure(stage, item_id, *row_index, failure.to_string());
                }
            }
        }
        outcome.cancelled = outcome.cancelled || report.cancelled || token.is_cancelled();

        let uploaded: Vec<CanonicalItem> = report.uploaded_items().cloned().collect();
        self.record_items(&uploaded, job_id).await;

        outcome
    }

    async fn fetch(&self, source: &DataSource, token: &CancellationToken) -> Result<Vec<RawRow>, String> {
        let params = source.sync_parameters().map_err(|e| e.to_string())?;
        let statement = self
            .planner
            .build_query_for_source(source, &params.filter, params.limit)
            .map_err(|e| format!("query planning failed: {e}"))?;
        debug!(source = %source.type_name, sql = %statement.sql, "fetching rows");

        let timeout = self.config.query_timeout();
        let query = async {
            match tokio::time::timeout(timeout, self.warehouse.query(&statement, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(WarehouseError::Timeout(timeout)),
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err("sync cancelled during fetch".to_string()),
            result = query => result
                .map(|r| r.into_rows())
                .map_err(|e| e.to_string()),
        }
    }

    /// Transform rows in order, dropping repeats of an id already seen in this run.
    fn transform_rows(
        &self,
        source: &DataSource,
        job_id: Uuid,
        rows: &[RawRow],
        outcome: &mut SyncOutcome,
    ) -> Vec<(usize, CanonicalItem)> {
        let transformer = Transformer::from_config(&self.config);
        let mut seen = HashSet::with_capacity(rows.len());
        let mut items = Vec::with_capacity(rows.len());

        for (row_index, row) in rows.iter().enumerate() {
            match transformer.transform(source.data_type, row) {
                Ok(item) => {
                    outcome.counts.transformed += 1;
                    if !seen.insert(item.item_id.clone()) {
                        debug!(item_id = %item.item_id, "repeated item id in fetch, skipping");
                        outcome.counts.skipped_duplicate += 1;
                        continue;
                    }
                    items.push((row_index, item.with_tracking(source.id, job_id)));
                }
                Err(e) => {
                    warn!(source = %source.type_name, row = row_index, error = %e, "row transform failed");
                    outcome.record_failure(FailureStage::Transform, None, row_index, e.to_string());
                }
            }
        }
        items
    }

    async fn dedup(
        &self,
        candidates: Vec<(usize, CanonicalItem)>,
        token: &CancellationToken,
        outcome: &mut SyncOutcome,
    ) -> Vec<(usize, CanonicalItem)> {
        if !self.config.skip_duplicates {
            return candidates;
        }
        let gate = DedupGate::new(self.catalog.clone()).with_timeout(self.config.upload_timeout());
        let mut kept = Vec::with_capacity(candidates.len());
        let mut pending = candidates.into_iter();

        while let Some((row_index, item)) = pending.next() {
            let checked = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                checked = gate.should_upload(item.data_type, &item.item_id) => Some(checked),
            };
            let Some(checked) = checked else {
                outcome.cancelled = true;
                outcome.counts.not_submitted += 1 + pending.len();
                break;
            };
            match checked {
                Ok(true) => kept.push((row_index, item)),
                Ok(false) => {
                    debug!(item_id = %item.item_id, "already in catalog, skipping");
                    outcome.counts.skipped_duplicate += 1;
                }
                Err(e @ DedupError::Ambiguous { .. }) => {
                    outcome.record_failure(
                        FailureStage::Dedup,
                        Some(item.item_id.clone()),
                        row_index,
                        e.to_string(),
                    );
                }
            }
        }
        kept
    }

    /// Hand uploaded items to the item store. Failures are logged only.
    async fn record_items(&self, uploaded: &[CanonicalItem], job_id: Uuid) {
        let Some(store) = &self.items else {
            return;
        };
        for chunk in uploaded.chunks(self.config.batch_size.max(1)) {
            if let Err(e) = store.insert_items(chunk).await {
                warn!(job_id = %job_id, items = chunk.len(), error = %e, "failed to record uploaded items");
            }
        }
    }
}

/// Cancel `token` once `timeout` has elapsed.
fn spawn_watchdog(token: CancellationToken, timeout: Duration, job_id: Uuid) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                warn!(job_id = %job_id, timeout_secs = timeout.as_secs(), "processing timeout reached, cancelling sync");
                token.cancel();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blade_catalog::MemoryCatalog;
    use blade_core::{DataType, SyncStatus};
    use blade_storage::MemoryStore;
    use blade_warehouse::{QueryResult, Statement};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticWarehouse {
        rows: Vec<RawRow>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WarehouseClient for StaticWarehouse {
        async fn query(&self, _: &Statement, _: Duration) -> Result<QueryResult, WarehouseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut result = QueryResult::default();
            if let Some(first) = self.rows.first() {
                result.columns = first
                    .iter()
                    .map(|(name, v)| blade_warehouse::Column::new(name.clone(), v.type_name.clone()))
                    .collect();
            }
            result.rows = self
                .rows
                .iter()
                .map(|r| r.iter().map(|(_, v)| v.text.clone()).collect())
                .collect();
            Ok(result)
        }
    }

    fn row(id: &str) -> RawRow {
        RawRow::new()
            .with("item_id", "STRING", Some(id))
            .with("unit", "STRING", Some("1st SOW"))
    }

    fn engine(rows: Vec<RawRow>) -> (SyncEngine, Arc<MemoryStore>, Arc<MemoryCatalog>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let source = DataSource::new("blade_deployment", DataType::Deployment);
        let id = source.id;
        store.seed(source);
        let catalog = Arc::new(MemoryCatalog::new());
        let warehouse = Arc::new(StaticWarehouse {
            rows,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let mut config = SyncConfig::default();
        config.retry_delay_ms = 0;
        config.rate_limit_per_second = 0;
        let engine = SyncEngine::new(config, store.clone(), warehouse, catalog.clone());
        (engine, store, catalog, id)
    }

    #[tokio::test]
    async fn repeated_ids_in_one_fetch_upload_once() {
        let (engine, store, catalog, id) = engine(vec![row("D-1"), row("D-2"), row("D-1")]);
        let outcome = engine.sync(id).await.unwrap();

        assert_eq!(outcome.counts.fetched, 3);
        assert_eq!(outcome.counts.transformed, 3);
        assert_eq!(outcome.counts.skipped_duplicate, 1);
        assert_eq!(outcome.counts.uploaded, 2);
        assert_eq!(outcome.status, SyncStatus::Success);
        assert_eq!(catalog.upload_calls(), 2);

        let src = store.get(id).await.unwrap().unwrap();
        assert_eq!(src.item_count, 2);
        assert_eq!(src.last_sync_status, Some(SyncStatus::Success));
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let (engine, store, _, _) = engine(vec![]);
        let err = engine.sync(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SyncError::SourceNotFound(_)));
        assert_eq!(store.mutations(), 0);
    }

    #[tokio::test]
    async fn disabled_source_is_rejected() {
        let (engine, store, _, _) = engine(vec![]);
        let mut source = DataSource::new("blade_off", DataType::Sortie);
        source.sync_enabled = false;
        let id = source.id;
        store.seed(source);

        let err = engine.sync(id).await.unwrap_err();
        assert!(matches!(err, SyncError::SourceDisabled(name) if name == "blade_off"));
        assert_eq!(store.begin_sync_calls(), 0);
    }

    #[tokio::test]
    async fn items_are_tracked_and_recorded() {
        let (engine, _, catalog, id) = engine(vec![row("D-9")]);
        let items = Arc::new(MemoryStore::new());
        let engine = engine.with_item_store(items.clone());

        let outcome = engine.sync(id).await.unwrap();

        let stored = items.get_item(DataType::Deployment, "D-9").await.unwrap().unwrap();
        assert_eq!(stored.ingestion_job_id, Some(outcome.ingestion_job_id));
        assert_eq!(stored.data_source_id, Some(id));
        assert!(stored.catalog_id.is_some());
        assert!(catalog.get(DataType::Deployment, "D-9").is_some());
    }
}
