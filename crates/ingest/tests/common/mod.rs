//! Scripted collaborators for session tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use blade_catalog::{CatalogClient, CatalogError, UploadOutcome};
use blade_core::config::SyncConfig;
use blade_core::{CanonicalItem, DataSource, DataType};
use blade_ingest::SyncEngine;
use blade_storage::{DataSourceStore, MemoryStore, NewDataSource, StoreError, SyncFinish};
use blade_warehouse::{Column, QueryResult, Statement, WarehouseClient, WarehouseError};

// ── Warehouse ────────────────────────────────────────────────────────

pub struct FeedWarehouse {
    result: Result<QueryResult, WarehouseError>,
    pub calls: Arc<AtomicUsize>,
    pub statements: Mutex<Vec<Statement>>,
}

impl FeedWarehouse {
    pub fn rows(result: QueryResult) -> Self {
        Self {
            result: Ok(result),
            calls: Arc::new(AtomicUsize::new(0)),
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: WarehouseError) -> Self {
        Self {
            result: Err(error),
            calls: Arc::new(AtomicUsize::new(0)),
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WarehouseClient for FeedWarehouse {
    async fn query(&self, statement: &Statement, _timeout: Duration) -> Result<QueryResult, WarehouseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.statements.lock().unwrap().push(statement.clone());
        self.result.clone()
    }
}

/// Result set with the given `(name, type)` columns.
pub fn result_set(columns: &[(&str, &str)], rows: Vec<Vec<Option<&str>>>) -> QueryResult {
    QueryResult {
        statement_id: Some("stmt-1".into()),
        columns: columns.iter().map(|(n, t)| Column::new(*n, *t)).collect(),
        rows: rows
            .into_iter()
            .map(|r| r.into_iter().map(|c| c.map(str::to_string)).collect())
            .collect(),
    }
}

/// `n` simple rows with ids `<prefix>-1..=n`.
pub fn numbered_rows(prefix: &str, n: usize) -> QueryResult {
    let ids: Vec<String> = (1..=n).map(|i| format!("{prefix}-{i}")).collect();
    result_set(
        &[("item_id", "STRING"), ("quantity", "INT")],
        ids.iter().map(|id| vec![Some(id.as_str()), Some("1")]).collect(),
    )
}

// ── Catalog ──────────────────────────────────────────────────────────

/// Catalog whose behaviour is scripted per item id.
#[derive(Default)]
pub struct ScriptedCatalog {
    existing: Mutex<HashSet<String>>,
    ambiguous: Mutex<HashSet<String>>,
    /// Ids whose `exists` lookup never answers.
    stalled: Mutex<HashSet<String>>,
    /// Item id → remaining failures before an upload succeeds.
    flaky: Mutex<HashMap<String, u32>>,
    /// Uploads answered with `Duplicate` despite a negative `exists`.
    racing: Mutex<HashSet<String>>,
    stored: Mutex<HashSet<String>>,
    upload_delay: Mutex<Option<Duration>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    pub exists_calls: Arc<AtomicUsize>,
    pub upload_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    pub high_water: Arc<AtomicUsize>,
    pub started: Mutex<Vec<Instant>>,
}

impl ScriptedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(self, id: &str) -> Self {
        self.existing.lock().unwrap().insert(id.into());
        self
    }

    pub fn with_ambiguous(self, id: &str) -> Self {
        self.ambiguous.lock().unwrap().insert(id.into());
        self
    }

    pub fn with_stalled_lookup(self, id: &str) -> Self {
        self.stalled.lock().unwrap().insert(id.into());
        self
    }

    pub fn with_failures(self, id: &str, times: u32) -> Self {
        self.flaky.lock().unwrap().insert(id.into(), times);
        self
    }

    pub fn with_race(self, id: &str) -> Self {
        self.racing.lock().unwrap().insert(id.into());
        self
    }

    pub fn with_upload_delay(self, delay: Duration) -> Self {
        *self.upload_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Cancel `token` once `n` uploads have started.
    pub fn cancel_after(self, n: usize, token: CancellationToken) -> Self {
        *self.cancel_after.lock().unwrap() = Some((n, token));
        self
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> usize {
        self.stored.lock().unwrap().len()
    }
}

#[async_trait]
impl CatalogClient for ScriptedCatalog {
    async fn exists(&self, _data_type: DataType, item_id: &str) -> Result<bool, CatalogError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.ambiguous.lock().unwrap().contains(item_id) {
            return Err(CatalogError::Unavailable("HTTP 502: bad gateway".into()));
        }
        let stalled = self.stalled.lock().unwrap().contains(item_id);
        if stalled {
            std::future::pending::<()>().await;
        }
        let known = self.existing.lock().unwrap().contains(item_id)
            || self.stored.lock().unwrap().contains(item_id);
        Ok(known)
    }

    async fn upload(&self, item: &CanonicalItem) -> Result<UploadOutcome, CatalogError> {
        let call = self.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.lock().unwrap().push(Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);

        if let Some((n, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if call >= *n {
                token.cancel();
            }
        }

        let delay = *self.upload_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(left) = flaky.get_mut(&item.item_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(CatalogError::Unavailable("HTTP 503: overloaded".into()));
                }
            }
        }

        if self.racing.lock().unwrap().contains(&item.item_id) {
            return Ok(UploadOutcome::Duplicate);
        }
        let created = self.stored.lock().unwrap().insert(item.item_id.clone());
        if created {
            Ok(UploadOutcome::Created {
                catalog_id: Some(format!("cat-{}", item.item_id)),
            })
        } else {
            Ok(UploadOutcome::Duplicate)
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────

/// Source store whose first `fails` `finish_sync` calls are lost.
pub struct DroppingStore {
    inner: Arc<MemoryStore>,
    fails: AtomicUsize,
    pub finish_calls: AtomicUsize,
}

impl DroppingStore {
    pub fn new(inner: Arc<MemoryStore>, fails: usize) -> Self {
        Self {
            inner,
            fails: AtomicUsize::new(fails),
            finish_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DataSourceStore for DroppingStore {
    async fn get(&self, id: uuid::Uuid) -> Result<Option<DataSource>, StoreError> {
        self.inner.get(id).await
    }

    async fn get_by_type_name(&self, type_name: &str) -> Result<Option<DataSource>, StoreError> {
        self.inner.get_by_type_name(type_name).await
    }

    async fn list(&self) -> Result<Vec<DataSource>, StoreError> {
        self.inner.list().await
    }

    async fn create(&self, req: NewDataSource) -> Result<DataSource, StoreError> {
        self.inner.create(req).await
    }

    async fn begin_sync(&self, id: uuid::Uuid) -> Result<bool, StoreError> {
        self.inner.begin_sync(id).await
    }

    async fn finish_sync(&self, id: uuid::Uuid, finish: &SyncFinish) -> Result<(), StoreError> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        let dropped = self
            .fails
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if dropped {
            return Err(StoreError::Other("connection reset".into()));
        }
        self.inner.finish_sync(id, finish).await
    }
}

// ── Wiring ───────────────────────────────────────────────────────────

/// Defaults with pacing and retry delay removed.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        rate_limit_per_second: 0,
        retry_delay_ms: 0,
        ..SyncConfig::default()
    }
}

pub struct Harness {
    pub engine: SyncEngine,
    pub store: Arc<MemoryStore>,
    pub warehouse: Arc<FeedWarehouse>,
    pub catalog: Arc<ScriptedCatalog>,
    pub source_id: uuid::Uuid,
}

pub fn harness(
    config: SyncConfig,
    source: DataSource,
    warehouse: FeedWarehouse,
    catalog: ScriptedCatalog,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let source_id = source.id;
    store.seed(source);
    let warehouse = Arc::new(warehouse);
    let catalog = Arc::new(catalog);
    let engine = SyncEngine::new(config, store.clone(), warehouse.clone(), catalog.clone())
        .with_item_store(store.clone());
    Harness {
        engine,
        store,
        warehouse,
        catalog,
        source_id,
    }
}
