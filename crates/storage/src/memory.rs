//! In-process store used by tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use blade_core::{CanonicalItem, DataSource, DataType, SyncStatus};

use crate::error::{Result, StoreError};
use crate::traits::{DataSourceStore, ItemStore, NewDataSource, SyncFinish};

/// Mutex-guarded maps with the same conditional-update semantics as
/// [`crate::PgStore`].
#[derive(Default)]
pub struct MemoryStore {
    sources: Mutex<HashMap<Uuid, DataSource>>,
    items: Mutex<HashMap<(DataType, String), CanonicalItem>>,
    begin_calls: AtomicUsize,
    finish_calls: AtomicUsize,
    mutations: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `source` as-is. Does not count as a mutation.
    pub fn seed(&self, source: DataSource) {
        self.lock_sources().insert(source.id, source);
    }

    /// Number of `begin_sync` calls, successful or not.
    pub fn begin_sync_calls(&self) -> usize {
        self.begin_calls.load(Ordering::SeqCst)
    }

    pub fn finish_sync_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }

    /// Number of writes that changed stored state.
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn item_count(&self) -> usize {
        self.lock_items().len()
    }

    fn lock_sources(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, DataSource>> {
        self.sources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, HashMap<(DataType, String), CanonicalItem>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DataSourceStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<DataSource>> {
        Ok(self.lock_sources().get(&id).cloned())
    }

    async fn get_by_type_name(&self, type_name: &str) -> Result<Option<DataSource>> {
        Ok(self
            .lock_sources()
            .values()
            .find(|s| s.type_name == type_name)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<DataSource>> {
        let mut all: Vec<DataSource> = self.lock_sources().values().cloned().collect();
        all.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        Ok(all)
    }

    async fn create(&self, req: NewDataSource) -> Result<DataSource> {
        let mut sources = self.lock_sources();
        if sources.values().any(|s| s.type_name == req.type_name) {
            return Err(StoreError::DuplicateName(req.type_name));
        }
        let mut source = DataSource::new(req.type_name, req.data_type);
        if let Some(name) = req.display_name {
            source.display_name = name;
        }
        source.enabled = req.enabled;
        source.sync_enabled = req.sync_enabled;
        source.schedule = req.schedule;
        if !req.parameters.is_null() {
            source.parameters = req.parameters;
        }
        source.catalog_name = req.catalog_name;
        source.schema_name = req.schema_name;
        source.table_name = req.table_name;
        sources.insert(source.id, source.clone());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(source)
    }

    async fn begin_sync(&self, id: Uuid) -> Result<bool> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);
        let mut sources = self.lock_sources();
        match sources.get_mut(&id) {
            Some(source) if !source.is_running() => {
                source.last_sync_status = Some(SyncStatus::Running);
                source.updated_at = Utc::now();
                self.mutations.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_sync(&self, id: Uuid, finish: &SyncFinish) -> Result<()> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        let mut sources = self.lock_sources();
        let source = sources.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        source.last_sync_status = Some(finish.status);
        source.last_sync_time = Some(finish.finished_at);
        source.item_count += finish.items_added as i64;
        source.last_error_message = finish.error_message.clone();
        source.updated_at = Utc::now();
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert_items(&self, items: &[CanonicalItem]) -> Result<u64> {
        let mut stored = self.lock_items();
        for item in items {
            let key = (item.data_type, item.item_id.clone());
            let mut next = item.clone();
            if next.catalog_id.is_none() {
                next.catalog_id = stored.get(&key).and_then(|prev| prev.catalog_id.clone());
            }
            stored.insert(key, next);
        }
        if !items.is_empty() {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(items.len() as u64)
    }

    async fn get_item(&self, data_type: DataType, item_id: &str) -> Result<Option<CanonicalItem>> {
        Ok(self
            .lock_items()
            .get(&(data_type, item_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blade_core::{ClassificationMarking, ItemMetadata};

    fn item(id: &str, catalog_id: Option<&str>) -> CanonicalItem {
        CanonicalItem {
            item_id: id.into(),
            data_type: DataType::Logistics,
            payload: serde_json::json!({"item_id": id}),
            classification: ClassificationMarking::Unclassified,
            last_modified: Utc::now(),
            metadata: ItemMetadata::new(),
            data_source_id: None,
            ingestion_job_id: None,
            catalog_id: catalog_id.map(String::from),
            uploaded_at: None,
        }
    }

    #[tokio::test]
    async fn begin_sync_is_exclusive() {
        let store = MemoryStore::new();
        let source = DataSource::new("blade_sortie", DataType::Sortie);
        let id = source.id;
        store.seed(source);

        assert!(store.begin_sync(id).await.unwrap());
        assert!(!store.begin_sync(id).await.unwrap());
        assert_eq!(store.begin_sync_calls(), 2);
        assert_eq!(store.mutations(), 1);
    }

    #[tokio::test]
    async fn begin_sync_unknown_source_is_false() {
        let store = MemoryStore::new();
        assert!(!store.begin_sync(Uuid::new_v4()).await.unwrap());
        assert_eq!(store.mutations(), 0);
    }

    #[tokio::test]
    async fn finish_sync_accumulates_item_count() {
        let store = MemoryStore::new();
        let source = DataSource::new("blade_logistics", DataType::Logistics);
        let id = source.id;
        store.seed(source);

        for (added, status, err) in [
            (3, SyncStatus::Partial, Some("1 item failed".to_string())),
            (2, SyncStatus::Success, None),
        ] {
            assert!(store.begin_sync(id).await.unwrap());
            store
                .finish_sync(
                    id,
                    &SyncFinish {
                        status,
                        finished_at: Utc::now(),
                        items_added: added,
                        error_message: err,
                    },
                )
                .await
                .unwrap();
        }

        let src = store.get(id).await.unwrap().unwrap();
        assert_eq!(src.item_count, 5);
        assert_eq!(src.last_sync_status, Some(SyncStatus::Success));
        assert!(src.last_error_message.is_none());
        assert!(src.last_sync_time.is_some());
    }

    #[tokio::test]
    async fn finish_sync_unknown_source_errors() {
        let store = MemoryStore::new();
        let finish = SyncFinish {
            status: SyncStatus::Failed,
            finished_at: Utc::now(),
            items_added: 0,
            error_message: None,
        };
        let err = store.finish_sync(Uuid::new_v4(), &finish).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_type_name() {
        let store = MemoryStore::new();
        let created = store
            .create(NewDataSource::new("blade_deployment", DataType::Deployment))
            .await
            .unwrap();
        assert_eq!(created.display_name, "blade_deployment");

        let err = store
            .create(NewDataSource::new("blade_deployment", DataType::Deployment))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(_)));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn insert_items_upserts_and_keeps_catalog_id() {
        let store = MemoryStore::new();
        store.insert_items(&[item("LG-1", Some("c-9"))]).await.unwrap();
        store.insert_items(&[item("LG-1", None), item("LG-2", None)]).await.unwrap();

        assert_eq!(store.item_count(), 2);
        let kept = store.get_item(DataType::Logistics, "LG-1").await.unwrap().unwrap();
        assert_eq!(kept.catalog_id.as_deref(), Some("c-9"));
        assert!(store.get_item(DataType::Sortie, "LG-1").await.unwrap().is_none());
    }
}
