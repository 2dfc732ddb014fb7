//! In-memory catalog for tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use blade_core::{CanonicalItem, DataType};

use crate::client::{CatalogClient, CatalogError, UploadOutcome};

/// Holds uploaded items keyed by `(data_type, item_id)`.
///
/// Uploads are idempotent: a second upload of the same key reports
/// [`UploadOutcome::Duplicate`] and leaves the stored item untouched.
#[derive(Default)]
pub struct MemoryCatalog {
    items: Mutex<HashMap<(DataType, String), CanonicalItem>>,
    seeded: Mutex<HashSet<(DataType, String)>>,
    exists_error: Mutex<Option<CatalogError>>,
    exists_calls: AtomicUsize,
    upload_calls: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an item as already present without storing a payload.
    pub fn seed(&self, data_type: DataType, item_id: &str) {
        if let Ok(mut seeded) = self.seeded.lock() {
            seeded.insert((data_type, item_id.to_string()));
        }
    }

    /// Make every subsequent `exists` call fail with `error`.
    pub fn fail_exists_with(&self, error: CatalogError) {
        if let Ok(mut slot) = self.exists_error.lock() {
            *slot = Some(error);
        }
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    /// Number of items stored through `upload`.
    pub fn len(&self) -> usize {
        self.items.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, data_type: DataType, item_id: &str) -> Option<CanonicalItem> {
        let items = self.items.lock().ok()?;
        items.get(&(data_type, item_id.to_string())).cloned()
    }

    fn contains(&self, key: &(DataType, String)) -> bool {
        let seeded = self.seeded.lock().map(|s| s.contains(key)).unwrap_or(false);
        seeded || self.items.lock().map(|m| m.contains_key(key)).unwrap_or(false)
    }
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn exists(&self, data_type: DataType, item_id: &str) -> Result<bool, CatalogError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.exists_error.lock().ok().and_then(|e| e.clone()) {
            return Err(err);
        }
        Ok(self.contains(&(data_type, item_id.to_string())))
    }

    async fn upload(&self, item: &CanonicalItem) -> Result<UploadOutcome, CatalogError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let key = (item.data_type, item.item_id.clone());
        let seeded = self.seeded.lock().map(|s| s.contains(&key)).unwrap_or(false);
        let mut items = self
            .items
            .lock()
            .map_err(|_| CatalogError::Unavailable("memory catalog poisoned".into()))?;
        if seeded || items.contains_key(&key) {
            return Ok(UploadOutcome::Duplicate);
        }
        let catalog_id = format!("mem-{}", items.len() + 1);
        items.insert(key, item.clone());
        Ok(UploadOutcome::Created {
            catalog_id: Some(catalog_id),
        })
    }
}
