//! Pre-upload duplicate check.
//!
//! The check is advisory: a concurrent writer can still slip in between the
//! check and the upload. The catalog's idempotent write on
//! `(data_type, item_id)` is what keeps the catalog consistent.

use std::sync::Arc;
use std::time::Duration;

use blade_core::DataType;

use crate::client::{CatalogClient, CatalogError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DedupError {
    /// Existence could not be determined; the item must not be uploaded.
    #[error("could not determine whether {data_type}/{item_id} exists: {source}")]
    Ambiguous {
        data_type: DataType,
        item_id: String,
        #[source]
        source: CatalogError,
    },
}

#[derive(Clone)]
pub struct DedupGate {
    catalog: Arc<dyn CatalogClient>,
    timeout: Option<Duration>,
}

impl DedupGate {
    pub fn new(catalog: Arc<dyn CatalogClient>) -> Self {
        Self {
            catalog,
            timeout: None,
        }
    }

    /// Bound each lookup; an elapsed lookup counts as [`CatalogError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `Ok(true)` when the item should be uploaded, `Ok(false)` when the
    /// catalog already has it. Errors fail closed.
    pub async fn should_upload(&self, data_type: DataType, item_id: &str) -> Result<bool, DedupError> {
        let lookup = self.catalog.exists(data_type, item_id);
        let checked = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, lookup)
                .await
                .unwrap_or(Err(CatalogError::Timeout)),
            None => lookup.await,
        };
        match checked {
            Ok(exists) => Ok(!exists),
            Err(source) => {
                tracing::warn!(
                    data_type = %data_type,
                    item_id = %item_id,
                    error = %source,
                    "dedup check failed, withholding item"
                );
                Err(DedupError::Ambiguous {
                    data_type,
                    item_id: item_id.to_string(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCatalog;

    #[tokio::test]
    async fn missing_item_passes_existing_item_is_held() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.seed(DataType::Maintenance, "MX-1");
        let gate = DedupGate::new(catalog.clone());

        assert!(!gate.should_upload(DataType::Maintenance, "MX-1").await.unwrap());
        assert!(gate.should_upload(DataType::Maintenance, "MX-2").await.unwrap());
        // Same id under another type is a different item.
        assert!(gate.should_upload(DataType::Sortie, "MX-1").await.unwrap());
        assert_eq!(catalog.exists_calls(), 3);
    }

    #[tokio::test]
    async fn lookup_failure_fails_closed() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.fail_exists_with(CatalogError::Timeout);
        let gate = DedupGate::new(catalog);

        let err = gate
            .should_upload(DataType::Logistics, "LG-1")
            .await
            .unwrap_err();
        let DedupError::Ambiguous { item_id, source, .. } = err;
        assert_eq!(item_id, "LG-1");
        assert_eq!(source, CatalogError::Timeout);
    }

    struct StalledCatalog;

    #[async_trait::async_trait]
    impl CatalogClient for StalledCatalog {
        async fn exists(&self, _: DataType, _: &str) -> Result<bool, CatalogError> {
            std::future::pending().await
        }

        async fn upload(&self, _: &blade_core::CanonicalItem) -> Result<crate::client::UploadOutcome, CatalogError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_lookup_times_out_as_ambiguous() {
        let gate = DedupGate::new(Arc::new(StalledCatalog)).with_timeout(Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        let err = gate
            .should_upload(DataType::Sortie, "S-1")
            .await
            .unwrap_err();
        let DedupError::Ambiguous { source, .. } = err;
        assert_eq!(source, CatalogError::Timeout);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }
}
