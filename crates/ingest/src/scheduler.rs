//! Bounded-concurrency, rate-limited catalog uploads.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blade_catalog::{CatalogClient, CatalogError, UploadOutcome};
use blade_core::config::SyncConfig;
use blade_core::CanonicalItem;

use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

/// Knobs for [`UploadScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub concurrent_uploads: usize,
    pub rate_limit_per_second: u32,
    pub retry: RetryPolicy,
    pub upload_timeout: Duration,
    pub validate_before_upload: bool,
    pub skip_duplicates: bool,
}

impl SchedulerConfig {
    pub fn from_sync(cfg: &SyncConfig) -> Self {
        Self {
            concurrent_uploads: cfg.concurrent_uploads,
            rate_limit_per_second: cfg.rate_limit_per_second,
            retry: RetryPolicy::from_config(cfg),
            upload_timeout: cfg.upload_timeout(),
            validate_before_upload: cfg.validate_before_upload,
            skip_duplicates: cfg.skip_duplicates,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_sync(&SyncConfig::default())
    }
}

/// Why an item did not make it into the catalog.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UploadFailure {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Catalog(CatalogError),

    #[error("catalog already holds this item")]
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemResult {
    Uploaded { catalog_id: Option<String> },
    /// The catalog reported the item as already present.
    SkippedDuplicate,
    Failed(UploadFailure),
    /// Never submitted because the batch was cancelled.
    NotSubmitted,
}

#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub item: CanonicalItem,
    pub result: ItemResult,
    /// Upload calls made for this item; zero when it never reached the catalog.
    pub attempts: u32,
}

impl ItemOutcome {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Per-item results of one [`UploadScheduler::run_batch`], in submission order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ItemOutcome>,
    pub cancelled: bool,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&ItemResult) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.result)).count()
    }

    pub fn uploaded(&self) -> usize {
        self.count(|r| matches!(r, ItemResult::Uploaded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, ItemResult::SkippedDuplicate))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, ItemResult::Failed(_)))
    }

    pub fn not_submitted(&self) -> usize {
        self.count(|r| matches!(r, ItemResult::NotSubmitted))
    }

    pub fn retries(&self) -> u32 {
        self.outcomes.iter().map(ItemOutcome::retries).sum()
    }

    pub fn uploaded_items(&self) -> impl Iterator<Item = &CanonicalItem> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, ItemResult::Uploaded { .. }))
            .map(|o| &o.item)
    }
}

pub struct UploadScheduler {
    catalog: Arc<dyn CatalogClient>,
    slots: Arc<Semaphore>,
    limiter: Arc<RateLimiter>,
    config: SchedulerConfig,
}

impl UploadScheduler {
    pub fn new(catalog: Arc<dyn CatalogClient>, config: SchedulerConfig) -> Self {
        Self {
            catalog,
            slots: Arc::new(Semaphore::new(config.concurrent_uploads.max(1))),
            limiter: Arc::new(RateLimiter::new(config.rate_limit_per_second)),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Upload `items`, at most `concurrent_uploads` at a time.
    ///
    /// The submitting loop waits for a free slot before starting the next
    /// item. Once `cancel` fires nothing new is submitted, uploads already in
    /// flight run to completion, and the rest come back as
    /// [`ItemResult::NotSubmitted`].
    pub async fn run_batch(&self, items: Vec<CanonicalItem>, cancel: &CancellationToken) -> BatchReport {
        let total = items.len();
        let mut slots: Vec<Option<ItemOutcome>> = vec![None; total];
        let mut in_flight = FuturesUnordered::new();
        let mut cancelled = false;

        let mut pending = items.into_iter().enumerate();
        while let Some((idx, item)) = pending.next() {
            if self.config.validate_before_upload {
                if let Err(e) = item.validate() {
                    warn!(item_id = %item.item_id, error = %e, "item failed validation");
                    slots[idx] = Some(ItemOutcome {
                        item,
                        result: ItemResult::Failed(UploadFailure::Validation(e.to_string())),
                        attempts: 0,
                    });
                    continue;
                }
            }

            // Keep draining finished uploads while waiting for a slot.
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    Some((done_idx, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                        slots[done_idx] = Some(outcome);
                    }
                    permit = self.slots.clone().acquire_owned() => break permit.ok(),
                }
            };

            let Some(permit) = permit else {
                cancelled = true;
                slots[idx] = Some(not_submitted(item));
                for (rest_idx, rest) in pending.by_ref() {
                    slots[rest_idx] = Some(not_submitted(rest));
                }
                break;
            };

            in_flight.push(self.upload_one(idx, item, permit));
        }

        while let Some((done_idx, outcome)) = in_flight.next().await {
            slots[done_idx] = Some(outcome);
        }

        let report = BatchReport {
            outcomes: slots.into_iter().flatten().collect(),
            cancelled,
        };
        info!(
            total,
            uploaded = report.uploaded(),
            skipped = report.skipped(),
            failed = report.failed(),
            not_submitted = report.not_submitted(),
            retries = report.retries(),
            "upload batch finished"
        );
        report
    }

    async fn upload_one(
        &self,
        idx: usize,
        mut item: CanonicalItem,
        _permit: OwnedSemaphorePermit,
    ) -> (usize, ItemOutcome) {
        let catalog = &self.catalog;
        let limiter = &self.limiter;
        let timeout = self.config.upload_timeout;
        let target = &item;

        let attempted = self
            .config
            .retry
            .run(move |attempt| async move {
                limiter.acquire().await;
                debug!(item_id = %target.item_id, attempt, "uploading item");
                match tokio::time::timeout(timeout, catalog.upload(target)).await {
                    Ok(result) => result,
                    Err(_) => Err(CatalogError::Timeout),
                }
            })
            .await;

        let attempts = attempted.attempts;
        let result = match attempted.result {
            Ok(UploadOutcome::Created { catalog_id }) => {
                item.mark_uploaded(catalog_id.clone(), Utc::now());
                ItemResult::Uploaded { catalog_id }
            }
            Ok(UploadOutcome::Duplicate) if self.config.skip_duplicates => {
                debug!(item_id = %item.item_id, "catalog already had item");
                ItemResult::SkippedDuplicate
            }
            Ok(UploadOutcome::Duplicate) => ItemResult::Failed(UploadFailure::Duplicate),
            Err(e) => {
                warn!(item_id = %item.item_id, attempts, error = %e, "upload failed");
                ItemResult::Failed(UploadFailure::Catalog(e))
            }
        };

        (idx, ItemOutcome { item, result, attempts })
    }
}

fn not_submitted(item: CanonicalItem) -> ItemOutcome {
    ItemOutcome {
        item,
        result: ItemResult::NotSubmitted,
        attempts: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blade_catalog::MemoryCatalog;
    use blade_core::{ClassificationMarking, DataType, ItemMetadata, META_IMPORT_TIME, META_SOURCE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn item(id: &str) -> CanonicalItem {
        let mut metadata = ItemMetadata::new();
        metadata.insert(META_SOURCE.into(), "databricks".into());
        metadata.insert(META_IMPORT_TIME.into(), "2025-06-14T10:30:00Z".into());
        CanonicalItem {
            item_id: id.into(),
            data_type: DataType::Maintenance,
            payload: serde_json::json!({"item_id": id}),
            classification: ClassificationMarking::Unclassified,
            last_modified: Utc::now(),
            metadata,
            data_source_id: None,
            ingestion_job_id: None,
            catalog_id: None,
            uploaded_at: None,
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            concurrent_uploads: 2,
            rate_limit_per_second: 0,
            retry: RetryPolicy::new(2, Duration::ZERO),
            upload_timeout: Duration::from_secs(5),
            validate_before_upload: true,
            skip_duplicates: true,
        }
    }

    /// Always fails with the given error.
    struct FailingCatalog {
        error: CatalogError,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CatalogClient for FailingCatalog {
        async fn exists(&self, _: DataType, _: &str) -> Result<bool, CatalogError> {
            Ok(false)
        }

        async fn upload(&self, _: &CanonicalItem) -> Result<UploadOutcome, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    /// Never answers.
    struct HangingCatalog;

    #[async_trait]
    impl CatalogClient for HangingCatalog {
        async fn exists(&self, _: DataType, _: &str) -> Result<bool, CatalogError> {
            Ok(false)
        }

        async fn upload(&self, _: &CanonicalItem) -> Result<UploadOutcome, CatalogError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn uploads_every_item_in_order() {
        let catalog = Arc::new(MemoryCatalog::new());
        let scheduler = UploadScheduler::new(catalog.clone(), config());
        let items = vec![item("A"), item("B"), item("C")];

        let report = scheduler.run_batch(items, &CancellationToken::new()).await;

        assert_eq!(report.uploaded(), 3);
        assert_eq!(catalog.len(), 3);
        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.item.item_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert!(report.uploaded_items().all(|i| i.uploaded_at.is_some() && i.catalog_id.is_some()));
    }

    #[tokio::test]
    async fn duplicate_is_skipped_or_failed_by_config() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.seed(DataType::Maintenance, "A");

        let report = UploadScheduler::new(catalog.clone(), config())
            .run_batch(vec![item("A")], &CancellationToken::new())
            .await;
        assert_eq!(report.skipped(), 1);

        let strict = SchedulerConfig {
            skip_duplicates: false,
            ..config()
        };
        let report = UploadScheduler::new(catalog, strict)
            .run_batch(vec![item("A")], &CancellationToken::new())
            .await;
        assert_eq!(report.outcomes[0].result, ItemResult::Failed(UploadFailure::Duplicate));
    }

    #[tokio::test]
    async fn invalid_item_never_reaches_catalog() {
        let catalog = Arc::new(MemoryCatalog::new());
        let mut bad = item("B");
        bad.metadata.shift_remove(META_SOURCE);

        let report = UploadScheduler::new(catalog.clone(), config())
            .run_batch(vec![item("A"), bad], &CancellationToken::new())
            .await;

        assert_eq!(report.uploaded(), 1);
        assert!(matches!(
            report.outcomes[1].result,
            ItemResult::Failed(UploadFailure::Validation(_))
        ));
        assert_eq!(report.outcomes[1].attempts, 0);
        assert_eq!(catalog.upload_calls(), 1);
    }

    #[tokio::test]
    async fn retryable_failures_exhaust_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let catalog = Arc::new(FailingCatalog {
            error: CatalogError::Unavailable("HTTP 503: down".into()),
            calls: calls.clone(),
        });

        let report = UploadScheduler::new(catalog, config())
            .run_batch(vec![item("A")], &CancellationToken::new())
            .await;

        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcomes[0].attempts, 3);
        assert_eq!(report.retries(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_does_not_abort_batch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let catalog = Arc::new(FailingCatalog {
            error: CatalogError::Unauthorized { status: 401 },
            calls: calls.clone(),
        });

        let report = UploadScheduler::new(catalog, config())
            .run_batch(vec![item("A"), item("B"), item("C")], &CancellationToken::new())
            .await;

        assert_eq!(report.failed(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_timeout_is_retryable() {
        let cfg = SchedulerConfig {
            upload_timeout: Duration::from_millis(50),
            retry: RetryPolicy::new(1, Duration::ZERO),
            ..config()
        };
        let report = UploadScheduler::new(Arc::new(HangingCatalog), cfg)
            .run_batch(vec![item("A")], &CancellationToken::new())
            .await;

        assert_eq!(
            report.outcomes[0].result,
            ItemResult::Failed(UploadFailure::Catalog(CatalogError::Timeout))
        );
        assert_eq!(report.outcomes[0].attempts, 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_submits_nothing() {
        let catalog = Arc::new(MemoryCatalog::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = UploadScheduler::new(catalog.clone(), config())
            .run_batch(vec![item("A"), item("B")], &cancel)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.not_submitted(), 2);
        assert_eq!(catalog.upload_calls(), 0);
    }
}
