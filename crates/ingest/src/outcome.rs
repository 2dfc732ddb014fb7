//! Result of one sync run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use blade_core::SyncStatus;

/// Pipeline stage at which an item was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Transform,
    Dedup,
    Validation,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub stage: FailureStage,
    /// Absent when the row failed before an id was assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Position of the source row in the fetched result.
    pub row_index: usize,
    pub reason: String,
}

impl ItemFailure {
    pub fn message(&self) -> String {
        match &self.item_id {
            Some(id) => format!("{id}: {}", self.reason),
            None => format!("row {}: {}", self.row_index, self.reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub fetched: usize,
    pub transformed: usize,
    pub skipped_duplicate: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub not_submitted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub ingestion_job_id: Uuid,
    pub data_source_id: Uuid,
    pub counts: SyncCounts,
    /// Retries consumed across all uploads.
    pub retries: u32,
    pub failures: Vec<ItemFailure>,
    /// Set when the fetch could not complete; no item was processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
    pub status: SyncStatus,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncOutcome {
    pub(crate) fn begin(data_source_id: Uuid, ingestion_job_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            ingestion_job_id,
            data_source_id,
            counts: SyncCounts::default(),
            retries: 0,
            failures: Vec::new(),
            fetch_error: None,
            status: SyncStatus::Running,
            cancelled: false,
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn record_failure(
        &mut self,
        stage: FailureStage,
        item_id: Option<String>,
        row_index: usize,
        reason: impl Into<String>,
    ) {
        self.counts.failed += 1;
        self.failures.push(ItemFailure {
            stage,
            item_id,
            row_index,
            reason: reason.into(),
        });
    }

    /// Fix the terminal status and end time.
    pub(crate) fn finish(&mut self) {
        self.status = resolve_status(&self.counts, self.cancelled, self.fetch_error.is_some());
        self.finished_at = Utc::now();
    }

    /// Message stored on the data source; `None` on success.
    pub fn error_message(&self) -> Option<String> {
        if self.status == SyncStatus::Success {
            return None;
        }
        if let Some(e) = &self.fetch_error {
            return Some(e.clone());
        }
        if let Some(first) = self.failures.first() {
            return Some(first.message());
        }
        self.cancelled.then(|| "sync cancelled".to_string())
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Terminal status for a run.
///
/// A failed fetch is always `Failed`. Otherwise a clean, uncancelled run is
/// `Success`; any upload alongside failures or cancellation is `Partial`; a
/// run with failures and no upload is `Failed`. A cancelled run with nothing
/// completed is `Failed`, with only skips `Partial`.
pub fn resolve_status(counts: &SyncCounts, cancelled: bool, fetch_failed: bool) -> SyncStatus {
    if fetch_failed {
        return SyncStatus::Failed;
    }
    if counts.failed == 0 && !cancelled {
        return SyncStatus::Success;
    }
    if counts.uploaded > 0 {
        return SyncStatus::Partial;
    }
    if counts.failed > 0 {
        return SyncStatus::Failed;
    }
    if counts.skipped_duplicate > 0 {
        SyncStatus::Partial
    } else {
        SyncStatus::Failed
    }
}
