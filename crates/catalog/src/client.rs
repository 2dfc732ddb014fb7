//! Catalog client trait and its error taxonomy.

use async_trait::async_trait;

use blade_core::{CanonicalItem, DataType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// The catalog refused the item itself; retrying will not help.
    #[error("catalog rejected item (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("catalog request timed out")]
    Timeout,

    #[error("catalog returned unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },
}

impl CatalogError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogError::Unavailable(_) | CatalogError::Timeout => true,
            CatalogError::UnexpectedStatus { status, .. } => *status == 429 || *status >= 500,
            CatalogError::Unauthorized { .. } | CatalogError::Rejected { .. } => false,
        }
    }

    /// Map a non-success upload status to an error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => CatalogError::Unauthorized { status },
            400 | 422 => CatalogError::Rejected { status, message },
            500..=599 => CatalogError::Unavailable(format!("HTTP {status}: {message}")),
            _ => CatalogError::UnexpectedStatus { status, message },
        }
    }
}

/// Result of a successful upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Stored; `catalog_id` is the catalog's own identifier when it returns one.
    Created { catalog_id: Option<String> },
    /// The catalog already held this item.
    Duplicate,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Whether the catalog already holds `item_id` for `data_type`.
    async fn exists(&self, data_type: DataType, item_id: &str) -> Result<bool, CatalogError>;

    /// Upload one item. Uploads are idempotent on `(data_type, item_id)`.
    async fn upload(&self, item: &CanonicalItem) -> Result<UploadOutcome, CatalogError>;
}
