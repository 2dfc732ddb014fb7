pub mod client;
pub mod config;
pub mod dedup;
pub mod http;
pub mod memory;
pub mod metadata;

pub use client::{CatalogClient, CatalogError, UploadOutcome};
pub use config::CatalogConfig;
pub use dedup::{DedupError, DedupGate};
pub use http::HttpCatalogClient;
pub use memory::MemoryCatalog;
pub use metadata::{build_upload_metadata, data_source_label};
