//! HTTP catalog client: multipart uploads and existence checks.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;

use blade_core::{CanonicalItem, DataType};

use crate::client::{CatalogClient, CatalogError, UploadOutcome};
use crate::config::CatalogConfig;
use crate::metadata::{build_upload_metadata, data_source_label};

#[derive(Debug)]
pub struct HttpCatalogClient {
    config: CatalogConfig,
    /// Shared HTTP client (connection pooling).
    http: reqwest::Client,
}

impl HttpCatalogClient {
    pub fn new(config: CatalogConfig) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CatalogError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { config, http })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn build_form(item: &CanonicalItem) -> Result<Form, CatalogError> {
        let body = serde_json::to_vec(&item.payload).map_err(|e| CatalogError::Rejected {
            status: 0,
            message: format!("payload is not serializable: {e}"),
        })?;
        let metadata = serde_json::Value::Object(build_upload_metadata(item)).to_string();

        let file = Part::bytes(body)
            .file_name(item.file_name())
            .mime_str("application/json")
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        Ok(Form::new()
            .part("file", file)
            .text("dataSource", data_source_label(item.data_type))
            .text("classificationMarking", item.classification.as_str())
            .text("itemId", item.item_id.clone())
            .text("metadata", metadata))
    }
}

fn map_transport_error(e: reqwest::Error) -> CatalogError {
    if e.is_timeout() {
        CatalogError::Timeout
    } else {
        CatalogError::Unavailable(e.to_string())
    }
}

/// Pull a catalog id out of a create response, if the body carries one.
fn catalog_id_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["catalogId", "catalog_id", "id"]
        .iter()
        .find_map(|key| match value.get(*key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn exists(&self, data_type: DataType, item_id: &str) -> Result<bool, CatalogError> {
        let req = self
            .http
            .get(self.config.endpoint("/catalog/exists"))
            .query(&[("source", data_type.as_str()), ("id", item_id)]);
        let response = self.authorize(req).send().await.map_err(map_transport_error)?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(
                    data_type = %data_type,
                    item_id = %item_id,
                    status = status.as_u16(),
                    "catalog existence check failed"
                );
                Err(CatalogError::from_status(status.as_u16(), body))
            }
        }
    }

    async fn upload(&self, item: &CanonicalItem) -> Result<UploadOutcome, CatalogError> {
        let form = Self::build_form(item)?;
        let req = self
            .http
            .post(self.config.endpoint("/catalog/item"))
            .multipart(form);
        let response = self.authorize(req).send().await.map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;

        match status {
            StatusCode::OK | StatusCode::CREATED => {
                tracing::debug!(item_id = %item.item_id, status = status.as_u16(), "catalog upload accepted");
                Ok(UploadOutcome::Created {
                    catalog_id: catalog_id_from_body(&body),
                })
            }
            StatusCode::CONFLICT => Ok(UploadOutcome::Duplicate),
            other => Err(CatalogError::from_status(other.as_u16(), body)),
        }
    }
}
