//! SQL warehouse statement client.
//!
//! [`WarehouseClient`] is the seam the sync engine fetches through.
//! [`HttpWarehouseClient`] speaks the statement execution REST API: it submits
//! the statement, polls with exponential backoff while the warehouse is still
//! running it, and parses the inline result into a [`QueryResult`].

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use blade_core::DataType;

use crate::config::WarehouseConfig;
use crate::planner::{PlanError, QueryPlanner, Statement};
use crate::result::{Column, QueryResult, RawRow};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WarehouseError {
    /// Warehouse unreachable, overloaded or failed for a non-query reason.
    #[error("warehouse unavailable: {0}")]
    Unavailable(String),

    #[error("warehouse query timed out after {0:?}")]
    Timeout(Duration),

    /// The warehouse rejected the statement itself.
    #[error("query rejected: {0}")]
    QuerySyntax(String),

    #[error("could not parse warehouse response: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Execute `statement`, giving up once `timeout` has elapsed.
    async fn query(
        &self,
        statement: &Statement,
        timeout: Duration,
    ) -> Result<QueryResult, WarehouseError>;
}

/// Failure modes of [`fetch_item`].
#[derive(Debug, thiserror::Error)]
pub enum FetchItemError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("item not found: {data_type}/{item_id}")]
    NotFound { data_type: DataType, item_id: String },
}

/// Fetch the single row for `item_id` from the table mapped to `data_type`.
pub async fn fetch_item(
    client: &dyn WarehouseClient,
    planner: &QueryPlanner,
    data_type: DataType,
    item_id: &str,
    timeout: Duration,
) -> Result<RawRow, FetchItemError> {
    let statement = planner.build_item_query(data_type, item_id)?;
    let result = client.query(&statement, timeout).await?;
    result
        .into_rows()
        .into_iter()
        .next()
        .ok_or_else(|| FetchItemError::NotFound {
            data_type,
            item_id: item_id.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: Option<String>,
    status: Option<StatementStatus>,
    manifest: Option<Manifest>,
    result: Option<ResultData>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    error_code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    schema: Option<SchemaDef>,
}

#[derive(Debug, Deserialize)]
struct SchemaDef {
    #[serde(default)]
    columns: Vec<ColumnDef>,
}

#[derive(Debug, Deserialize)]
struct ColumnDef {
    name: String,
    #[serde(default)]
    type_name: Option<String>,
    #[serde(default)]
    type_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultData {
    #[serde(default, alias = "data")]
    data_array: Option<Vec<Vec<serde_json::Value>>>,
    schema: Option<SchemaDef>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Server-side wait per request; the API accepts 5..=50 seconds.
const MAX_WAIT_SECS: u64 = 50;
const MIN_WAIT_SECS: u64 = 5;

pub struct HttpWarehouseClient {
    config: WarehouseConfig,
    http: reqwest::Client,
}

impl HttpWarehouseClient {
    pub fn new(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| WarehouseError::Unavailable(format!("http client: {e}")))?;

        info!(
            url = %config.base_url,
            warehouse_id = %config.warehouse_id,
            "warehouse client initialised"
        );

        Ok(Self { config, http })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn submit(
        &self,
        statement: &Statement,
        remaining: Duration,
    ) -> Result<StatementResponse, WarehouseError> {
        let wait = remaining.as_secs().clamp(MIN_WAIT_SECS, MAX_WAIT_SECS);
        let body = serde_json::json!({
            "warehouse_id": self.config.warehouse_id,
            "statement": statement.sql,
            "parameters": statement.parameters,
            "wait_timeout": format!("{wait}s"),
            "on_wait_timeout": "CONTINUE",
            "disposition": "INLINE",
            "format": "JSON_ARRAY",
        });

        let req = self
            .http
            .post(self.config.statements_url())
            .timeout(remaining)
            .json(&body);
        self.send(self.authorize(req), remaining).await
    }

    async fn fetch_status(
        &self,
        statement_id: &str,
        remaining: Duration,
    ) -> Result<StatementResponse, WarehouseError> {
        let url = format!("{}/{}", self.config.statements_url(), statement_id);
        let req = self.http.get(url).timeout(remaining);
        self.send(self.authorize(req), remaining).await
    }

    /// Best-effort cancel; errors are only logged.
    async fn cancel(&self, statement_id: &str) {
        let url = format!("{}/{}/cancel", self.config.statements_url(), statement_id);
        let req = self.authorize(self.http.post(url));
        if let Err(e) = req.send().await {
            warn!(statement_id = %statement_id, error = %e, "statement cancel failed");
        }
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<StatementResponse, WarehouseError> {
        let response = req.send().await.map_err(|e| map_transport_error(e, timeout))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(WarehouseError::QuerySyntax(error_message(&text)));
        }
        if !status.is_success() {
            return Err(WarehouseError::Unavailable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_message(&text)
            )));
        }

        serde_json::from_str(&text).map_err(|e| WarehouseError::Parse(e.to_string()))
    }
}

#[async_trait]
impl WarehouseClient for HttpWarehouseClient {
    async fn query(
        &self,
        statement: &Statement,
        timeout: Duration,
    ) -> Result<QueryResult, WarehouseError> {
        let start = Instant::now();
        info!(sql = %statement.sql, params = statement.parameters.len(), "submitting statement");

        let mut response = self.submit(statement, timeout).await?;

        let initial_delay_ms: u64 = 250;
        let max_delay_ms: u64 = 2000;
        let backoff_factor: f64 = 1.5;
        let mut delay_ms = initial_delay_ms;

        loop {
            let state = response
                .status
                .as_ref()
                .map(|s| s.state.as_str())
                .unwrap_or("SUCCEEDED");

            debug!(
                statement_id = ?response.statement_id,
                state = %state,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "statement status"
            );

            match state {
                "SUCCEEDED" => return parse_result(response),
                "FAILED" => return Err(failure_error(&response)),
                "CANCELED" | "CLOSED" => {
                    return Err(WarehouseError::Unavailable(format!(
                        "statement ended in state {state}"
                    )))
                }
                // PENDING | RUNNING
                _ => {}
            }

            let Some(statement_id) = response.statement_id.clone() else {
                return Err(WarehouseError::Parse(
                    "pending statement without statement_id".into(),
                ));
            };

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!(statement_id = %statement_id, ?timeout, "statement timed out, cancelling");
                self.cancel(&statement_id).await;
                return Err(WarehouseError::Timeout(timeout));
            }

            // Jitter without rand: nanosecond fraction of the wall clock.
            let jitter_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos()
                % 100;
            let sleep = Duration::from_millis(delay_ms + jitter_ms as u64).min(timeout - elapsed);
            tokio::time::sleep(sleep).await;
            delay_ms = ((delay_ms as f64 * backoff_factor) as u64).min(max_delay_ms);

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                self.cancel(&statement_id).await;
                return Err(WarehouseError::Timeout(timeout));
            }
            response = self.fetch_status(&statement_id, remaining).await?;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn map_transport_error(e: reqwest::Error, timeout: Duration) -> WarehouseError {
    if e.is_timeout() {
        WarehouseError::Timeout(timeout)
    } else if e.is_decode() {
        WarehouseError::Parse(e.to_string())
    } else {
        WarehouseError::Unavailable(e.to_string())
    }
}

/// Pull `message` out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn failure_error(response: &StatementResponse) -> WarehouseError {
    let error = response.status.as_ref().and_then(|s| s.error.as_ref());
    let code = error.and_then(|e| e.error_code.as_deref()).unwrap_or("");
    let message = error
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| "statement failed".to_string());

    let rejected = matches!(code, "BAD_REQUEST" | "INVALID_PARAMETER_VALUE")
        || message.contains("PARSE_SYNTAX_ERROR")
        || message.contains("TABLE_OR_VIEW_NOT_FOUND")
        || message.contains("UNRESOLVED_COLUMN");
    if rejected {
        WarehouseError::QuerySyntax(message)
    } else {
        WarehouseError::Unavailable(message)
    }
}

fn parse_result(response: StatementResponse) -> Result<QueryResult, WarehouseError> {
    let StatementResponse {
        statement_id,
        manifest,
        result,
        ..
    } = response;

    let (data, result_schema) = match result {
        Some(r) => (r.data_array.unwrap_or_default(), r.schema),
        None => (Vec::new(), None),
    };

    let schema = manifest.and_then(|m| m.schema).or(result_schema);
    let columns: Vec<Column> = schema
        .map(|s| {
            s.columns
                .into_iter()
                .map(|c| Column {
                    name: c.name,
                    type_name: c.type_name.or(c.type_text).unwrap_or_else(|| "STRING".into()),
                })
                .collect()
        })
        .unwrap_or_default();

    if columns.is_empty() && !data.is_empty() {
        return Err(WarehouseError::Parse("rows returned without a schema".into()));
    }

    let rows = data
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| match cell {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                })
                .collect()
        })
        .collect::<Vec<Vec<Option<String>>>>();

    debug!(columns = columns.len(), rows = rows.len(), "parsed statement result");

    Ok(QueryResult {
        statement_id,
        columns,
        rows,
    })
}
