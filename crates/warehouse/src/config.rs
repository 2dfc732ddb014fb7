use std::time::Duration;

use serde::{Deserialize, Serialize};

use blade_core::config::{active_profile, profiled_env_num, profiled_env_opt};
use blade_core::BladeError;

// ── WarehouseConfig ──────────────────────────────────────────────

/// Connection settings for the SQL warehouse statement API.
///
/// Reads from environment variables with optional profile prefix.
/// When `BLADE_PROFILE=PROD`, checks `PROD_DATABRICKS_URL` before `DATABRICKS_URL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Workspace base URL, e.g. `https://adb-123.azuredatabricks.net`.
    pub base_url: String,
    /// Personal access token sent as a bearer credential.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// SQL warehouse that executes statements.
    pub warehouse_id: String,
    /// HTTP timeout for a single statement request, in seconds.
    pub timeout_seconds: u64,
}

impl WarehouseConfig {
    /// Build config from environment variables using `BLADE_PROFILE`.
    pub fn from_env() -> Self {
        Self::from_env_profiled(&active_profile())
    }

    /// Build config for a specific named profile.
    pub fn from_env_profiled(profile: &str) -> Self {
        Self {
            base_url: profiled_env_opt(profile, "DATABRICKS_URL").unwrap_or_default(),
            token: profiled_env_opt(profile, "DATABRICKS_TOKEN"),
            warehouse_id: profiled_env_opt(profile, "DATABRICKS_WAREHOUSE_ID").unwrap_or_default(),
            timeout_seconds: profiled_env_num(profile, "DATABRICKS_TIMEOUT_SECS", 60),
        }
    }

    pub fn validate(&self) -> Result<(), BladeError> {
        if self.base_url.is_empty() {
            return Err(BladeError::Config(
                "DATABRICKS_URL environment variable is required".into(),
            ));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(BladeError::Config(format!(
                "DATABRICKS_URL must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.timeout_seconds == 0 {
            return Err(BladeError::Config("DATABRICKS_TIMEOUT_SECS must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Statement execution endpoint.
    pub fn statements_url(&self) -> String {
        format!("{}/api/2.0/sql/statements", self.base_url.trim_end_matches('/'))
    }
}

// ── Tests ────────────────────────────────────────────────────────
