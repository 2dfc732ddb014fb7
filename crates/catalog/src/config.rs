use std::time::Duration;

use serde::{Deserialize, Serialize};

use blade_core::config::{active_profile, profiled_env_num, profiled_env_opt};
use blade_core::BladeError;

/// Catalog service endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    /// HTTP client timeout; individual uploads are also bounded by the
    /// scheduler's upload timeout.
    pub timeout_seconds: u64,
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        Self::from_env_profiled(&active_profile())
    }

    pub fn from_env_profiled(profile: &str) -> Self {
        Self {
            base_url: profiled_env_opt(profile, "CATALOG_URL").unwrap_or_default(),
            auth_token: profiled_env_opt(profile, "CATALOG_AUTH_TOKEN"),
            timeout_seconds: profiled_env_num(profile, "CATALOG_TIMEOUT_SECS", 30),
        }
    }

    pub fn validate(&self) -> Result<(), BladeError> {
        if self.base_url.is_empty() {
            return Err(BladeError::Config(
                "CATALOG_URL environment variable is required".into(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(BladeError::Config("CATALOG_TIMEOUT_SECS must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
