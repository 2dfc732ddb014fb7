use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BladeError;
use crate::item::{ClassificationMarking, DataType};

/// Env var selecting the active profile.
pub const PROFILE_ENV: &str = "BLADE_PROFILE";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

// ── Env helpers ───────────────────────────────────────────────
//
// Shared with the warehouse and catalog crates, which build their own
// config sections from the same profile.

pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Active profile from `BLADE_PROFILE`, upper-cased (empty = default).
pub fn active_profile() -> String {
    env_opt(PROFILE_ENV)
        .map(|s| s.to_uppercase())
        .unwrap_or_default()
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
pub fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

pub fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

/// Numeric profiled var; unparsable values fall back to `default`.
pub fn profiled_env_num<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub sync: SyncConfig,
    pub postgres: PostgresConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// When `BLADE_PROFILE` is set (e.g. `PROD`), every key is first looked up
    /// as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        Self::for_profile(&active_profile())
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            sync: SyncConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject configurations the sync engine cannot run with.
    pub fn validate(&self) -> Result<(), BladeError> {
        self.sync.validate()?;
        self.postgres.validate()?;
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        let s = &self.sync;
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  uploads:     concurrency={}, rate={}/s, retries={}, retry_delay={}ms",
            s.concurrent_uploads, s.rate_limit_per_second, s.max_retries, s.retry_delay_ms
        );
        tracing::info!(
            "  fetch:       schema={}, max_records={}, query_timeout={}s",
            s.schema_name, s.max_records_per_query, s.query_timeout_secs
        );
        tracing::info!(
            "  items:       source={}, skip_duplicates={}, validate={}, default_classification={}",
            s.item_source, s.skip_duplicates, s.validate_before_upload, s.default_classification
        );
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
    }

    /// Redacted view with no secrets, suitable for printing.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "sync": self.sync,
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "user": self.postgres.username,
                "configured": self.postgres.is_configured(),
            },
        })
    }
}

// ── Sync ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upload admission slots (`CONCURRENT_UPLOADS`, default 5).
    pub concurrent_uploads: usize,
    /// Upload attempts per second across all workers; 0 = unlimited.
    pub rate_limit_per_second: u32,
    /// Chunk size for item persistence and progress logging.
    pub batch_size: usize,
    /// Retries after the first failed attempt (`CATALOG_RETRY_ATTEMPTS`).
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub skip_duplicates: bool,
    pub validate_before_upload: bool,
    pub max_records_per_query: u64,
    pub default_classification: String,
    /// Schema used to qualify mapped tables (`DB_SCHEMA_NAME`).
    pub schema_name: String,
    /// Data type → warehouse table. Keys that are not data types are kept
    /// verbatim so `validate` can report them.
    pub data_type_mapping: BTreeMap<String, String>,
    /// Per-type classification overrides (`CLASSIFICATION_<TYPE>`).
    pub classification_overrides: BTreeMap<String, String>,
    pub processing_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    /// Value of the `source` metadata key stamped on every item.
    pub item_source: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrent_uploads: 5,
            rate_limit_per_second: 10,
            batch_size: 10,
            max_retries: 3,
            retry_delay_ms: 2000,
            skip_duplicates: true,
            validate_before_upload: true,
            max_records_per_query: 1000,
            default_classification: ClassificationMarking::Unclassified.to_string(),
            schema_name: "public".into(),
            data_type_mapping: default_mapping(),
            classification_overrides: BTreeMap::new(),
            processing_timeout_secs: 300,
            query_timeout_secs: 30,
            upload_timeout_secs: 60,
            item_source: "databricks".into(),
        }
    }
}

fn default_mapping() -> BTreeMap<String, String> {
    DataType::ALL
        .iter()
        .map(|dt| (dt.as_str().to_string(), dt.default_table_name()))
        .collect()
}

/// Parse `type=table,type=table`. Alias keys are normalized to the canonical
/// data type name; malformed pairs are kept under their raw text so that
/// validation fails on them.
fn parse_mapping(raw: &str) -> BTreeMap<String, String> {
    let mut map = default_mapping();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((key, table)) => {
                let key = key.trim();
                let key = key
                    .parse::<DataType>()
                    .map(|dt| dt.as_str().to_string())
                    .unwrap_or_else(|_| key.to_string());
                map.insert(key, table.trim().to_string());
            }
            None => {
                map.insert(pair.to_string(), String::new());
            }
        }
    }
    map
}

impl SyncConfig {
    pub fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        let classification_overrides = DataType::ALL
            .iter()
            .filter_map(|dt| {
                let key = format!("CLASSIFICATION_{}", dt.as_str().to_uppercase());
                profiled_env_opt(p, &key).map(|v| (dt.as_str().to_string(), v))
            })
            .collect();
        Self {
            concurrent_uploads: profiled_env_num(p, "CONCURRENT_UPLOADS", d.concurrent_uploads),
            rate_limit_per_second: profiled_env_num(p, "RATE_LIMIT_PER_SECOND", d.rate_limit_per_second),
            batch_size: profiled_env_num(p, "CATALOG_BATCH_SIZE", d.batch_size),
            max_retries: profiled_env_num(p, "CATALOG_RETRY_ATTEMPTS", d.max_retries),
            retry_delay_ms: profiled_env_num(p, "RETRY_DELAY_MS", d.retry_delay_ms),
            skip_duplicates: profiled_env_bool(p, "SKIP_DUPLICATES", d.skip_duplicates),
            validate_before_upload: profiled_env_bool(p, "ENABLE_DATA_VALIDATION", d.validate_before_upload),
            max_records_per_query: profiled_env_num(p, "MAX_RECORDS_PER_QUERY", d.max_records_per_query),
            default_classification: profiled_env_or(p, "DEFAULT_CLASSIFICATION", &d.default_classification),
            schema_name: profiled_env_or(p, "DB_SCHEMA_NAME", &d.schema_name),
            data_type_mapping: profiled_env_opt(p, "DATA_TYPE_MAPPING")
                .map(|raw| parse_mapping(&raw))
                .unwrap_or(d.data_type_mapping),
            classification_overrides,
            processing_timeout_secs: profiled_env_num(p, "PROCESSING_TIMEOUT_SECS", d.processing_timeout_secs),
            query_timeout_secs: profiled_env_num(p, "QUERY_TIMEOUT_SECS", d.query_timeout_secs),
            upload_timeout_secs: profiled_env_num(p, "UPLOAD_TIMEOUT_SECS", d.upload_timeout_secs),
            item_source: profiled_env_or(p, "ITEM_SOURCE", &d.item_source),
        }
    }

    pub fn validate(&self) -> Result<(), BladeError> {
        let positive = [
            ("CONCURRENT_UPLOADS", self.concurrent_uploads as u64),
            ("CATALOG_BATCH_SIZE", self.batch_size as u64),
            ("MAX_RECORDS_PER_QUERY", self.max_records_per_query),
            ("PROCESSING_TIMEOUT_SECS", self.processing_timeout_secs),
            ("QUERY_TIMEOUT_SECS", self.query_timeout_secs),
            ("UPLOAD_TIMEOUT_SECS", self.upload_timeout_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(BladeError::Config(format!("{key} must be greater than 0")));
            }
        }
        if !ClassificationMarking::is_valid(&self.default_classification) {
            return Err(BladeError::Config(format!(
                "DEFAULT_CLASSIFICATION '{}' is not a valid marking",
                self.default_classification
            )));
        }
        for (key, table) in &self.data_type_mapping {
            if key.parse::<DataType>().is_err() {
                return Err(BladeError::Config(format!(
                    "DATA_TYPE_MAPPING has unknown data type '{key}'"
                )));
            }
            if table.is_empty() {
                return Err(BladeError::Config(format!(
                    "DATA_TYPE_MAPPING has no table for '{key}'"
                )));
            }
        }
        for (key, marking) in &self.classification_overrides {
            if !ClassificationMarking::is_valid(marking) {
                return Err(BladeError::Config(format!(
                    "classification override for {key} is not a valid marking: '{marking}'"
                )));
            }
        }
        if self.item_source.trim().is_empty() {
            return Err(BladeError::Config("ITEM_SOURCE must not be empty".into()));
        }
        Ok(())
    }

    /// Warehouse table for `data_type`, unqualified.
    pub fn table_for(&self, data_type: DataType) -> String {
        self.data_type_mapping
            .get(data_type.as_str())
            .filter(|t| !t.is_empty())
            .cloned()
            .unwrap_or_else(|| data_type.default_table_name())
    }

    /// Classification defaults per data type, with overrides applied.
    pub fn classification_defaults(&self) -> BTreeMap<DataType, ClassificationMarking> {
        DataType::ALL
            .iter()
            .map(|dt| {
                let marking = self
                    .classification_overrides
                    .get(dt.as_str())
                    .and_then(|m| m.parse().ok())
                    .unwrap_or_else(|| dt.default_classification());
                (*dt, marking)
            })
            .collect()
    }

    pub fn fallback_classification(&self) -> ClassificationMarking {
        self.default_classification
            .parse()
            .unwrap_or(ClassificationMarking::Unclassified)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    pub fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PGHOST", "localhost"),
            port: profiled_env_num(p, "PGPORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "blade"),
            username: profiled_env_or(p, "PG_USER", "postgres"),
            password: profiled_env_opt(p, "APP_DB_ADMIN_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_num(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn validate(&self) -> Result<(), BladeError> {
        if self.password.is_none() {
            return Err(BladeError::Config(
                "APP_DB_ADMIN_PASSWORD environment variable is required".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(BladeError::Config("PG_MAX_CONNECTIONS must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn connection_string(&self) -> String {
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.username, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.password.is_some()
    }
}

// ── Tests ─────────────────────────────────────────────────────
