use thiserror::Error;

#[derive(Error, Debug)]
pub enum BladeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    #[error("Invalid classification marking: {0}")]
    InvalidClassification(String),

    #[error("Unknown sync status: {0}")]
    UnknownSyncStatus(String),
}

pub type Result<T> = std::result::Result<T, BladeError>;
