use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("data source not found: {0}")]
    NotFound(Uuid),

    #[error("duplicate type_name '{0}': a data source with this name already exists")]
    DuplicateName(String),

    /// A stored row could not be mapped back into the domain model.
    #[error("corrupt row: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
