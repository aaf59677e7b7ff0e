use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A unique key is already taken by a committed row.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("record is immutable: {0}")]
    Immutable(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("decode error: {0}")]
    Decode(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StorageError::UniqueViolation(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::UniqueViolation(
                db.constraint().unwrap_or("unknown constraint").to_string(),
            ),
            _ => StorageError::Database(err),
        }
    }
}

impl From<signalflow_core::SignalflowError> for StorageError {
    fn from(err: signalflow_core::SignalflowError) -> Self {
        StorageError::Decode(err.to_string())
    }
}

/// Result alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
