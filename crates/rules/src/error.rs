//! Error types for rule evaluation, versioning and definition loading.

use signalflow_storage::StorageError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule not found: {0}")]
    RuleNotFound(Uuid),

    #[error("rule version not found: {0}")]
    VersionNotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse/deserialization error.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Definition validation error (missing ids, unknown references).
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;
