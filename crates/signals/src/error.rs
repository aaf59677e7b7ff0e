use thiserror::Error;

use signalflow_core::SignalflowError;
use signalflow_storage::StorageError;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("signal must be a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("signal data must be a JSON object")]
    InvalidData,

    #[error("signal data must not contain reserved key: {0}")]
    ReservedField(&'static str),

    /// Source or urgency outside the closed taxonomy.
    #[error(transparent)]
    Invalid(#[from] SignalflowError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
