use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use signalflow_core::model::StepKind;
use signalflow_llm::LlmError;
use signalflow_rules::RuleError;
use signalflow_signals::SignalError;
use signalflow_storage::StorageError;

use crate::template::TemplateError;

/// Failure of a single step handler invocation.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("missing required parameter '{0}'")]
    MissingParam(String),

    #[error("invalid parameters for {action}: {reason}")]
    InvalidParams { action: String, reason: String },

    #[error("handler for '{expected}' steps received a '{actual}' step")]
    KindMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("ai provider error: {0}")]
    Ai(#[from] LlmError),

    #[error("ai response is not valid JSON: {0}")]
    InvalidAiResponse(String),

    #[error("ai response is missing required field '{0}'")]
    MissingAiField(String),

    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl StepError {
    /// Whether another attempt of a step of `kind` may succeed.
    ///
    /// Provider failures are retryable. A timeout is retryable only for `ai`
    /// steps: other handlers may have written inside the run's transaction
    /// before the timeout cut them off.
    pub fn is_retryable(&self, kind: &StepKind) -> bool {
        match self {
            StepError::Ai(e) => e.is_retryable(),
            StepError::Timeout(_) => matches!(kind, StepKind::Ai(_)),
            _ => false,
        }
    }
}

/// Errors surfaced to `execute` callers instead of an execution record.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("workflow is disabled: {0}")]
    WorkflowDisabled(Uuid),

    #[error("workflow has no steps: {0}")]
    EmptyWorkflow(Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Signal(#[from] SignalError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
