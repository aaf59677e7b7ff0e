//! Workflow run instances and their append-only step events.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SignalflowError;

/// `pending → running → completed | failed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl FromStr for ExecutionStatus {
    type Err = SignalflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(SignalflowError::InvalidValue {
                field: "execution status",
                value: other.to_string(),
            }),
        }
    }
}

/// One run of a workflow. `(workflow_id, input_hash)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub agency_id: Uuid,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub input_hash: String,
    pub trigger_payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// A fresh `pending` row for the given trigger.
    pub fn pending(
        workflow_id: Uuid,
        agency_id: Uuid,
        input_hash: String,
        trigger_payload: Value,
        trigger_id: Option<String>,
        trigger_type: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            agency_id,
            status: ExecutionStatus::Pending,
            current_step: None,
            input_hash,
            trigger_payload,
            trigger_id,
            trigger_type,
            result: None,
            output_hash: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEventType {
    Started,
    Completed,
    Failed,
}

impl StepEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepEventType::Started => "started",
            StepEventType::Completed => "completed",
            StepEventType::Failed => "failed",
        }
    }
}

impl FromStr for StepEventType {
    type Err = SignalflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(StepEventType::Started),
            "completed" => Ok(StepEventType::Completed),
            "failed" => Ok(StepEventType::Failed),
            other => Err(SignalflowError::InvalidValue {
                field: "event type",
                value: other.to_string(),
            }),
        }
    }
}

/// Append-only audit record of one step transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: String,
    pub step_type: String,
    pub event_type: StepEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(execution_id: Uuid, step_id: &str, step_type: &str, event_type: StepEventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id: step_id.to_string(),
            step_type: step_type.to_string(),
            event_type,
            duration_ms: None,
            input: None,
            output: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}
