//! Workflow definitions: a graph of typed steps.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::rule::{Condition, ConditionLogic};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub agency_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Workflow {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Re-attempts for retryable step failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_ms: u64,
}

fn default_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

/// What happens to the run when a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OnError {
    /// Abort the run and record it failed. Any unrecognised policy maps here.
    #[default]
    Fail,
    /// Record the failure and continue along the static `next` pointer.
    Skip,
}

impl From<String> for OnError {
    fn from(s: String) -> Self {
        match s.as_str() {
            "skip" => OnError::Skip,
            _ => OnError::Fail,
        }
    }
}

impl From<OnError> for String {
    fn from(p: OnError) -> Self {
        match p {
            OnError::Fail => "fail".to_string(),
            OnError::Skip => "skip".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default)]
    pub on_error: OnError,
}

impl Step {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            next: None,
            on_error: OnError::Fail,
        }
    }

    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn skip_on_error(mut self) -> Self {
        self.on_error = OnError::Skip;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Signal(SignalStepConfig),
    Rule(RuleStepConfig),
    Ai(AiStepConfig),
    Action(ActionStepConfig),
    Branch(BranchStepConfig),
    Parallel(ParallelStepConfig),
}

impl StepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::Signal(_) => "signal",
            StepKind::Rule(_) => "rule",
            StepKind::Ai(_) => "ai",
            StepKind::Action(_) => "action",
            StepKind::Branch(_) => "branch",
            StepKind::Parallel(_) => "parallel",
        }
    }
}

/// Exact key/value filter over the trigger data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalStepConfig {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub filter: Map<String, Value>,
}

/// Gate on a stored rule (preferred) or an inline condition list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStepConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiStepConfig {
    /// `{{path}}` template rendered against the step-result map.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// When present the response must be JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateProject,
    CreateTaskList,
    CreateTask,
    SendNotification,
    UpdateRecord,
    UpdateInitiative,
    CreateInvoice,
    Log,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreateProject => "create_project",
            ActionKind::CreateTaskList => "create_task_list",
            ActionKind::CreateTask => "create_task",
            ActionKind::SendNotification => "send_notification",
            ActionKind::UpdateRecord => "update_record",
            ActionKind::UpdateInitiative => "update_initiative",
            ActionKind::CreateInvoice => "create_invoice",
            ActionKind::Log => "log",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStepConfig {
    pub action: ActionKind,
    /// Parameter templates; string values may reference prior step results.
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchArm {
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    pub next: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStepConfig {
    pub branches: Vec<BranchArm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelStepConfig {
    pub steps: Vec<String>,
}
