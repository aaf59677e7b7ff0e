//! Domain records touched by action steps.
//!
//! Every record shares one shape: a kind, an owning agency, and a JSON body.
//! Inputs are typed so required identifiers are checked before storage.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::SignalflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Project,
    TaskList,
    Task,
    Notification,
    Initiative,
    Invoice,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Project => "project",
            RecordKind::TaskList => "task_list",
            RecordKind::Task => "task",
            RecordKind::Notification => "notification",
            RecordKind::Initiative => "initiative",
            RecordKind::Invoice => "invoice",
        }
    }
}

impl FromStr for RecordKind {
    type Err = SignalflowError;

    /// Accepts singular and plural table-style names (`task`, `tasks`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let singular = s.strip_suffix('s').unwrap_or(s);
        match singular {
            "project" => Ok(RecordKind::Project),
            "task_list" | "tasklist" => Ok(RecordKind::TaskList),
            "task" => Ok(RecordKind::Task),
            "notification" => Ok(RecordKind::Notification),
            "initiative" => Ok(RecordKind::Initiative),
            "invoice" => Ok(RecordKind::Invoice),
            _ => Err(SignalflowError::InvalidValue {
                field: "record kind",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: Uuid,
    pub kind: RecordKind,
    pub agency_id: Uuid,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(kind: RecordKind, agency_id: Uuid, data: Value, execution_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            agency_id,
            data,
            execution_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record as seen by later workflow steps: body fields plus `id`.
    pub fn to_output(&self) -> Value {
        let mut out = match &self.data {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        out.insert("id".to_string(), Value::String(self.id.to_string()));
        out.insert("kind".to_string(), Value::String(self.kind.as_str().to_string()));
        Value::Object(out)
    }

    /// Shallow-merge `patch` into the body.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        if !self.data.is_object() {
            self.data = Value::Object(Map::new());
        }
        if let Value::Object(body) = &mut self.data {
            for (k, v) in patch {
                body.insert(k.clone(), v.clone());
            }
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiative_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTaskList {
    pub project_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_list_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_channel() -> String {
    "in_app".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoice {
    pub client_id: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
}

fn default_currency() -> String {
    "USD".to_string()
}
